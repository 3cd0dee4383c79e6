//! Character sets understood by the escaping and formatting functions.
//!
//! Escaping has to walk a string one character at a time so that a byte
//! which looks like a quote or a backslash is never split out of a
//! multi-byte sequence. A [`CharacterSet`] supplies exactly that: a name
//! and a function measuring the next character.

/// utf8mb4_general_ci
pub const UTF8MB4_GENERAL_CI: u16 = 45;
/// utf8mb4_bin
pub const UTF8MB4_BIN: u16 = 46;
/// utf8mb4_0900_ai_ci (MySQL 8.0 default)
pub const UTF8MB4_0900_AI_CI: u16 = 255;
/// latin1_swedish_ci
pub const LATIN1_SWEDISH_CI: u16 = 8;
/// latin1_bin
pub const LATIN1_BIN: u16 = 47;
/// ascii_general_ci
pub const ASCII_GENERAL_CI: u16 = 11;
/// ascii_bin
pub const ASCII_BIN: u16 = 65;

/// A character set: its MySQL name and a character measuring function.
#[derive(Debug, Clone, Copy)]
pub struct CharacterSet {
    /// Name as used in `SET NAMES`
    pub name: &'static str,
    /// Length in bytes of the first character of the input, or 0 if the
    /// input does not start with a valid character. Never called with an
    /// empty slice.
    pub next_char: fn(&[u8]) -> usize,
}

impl PartialEq for CharacterSet {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for CharacterSet {}

pub const UTF8MB4: CharacterSet = CharacterSet {
    name: "utf8mb4",
    next_char: next_char_utf8mb4,
};

pub const LATIN1: CharacterSet = CharacterSet {
    name: "latin1",
    next_char: next_char_latin1,
};

pub const ASCII: CharacterSet = CharacterSet {
    name: "ascii",
    next_char: next_char_ascii,
};

/// Look up a character set by collation id.
pub fn by_collation(collation: u16) -> Option<CharacterSet> {
    match collation {
        UTF8MB4_GENERAL_CI | UTF8MB4_BIN | UTF8MB4_0900_AI_CI => Some(UTF8MB4),
        LATIN1_SWEDISH_CI | LATIN1_BIN => Some(LATIN1),
        ASCII_GENERAL_CI | ASCII_BIN => Some(ASCII),
        _ => None,
    }
}

/// Look up a character set by name.
pub fn by_name(name: &str) -> Option<CharacterSet> {
    [UTF8MB4, LATIN1, ASCII]
        .into_iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
}

fn next_char_utf8mb4(input: &[u8]) -> usize {
    let Some(&first) = input.first() else {
        return 0;
    };
    let len = match first {
        0x00..=0x7F => return 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return 0,
    };
    if input.len() < len {
        return 0;
    }
    // Delegating to the standard library rejects overlong forms and surrogates
    match std::str::from_utf8(&input[..len]) {
        Ok(_) => len,
        Err(_) => 0,
    }
}

fn next_char_latin1(input: &[u8]) -> usize {
    usize::from(!input.is_empty())
}

fn next_char_ascii(input: &[u8]) -> usize {
    match input.first() {
        Some(b) if b.is_ascii() => 1,
        _ => 0,
    }
}
