//! Escaping of strings for embedding in SQL text.
//!
//! The rules depend on where the result will be placed and on the
//! session's `NO_BACKSLASH_ESCAPES` mode:
//!
//! - Inside backticks, a backtick is doubled and nothing else changes.
//! - Inside quotes with backslash escapes enabled, `\0`, `\n`, `\r`,
//!   `\\`, `'`, `"` and Ctrl-Z are backslash-escaped.
//! - Inside quotes without backslash escapes, only the quote character
//!   is doubled.
//!
//! The input is walked one character at a time using the connection's
//! character set. A byte sequence that is not a valid character is an
//! [`InvalidEncoding`](mywire_core::ClientErrorKind::InvalidEncoding) error.

use mywire_core::{ClientErrorKind, Error, Result};

use crate::charset::{CharacterSet, UTF8MB4};

/// Where an escaped string will be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotingContext {
    /// Inside `"..."`
    DoubleQuote,
    /// Inside `'...'`
    SingleQuote,
    /// Inside `` `...` `` (identifiers)
    Backtick,
}

impl QuotingContext {
    pub const fn quote_char(self) -> u8 {
        match self {
            QuotingContext::DoubleQuote => b'"',
            QuotingContext::SingleQuote => b'\'',
            QuotingContext::Backtick => b'`',
        }
    }
}

/// Session properties that affect how SQL text is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub charset: CharacterSet,
    pub backslash_escapes: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            charset: UTF8MB4,
            backslash_escapes: true,
        }
    }
}

/// Escape `input` and append it to `output`.
///
/// On error `output` is left as it was.
pub fn escape_bytes(
    input: &[u8],
    opts: FormatOptions,
    ctx: QuotingContext,
    output: &mut Vec<u8>,
) -> Result<()> {
    let start = output.len();
    let res = escape_into(input, opts, ctx, output);
    if res.is_err() {
        output.truncate(start);
    }
    res
}

fn escape_into(
    input: &[u8],
    opts: FormatOptions,
    ctx: QuotingContext,
    output: &mut Vec<u8>,
) -> Result<()> {
    let quote = ctx.quote_char();
    let backslashes = opts.backslash_escapes && ctx != QuotingContext::Backtick;
    let mut rest = input;

    while !rest.is_empty() {
        let len = (opts.charset.next_char)(rest);
        if len == 0 || len > rest.len() {
            return Err(Error::client(
                ClientErrorKind::InvalidEncoding,
                format!(
                    "invalid {} sequence at byte {}",
                    opts.charset.name,
                    input.len() - rest.len()
                ),
            ));
        }
        let (ch, tail) = rest.split_at(len);
        rest = tail;

        if len > 1 {
            output.extend_from_slice(ch);
            continue;
        }
        let c = ch[0];
        if backslashes {
            let escaped = match c {
                0 => Some(b'0'),
                b'\n' => Some(b'n'),
                b'\r' => Some(b'r'),
                b'\\' => Some(b'\\'),
                b'\'' => Some(b'\''),
                b'"' => Some(b'"'),
                0x1A => Some(b'Z'),
                _ => None,
            };
            match escaped {
                Some(e) => output.extend_from_slice(&[b'\\', e]),
                None => output.push(c),
            }
        } else if c == quote {
            output.extend_from_slice(&[c, c]);
        } else {
            output.push(c);
        }
    }
    Ok(())
}

/// Escape `input` and append it to `output`, which is untouched on error.
///
/// Only ASCII bytes are ever inserted, so the output stays valid UTF-8
/// whatever character set is used to walk the input.
pub fn escape_string(
    input: &str,
    opts: FormatOptions,
    ctx: QuotingContext,
    output: &mut String,
) -> Result<()> {
    let mut buf = Vec::with_capacity(input.len() + 2);
    escape_bytes(input.as_bytes(), opts, ctx, &mut buf)?;
    let escaped = String::from_utf8(buf).map_err(|e| {
        Error::client(ClientErrorKind::InvalidEncoding, e.to_string())
    })?;
    output.push_str(&escaped);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::{ASCII, LATIN1};
    use mywire_core::ErrorCode;

    fn escaped(input: &str, backslash_escapes: bool, ctx: QuotingContext) -> String {
        let mut out = String::new();
        let opts = FormatOptions {
            charset: UTF8MB4,
            backslash_escapes,
        };
        escape_string(input, opts, ctx, &mut out).unwrap();
        out
    }

    #[test]
    fn test_backslash_escapes() {
        let ctx = QuotingContext::SingleQuote;
        assert_eq!(escaped("plain", true, ctx), "plain");
        assert_eq!(escaped("it's", true, ctx), "it\\'s");
        assert_eq!(escaped("say \"hi\"", true, ctx), "say \\\"hi\\\"");
        assert_eq!(escaped("a\\b", true, ctx), "a\\\\b");
        assert_eq!(escaped("\0\n\r\x1a", true, ctx), "\\0\\n\\r\\Z");
        assert_eq!(escaped("back`tick", true, ctx), "back`tick");
        assert_eq!(escaped("ünïcode'", true, ctx), "ünïcode\\'");
    }

    #[test]
    fn test_quote_doubling() {
        assert_eq!(
            escaped("it's \"x\" \\", false, QuotingContext::SingleQuote),
            "it''s \"x\" \\"
        );
        assert_eq!(
            escaped("it's \"x\"", false, QuotingContext::DoubleQuote),
            "it's \"\"x\"\""
        );
        // Backticks never use backslashes
        assert_eq!(escaped("a`b\\'", true, QuotingContext::Backtick), "a``b\\'");
    }

    #[test]
    fn test_invalid_encoding() {
        let mut out = b"x = '".to_vec();
        let err = escape_bytes(
            b"it's\xC3",
            FormatOptions::default(),
            QuotingContext::SingleQuote,
            &mut out,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Client(ClientErrorKind::InvalidEncoding));
        // The escaped prefix is rolled back
        assert_eq!(out, b"x = '");

        let mut out = String::from("ab");
        let ascii = FormatOptions {
            charset: ASCII,
            backslash_escapes: true,
        };
        assert!(escape_string("c'é", ascii, QuotingContext::SingleQuote, &mut out).is_err());
        assert_eq!(out, "ab");
    }

    #[test]
    fn test_single_byte_charset_escapes_every_byte() {
        // latin1 treats each byte on its own, so 0x5C after 0xE5 is a backslash
        let mut out = Vec::new();
        let latin1 = FormatOptions {
            charset: LATIN1,
            backslash_escapes: true,
        };
        escape_bytes(&[0xE5, 0x5C], latin1, QuotingContext::SingleQuote, &mut out).unwrap();
        assert_eq!(out, [0xE5, b'\\', b'\\']);
    }
}
