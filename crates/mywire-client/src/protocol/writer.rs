//! MySQL message writing utilities.
//!
//! [`PacketWriter`] appends protocol data types to a caller-owned buffer,
//! usually the message buffer of a [`MessageWriter`](super::MessageWriter),
//! so a message is serialized straight into the bytes that go on the wire.

#![allow(clippy::cast_possible_truncation)]

/// A writer for MySQL protocol data.
#[derive(Debug)]
pub struct PacketWriter<'a> {
    buffer: &'a mut Vec<u8>,
}

impl<'a> PacketWriter<'a> {
    /// Create a writer appending to `buffer`.
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        Self { buffer }
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes written so far, including anything already in the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Write a u16 (little-endian).
    pub fn write_u16_le(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a u24 (little-endian, 3 bytes).
    pub fn write_u24_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes()[..3]);
    }

    /// Write a u32 (little-endian).
    pub fn write_u32_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a u64 (little-endian).
    pub fn write_u64_le(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32_le(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64_le(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a length-encoded integer.
    ///
    /// MySQL uses a variable-length integer encoding:
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFC + 2 bytes: values up to 2^16
    /// - 0xFD + 3 bytes: values up to 2^24
    /// - 0xFE + 8 bytes: values up to 2^64
    pub fn write_lenenc_int(&mut self, value: u64) {
        if value < 251 {
            self.write_u8(value as u8);
        } else if value < 0x10000 {
            self.write_u8(0xFC);
            self.write_u16_le(value as u16);
        } else if value < 0x0100_0000 {
            self.write_u8(0xFD);
            self.write_u24_le(value as u32);
        } else {
            self.write_u8(0xFE);
            self.write_u64_le(value);
        }
    }

    /// Write a length-encoded string.
    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }

    /// Write a length-encoded byte slice.
    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.buffer.extend_from_slice(data);
    }

    /// Write a null-terminated string.
    pub fn write_null_string(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Write zeros (padding).
    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }
}

/// Length of the length-encoded form of `value`.
pub fn lenenc_int_size(value: u64) -> usize {
    if value < 251 {
        1
    } else if value < 0x10000 {
        3
    } else if value < 0x0100_0000 {
        4
    } else {
        9
    }
}
