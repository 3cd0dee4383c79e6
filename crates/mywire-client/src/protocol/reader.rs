//! MySQL message reading utilities.
//!
//! [`PacketReader`] walks a fully reassembled message body. Every read is
//! bounds-checked and fails with an "incomplete message" protocol error
//! when the message is shorter than its layout requires; [`PacketReader::finish`]
//! reports bytes left over once a message has been fully parsed.

use mywire_core::{Error, ProtocolErrorKind, Result};

use crate::protocol::{EofPacket, ErrPacket, OkPacket};

/// A reader for MySQL protocol data.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Create a new reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Get remaining bytes in the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if we've reached the end of the data.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Fail if any byte is left unread.
    pub fn finish(&self, what: &str) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::extra_bytes(what, n)),
        }
    }

    fn take<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self, what: &str) -> Result<u8> {
        let byte = self.data.get(self.pos).ok_or_else(|| Error::incomplete(what))?;
        self.pos += 1;
        Ok(*byte)
    }

    /// Read a u16 (little-endian).
    pub fn read_u16_le(&mut self, what: &str) -> Result<u16> {
        self.take::<2>(what).map(u16::from_le_bytes)
    }

    /// Read a u24 (little-endian, 3 bytes).
    pub fn read_u24_le(&mut self, what: &str) -> Result<u32> {
        let b = self.take::<3>(what)?;
        Ok(u32::from(b[0]) | (u32::from(b[1]) << 8) | (u32::from(b[2]) << 16))
    }

    /// Read a u32 (little-endian).
    pub fn read_u32_le(&mut self, what: &str) -> Result<u32> {
        self.take::<4>(what).map(u32::from_le_bytes)
    }

    /// Read a u64 (little-endian).
    pub fn read_u64_le(&mut self, what: &str) -> Result<u64> {
        self.take::<8>(what).map(u64::from_le_bytes)
    }

    pub fn read_f32_le(&mut self, what: &str) -> Result<f32> {
        self.take::<4>(what).map(f32::from_le_bytes)
    }

    pub fn read_f64_le(&mut self, what: &str) -> Result<f64> {
        self.take::<8>(what).map(f64::from_le_bytes)
    }

    /// Read a length-encoded integer.
    ///
    /// MySQL uses a variable-length integer encoding:
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    ///
    /// 0xFB (NULL in text rows) and 0xFF are not integers; callers that
    /// accept NULL must check for 0xFB with [`peek`](Self::peek) first.
    pub fn read_lenenc_int(&mut self, what: &str) -> Result<u64> {
        let first = self.read_u8(what)?;
        match first {
            0x00..=0xFA => Ok(u64::from(first)),
            0xFC => self.read_u16_le(what).map(u64::from),
            0xFD => self.read_u24_le(what).map(u64::from),
            0xFE => self.read_u64_le(what),
            0xFB | 0xFF => Err(Error::protocol(
                ProtocolErrorKind::InvalidValue,
                format!("invalid length-encoded integer marker 0x{first:02X} in {what}"),
            )),
        }
    }

    /// Read a length-encoded byte slice.
    pub fn read_lenenc_bytes(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.read_lenenc_int(what)?;
        let len = usize::try_from(len).map_err(|_| Error::incomplete(what))?;
        self.read_bytes(len, what)
    }

    /// Read a length-encoded string, replacing invalid UTF-8.
    pub fn read_lenenc_string(&mut self, what: &str) -> Result<String> {
        self.read_lenenc_bytes(what)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Read a null-terminated byte string. The terminator is required.
    pub fn read_null_bytes(&mut self, what: &str) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::incomplete(what))?;
        self.pos += nul + 1;
        Ok(&rest[..nul])
    }

    /// Read a null-terminated string.
    pub fn read_null_string(&mut self, what: &str) -> Result<String> {
        self.read_null_bytes(what)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Read a fixed-length string.
    pub fn read_string(&mut self, len: usize, what: &str) -> Result<String> {
        let bytes = self.read_bytes(len, what)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read remaining data as a string.
    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::incomplete(what));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Read remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        rest
    }

    /// Skip a number of bytes.
    pub fn skip(&mut self, n: usize, what: &str) -> Result<()> {
        self.read_bytes(n, what).map(|_| ())
    }

    /// Parse an OK packet from the current position.
    ///
    /// OK packet format (protocol 4.1+):
    /// - 0x00 or 0xFE header
    /// - affected_rows: lenenc int
    /// - last_insert_id: lenenc int
    /// - status_flags: 2 bytes
    /// - warnings: 2 bytes
    /// - info: rest of packet (optional)
    pub fn parse_ok_packet(&mut self) -> Result<OkPacket> {
        if matches!(self.peek(), Some(0x00 | 0xFE)) {
            self.pos += 1;
        }

        let affected_rows = self.read_lenenc_int("OK packet")?;
        let last_insert_id = self.read_lenenc_int("OK packet")?;
        let status_flags = self.read_u16_le("OK packet")?;
        let warnings = self.read_u16_le("OK packet")?;
        let info = self.read_rest_string();

        Ok(OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }

    /// Parse an Error packet from the current position.
    ///
    /// ERR packet format (protocol 4.1+):
    /// - 0xFF header
    /// - error_code: 2 bytes
    /// - '#' marker
    /// - sql_state: 5 bytes
    /// - error_message: rest of packet
    pub fn parse_err_packet(&mut self) -> Result<ErrPacket> {
        if self.peek() == Some(0xFF) {
            self.pos += 1;
        }

        let error_code = self.read_u16_le("ERR packet")?;

        // Check for '#' marker (SQL state follows)
        let sql_state = if self.peek() == Some(b'#') {
            self.pos += 1;
            self.read_string(5, "ERR packet")?
        } else {
            String::new()
        };

        let error_message = self.read_rest_string();

        Ok(ErrPacket {
            error_code,
            sql_state,
            error_message,
        })
    }

    /// Parse an EOF packet from the current position.
    ///
    /// EOF packet format:
    /// - 0xFE header
    /// - warnings: 2 bytes
    /// - status_flags: 2 bytes
    pub fn parse_eof_packet(&mut self) -> Result<EofPacket> {
        if self.peek() == Some(0xFE) {
            self.pos += 1;
        }

        let warnings = self.read_u16_le("EOF packet")?;
        let status_flags = self.read_u16_le("EOF packet")?;

        Ok(EofPacket {
            warnings,
            status_flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mywire_core::ErrorCode;

    #[test]
    fn test_read_u8() {
        let mut reader = PacketReader::new(&[0x42, 0x43]);
        assert_eq!(reader.read_u8("t").unwrap(), 0x42);
        assert_eq!(reader.read_u8("t").unwrap(), 0x43);
        assert_eq!(
            reader.read_u8("t").unwrap_err().code(),
            ErrorCode::Protocol(ProtocolErrorKind::IncompleteMessage)
        );
    }

    #[test]
    fn test_read_fixed_width_ints() {
        let mut reader = PacketReader::new(&[0x34, 0x12, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u16_le("t").unwrap(), 0x1234);
        assert_eq!(reader.read_u24_le("t").unwrap(), 0x0012_3456);

        let mut reader = PacketReader::new(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u32_le("t").unwrap(), 0x1234_5678);

        let mut reader = PacketReader::new(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(reader.read_u64_le("t").unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn test_read_lenenc_int() {
        let mut reader = PacketReader::new(&[0x42]);
        assert_eq!(reader.read_lenenc_int("t").unwrap(), 0x42);

        let mut reader = PacketReader::new(&[0xFC, 0x34, 0x12]);
        assert_eq!(reader.read_lenenc_int("t").unwrap(), 0x1234);

        let mut reader = PacketReader::new(&[0xFD, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_lenenc_int("t").unwrap(), 0x0012_3456);

        let mut reader = PacketReader::new(&[0xFE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(reader.read_lenenc_int("t").unwrap(), 0x0807_0605_0403_0201);

        let mut reader = PacketReader::new(&[0xFB]);
        assert!(reader.read_lenenc_int("t").is_err());

        let mut reader = PacketReader::new(&[0xFD, 0x56]);
        assert_eq!(
            reader.read_lenenc_int("t").unwrap_err().code(),
            ErrorCode::Protocol(ProtocolErrorKind::IncompleteMessage)
        );
    }

    #[test]
    fn test_read_null_string() {
        let mut reader = PacketReader::new(b"hello\0world\0");
        assert_eq!(reader.read_null_string("t").unwrap(), "hello");
        assert_eq!(reader.read_null_string("t").unwrap(), "world");
        assert!(reader.is_empty());

        let mut reader = PacketReader::new(b"unterminated");
        assert!(reader.read_null_string("t").is_err());
    }

    #[test]
    fn test_read_lenenc_bytes_truncated() {
        let mut reader = PacketReader::new(&[0x05, b'h', b'e']);
        assert!(reader.read_lenenc_bytes("t").is_err());

        let mut reader = PacketReader::new(&[0x05, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(reader.read_lenenc_string("t").unwrap(), "hello");
    }

    #[test]
    fn test_finish_reports_extra_bytes() {
        let mut reader = PacketReader::new(&[1, 2, 3]);
        reader.read_u8("t").unwrap();
        assert_eq!(
            reader.finish("test").unwrap_err().code(),
            ErrorCode::Protocol(ProtocolErrorKind::ExtraBytes)
        );
        reader.skip(2, "t").unwrap();
        assert!(reader.finish("test").is_ok());
    }

    #[test]
    fn test_parse_ok_packet() {
        // OK packet: affected_rows=1, last_insert_id=42, status=2, warnings=0
        let data = [0x00, 0x01, 0x2A, 0x02, 0x00, 0x00, 0x00];
        let mut reader = PacketReader::new(&data);
        let ok = reader.parse_ok_packet().unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.last_insert_id, 42);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.warnings, 0);
        assert!(ok.info.is_empty());
    }

    #[test]
    fn test_parse_ok_packet_with_info() {
        let mut data = vec![0x00, 0x03, 0x00, 0x22, 0x00, 0x01, 0x00];
        data.extend_from_slice(b"Rows matched: 3  Changed: 3  Warnings: 1");
        let ok = PacketReader::new(&data).parse_ok_packet().unwrap();
        assert_eq!(ok.affected_rows, 3);
        assert_eq!(ok.status_flags, 0x22);
        assert_eq!(ok.warnings, 1);
        assert_eq!(ok.info, "Rows matched: 3  Changed: 3  Warnings: 1");
    }

    #[test]
    fn test_parse_err_packet() {
        // ERR packet: error_code=1045, sql_state=28000, message="Access denied"
        let mut data = vec![0xFF, 0x15, 0x04, b'#'];
        data.extend_from_slice(b"28000");
        data.extend_from_slice(b"Access denied");
        let mut reader = PacketReader::new(&data);
        let err = reader.parse_err_packet().unwrap();
        assert_eq!(err.error_code, 1045);
        assert_eq!(err.sql_state, "28000");
        assert_eq!(err.error_message, "Access denied");
    }

    #[test]
    fn test_parse_eof_packet() {
        // EOF packet: warnings=0, status=2
        let data = [0xFE, 0x00, 0x00, 0x02, 0x00];
        let mut reader = PacketReader::new(&data);
        let eof = reader.parse_eof_packet().unwrap();
        assert_eq!(eof.warnings, 0);
        assert_eq!(eof.status_flags, 2);
    }
}
