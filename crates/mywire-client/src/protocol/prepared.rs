//! MySQL prepared statement (binary protocol) messages.
//!
//! This module implements the message bodies of COM_STMT_PREPARE,
//! COM_STMT_EXECUTE, COM_STMT_CLOSE and COM_STMT_RESET, and the statement
//! handle built from the prepare response.
//!
//! # Protocol Flow
//!
//! 1. **Prepare**: Client sends COM_STMT_PREPARE with SQL
//!    - Server returns statement ID, param count, column count
//!    - Server sends param column definitions (if any)
//!    - Server sends result column definitions (if any)
//!
//! 2. **Execute**: Client sends COM_STMT_EXECUTE with statement ID + binary params
//!    - Server returns result set (binary protocol) or OK packet
//!
//! 3. **Close**: Client sends COM_STMT_CLOSE with statement ID
//!    - No server response
//!
//! # References
//!
//! - [COM_STMT_PREPARE](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_stmt_prepare.html)
//! - [COM_STMT_EXECUTE](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_stmt_execute.html)

#![allow(clippy::cast_possible_truncation)]

use mywire_core::{ClientErrorKind, Error, ProtocolErrorKind, Result, Value};

use super::{Command, PacketReader, PacketWriter};
use crate::codec::binary::{null_bitmap_len, validate_param, write_param, write_param_type};
use crate::types::ColumnMeta;

/// Response from COM_STMT_PREPARE.
///
/// This is sent by the server after successfully preparing a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    /// Unique statement identifier (used in execute/close)
    pub statement_id: u32,
    /// Number of columns in result set (0 for non-SELECT)
    pub num_columns: u16,
    /// Number of parameters (placeholders) in the SQL
    pub num_params: u16,
    /// Number of warnings generated during prepare
    pub warnings: u16,
}

/// A server-side prepared statement.
///
/// Holds the server-assigned statement ID and column definitions
/// for both parameters and result columns. The handle stays valid until
/// it is closed or the connection that prepared it is closed or reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    id: u32,
    params: Vec<ColumnMeta>,
    columns: Vec<ColumnMeta>,
}

impl Statement {
    pub(crate) fn new(id: u32, params: Vec<ColumnMeta>, columns: Vec<ColumnMeta>) -> Self {
        Self {
            id,
            params,
            columns,
        }
    }

    /// Server-assigned statement ID.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Get the number of parameters expected.
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// Parameter metadata as reported at prepare time.
    pub fn params(&self) -> &[ColumnMeta] {
        &self.params
    }

    /// Result column metadata as reported at prepare time.
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Check `params` against this statement before anything is sent.
    pub fn check_params(&self, params: &[Value]) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(Error::client(
                ClientErrorKind::WrongNumParams,
                format!(
                    "statement {} expects {} parameters, got {}",
                    self.id,
                    self.params.len(),
                    params.len()
                ),
            ));
        }
        params.iter().try_for_each(validate_param)
    }
}

/// Parse a COM_STMT_PREPARE_OK response.
///
/// # Format
///
/// - Status: 0x00 (1 byte)
/// - Statement ID (4 bytes)
/// - Number of columns (2 bytes)
/// - Number of parameters (2 bytes)
/// - Reserved: 0x00 (1 byte)
/// - Warning count (2 bytes)
/// - Metadata follows flag (1 byte, optional)
pub fn parse_stmt_prepare_ok(data: &[u8]) -> Result<StmtPrepareOk> {
    let mut reader = PacketReader::new(data);
    let status = reader.read_u8("COM_STMT_PREPARE_OK")?;
    if status != 0x00 {
        return Err(Error::protocol(
            ProtocolErrorKind::UnexpectedMessage,
            format!("unexpected COM_STMT_PREPARE response header 0x{status:02x}"),
        ));
    }
    let statement_id = reader.read_u32_le("COM_STMT_PREPARE_OK")?;
    let num_columns = reader.read_u16_le("COM_STMT_PREPARE_OK")?;
    let num_params = reader.read_u16_le("COM_STMT_PREPARE_OK")?;
    reader.skip(1, "COM_STMT_PREPARE_OK")?;
    let warnings = reader.read_u16_le("COM_STMT_PREPARE_OK")?;
    // Trailing metadata-follows byte, sent by servers with optional metadata
    if reader.remaining() == 1 {
        reader.skip(1, "COM_STMT_PREPARE_OK")?;
    }
    reader.finish("COM_STMT_PREPARE_OK")?;

    Ok(StmtPrepareOk {
        statement_id,
        num_columns,
        num_params,
        warnings,
    })
}

/// Write a COM_STMT_PREPARE body.
pub fn write_stmt_prepare(w: &mut PacketWriter<'_>, sql: &str) {
    w.write_u8(Command::StmtPrepare as u8);
    w.write_bytes(sql.as_bytes());
}

/// Write a COM_STMT_EXECUTE body.
///
/// `params` must already have passed [`Statement::check_params`].
///
/// # Binary Protocol Parameter Encoding
///
/// The execute packet format is:
/// - Command byte (0x17)
/// - Statement ID (4 bytes, little-endian)
/// - Flags (1 byte): 0x00 = no cursor
/// - Iteration count (4 bytes, always 1)
/// - NULL bitmap (if num_params > 0)
/// - New params bound flag (1 byte)
/// - Parameter types and values (if new_params_bound = 1)
pub fn write_stmt_execute(w: &mut PacketWriter<'_>, statement_id: u32, params: &[Value]) {
    w.write_u8(Command::StmtExecute as u8);
    w.write_u32_le(statement_id);
    // CURSOR_TYPE_NO_CURSOR
    w.write_u8(0x00);
    w.write_u32_le(1);

    if params.is_empty() {
        return;
    }

    let mut null_bitmap = vec![0u8; null_bitmap_len(params.len(), 0)];
    for (i, param) in params.iter().enumerate() {
        if param.is_null() {
            null_bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    w.write_bytes(&null_bitmap);

    // New params bound: types follow
    w.write_u8(1);
    for param in params {
        write_param_type(param, w);
    }
    for param in params {
        write_param(param, w);
    }
}

/// Write a COM_STMT_CLOSE body. The server does not answer it.
pub fn write_stmt_close(w: &mut PacketWriter<'_>, statement_id: u32) {
    w.write_u8(Command::StmtClose as u8);
    w.write_u32_le(statement_id);
}

/// Write a COM_STMT_RESET body.
pub fn write_stmt_reset(w: &mut PacketWriter<'_>, statement_id: u32) {
    w.write_u8(Command::StmtReset as u8);
    w.write_u32_le(statement_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::column;
    use crate::types::FieldType;
    use mywire_core::ErrorCode;

    fn body(f: impl FnOnce(&mut PacketWriter<'_>)) -> Vec<u8> {
        let mut buf = Vec::new();
        f(&mut PacketWriter::new(&mut buf));
        buf
    }

    fn statement(num_params: usize) -> Statement {
        let params = (0..num_params)
            .map(|_| column(FieldType::VarString, false))
            .collect();
        Statement::new(7, params, Vec::new())
    }

    #[test]
    fn test_stmt_prepare_body() {
        let packet = body(|w| write_stmt_prepare(w, "SELECT * FROM users WHERE id = ?"));
        assert_eq!(packet[0], Command::StmtPrepare as u8);
        assert_eq!(&packet[1..], b"SELECT * FROM users WHERE id = ?");
    }

    #[test]
    fn test_stmt_close_and_reset_bodies() {
        assert_eq!(body(|w| write_stmt_close(w, 42)), [0x19, 42, 0, 0, 0]);
        assert_eq!(body(|w| write_stmt_reset(w, 42)), [0x1a, 42, 0, 0, 0]);
    }

    #[test]
    fn test_parse_stmt_prepare_ok() {
        let data = [
            0x00, // status
            0x01, 0x00, 0x00, 0x00, // statement_id = 1
            0x03, 0x00, // num_columns = 3
            0x02, 0x00, // num_params = 2
            0x00, // reserved
            0x05, 0x00, // warnings = 5
        ];

        let result = parse_stmt_prepare_ok(&data).unwrap();
        assert_eq!(result.statement_id, 1);
        assert_eq!(result.num_columns, 3);
        assert_eq!(result.num_params, 2);
        assert_eq!(result.warnings, 5);

        let mut with_flag = data.to_vec();
        with_flag.push(0x01);
        assert_eq!(parse_stmt_prepare_ok(&with_flag).unwrap(), result);
    }

    #[test]
    fn test_parse_stmt_prepare_ok_invalid() {
        assert!(parse_stmt_prepare_ok(&[0x00, 0x01]).is_err());

        let data = [
            0xFF, 0x01, 0x00, 0x00, 0x00, 0x03, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00,
        ];
        assert!(parse_stmt_prepare_ok(&data).is_err());

        let mut long = vec![0u8; 12];
        long.extend_from_slice(&[1, 2]);
        assert!(parse_stmt_prepare_ok(&long).is_err());
    }

    #[test]
    fn test_stmt_execute_no_params() {
        let packet = body(|w| write_stmt_execute(w, 1, &[]));
        assert_eq!(packet, [0x17, 1, 0, 0, 0, 0x00, 1, 0, 0, 0]);
    }

    #[test]
    fn test_stmt_execute_with_params() {
        let params = vec![Value::Int(42), Value::from("hello")];
        let packet = body(|w| write_stmt_execute(w, 1, &params));

        assert_eq!(packet[0], Command::StmtExecute as u8);
        // NULL bitmap (1 byte for 2 params), then new-params-bound
        assert_eq!(packet[10], 0x00);
        assert_eq!(packet[11], 0x01);
        // Types: LONGLONG for Int, STRING for bytes
        assert_eq!(&packet[12..16], [0x08, 0x00, 0xFE, 0x00]);
        assert_eq!(&packet[16..24], 42u64.to_le_bytes());
        assert_eq!(&packet[24..], b"\x05hello");
    }

    #[test]
    fn test_stmt_execute_with_null() {
        let params = vec![Value::Null, Value::Int(42)];
        let packet = body(|w| write_stmt_execute(w, 1, &params));
        assert_eq!(packet[10], 0x01);
        assert_eq!(&packet[12..16], [0x06, 0x00, 0x08, 0x00]);
        // Only the non-NULL value is written
        assert_eq!(packet.len(), 16 + 8);
    }

    #[test]
    fn test_check_params() {
        let stmt = statement(2);
        assert!(stmt.check_params(&[Value::Int(1), Value::Null]).is_ok());
        assert_eq!(
            stmt.check_params(&[Value::Int(1)]).unwrap_err().code(),
            ErrorCode::Client(ClientErrorKind::WrongNumParams)
        );
        assert_eq!(
            stmt.check_params(&[Value::Int(1), Value::Double(f64::NAN)])
                .unwrap_err()
                .code(),
            ErrorCode::Client(ClientErrorKind::InvalidValue)
        );
    }
}
