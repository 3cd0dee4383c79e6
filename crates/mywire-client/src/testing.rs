//! Fixtures shared by the unit tests: column metadata and scripted server
//! messages.

use crate::protocol::PacketWriter;
use crate::types::{ColumnMeta, FieldType, column_flags};

/// Column metadata with only the type and signedness set.
pub(crate) fn column(column_type: FieldType, unsigned: bool) -> ColumnMeta {
    ColumnMeta {
        catalog: "def".to_string(),
        schema: String::new(),
        table: String::new(),
        org_table: String::new(),
        name: String::new(),
        org_name: String::new(),
        collation: 63,
        column_length: 0,
        column_type,
        flags: if unsigned { column_flags::UNSIGNED } else { 0 },
        decimals: 0,
    }
}

/// A column definition message for `mydb.t.<name>`.
pub(crate) fn column_def_bytes(name: &str, column_type: FieldType, flags: u16) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut w = PacketWriter::new(&mut buf);
    for part in ["def", "mydb", "t", "t", name, name] {
        w.write_lenenc_string(part);
    }
    w.write_u8(0x0c);
    w.write_u16_le(33);
    w.write_u32_le(11);
    w.write_u8(column_type as u8);
    w.write_u16_le(flags);
    w.write_u8(0);
    w.write_zeros(2);
    buf
}

/// Server side of a conversation.
pub(crate) mod server {
    use super::*;
    use crate::protocol::capabilities::*;

    pub(crate) const CONNECTION_ID: u32 = 77;
    pub(crate) const SCRAMBLE: [u8; 20] = *b"abcdefghijklmnopqrst";

    pub(crate) const CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_PROTOCOL_41
        | CLIENT_SSL
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_STATEMENTS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PS_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_CONNECT_ATTRS
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_DEPRECATE_EOF;

    /// Wrap `payload` in a single frame.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
        let len = payload.len() as u32;
        let mut out = len.to_le_bytes()[..3].to_vec();
        out.push(seq);
        out.extend_from_slice(payload);
        out
    }

    /// Protocol v10 greeting announcing `plugin`.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn greeting(plugin: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = PacketWriter::new(&mut buf);
        w.write_u8(10);
        w.write_null_string("8.0.36");
        w.write_u32_le(CONNECTION_ID);
        w.write_bytes(&SCRAMBLE[..8]);
        w.write_u8(0);
        w.write_u16_le((CAPABILITIES & 0xFFFF) as u16);
        w.write_u8(45);
        w.write_u16_le(0x0002);
        w.write_u16_le((CAPABILITIES >> 16) as u16);
        w.write_u8(21);
        w.write_zeros(10);
        w.write_bytes(&SCRAMBLE[8..]);
        w.write_u8(0);
        w.write_null_string(plugin);
        buf
    }

    pub(crate) fn ok(affected_rows: u64, last_insert_id: u64, status: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = PacketWriter::new(&mut buf);
        w.write_u8(0x00);
        w.write_lenenc_int(affected_rows);
        w.write_lenenc_int(last_insert_id);
        w.write_u16_le(status);
        w.write_u16_le(0);
        buf
    }

    /// OK packet with the 0xFE header that ends rows under DEPRECATE_EOF.
    pub(crate) fn eof_ok(status: u16) -> Vec<u8> {
        let mut buf = ok(0, 0, status);
        buf[0] = 0xFE;
        buf
    }

    /// Legacy EOF packet.
    pub(crate) fn eof(status: u16) -> Vec<u8> {
        let mut buf = vec![0xFE, 0, 0];
        buf.extend_from_slice(&status.to_le_bytes());
        buf
    }

    pub(crate) fn err(code: u16, sqlstate: &str, message: &str) -> Vec<u8> {
        let mut buf = vec![0xFF];
        buf.extend_from_slice(&code.to_le_bytes());
        buf.push(b'#');
        buf.extend_from_slice(sqlstate.as_bytes());
        buf.extend_from_slice(message.as_bytes());
        buf
    }

    /// A text protocol row; `None` is SQL NULL.
    pub(crate) fn text_row(fields: &[Option<&str>]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = PacketWriter::new(&mut buf);
        for field in fields {
            match field {
                Some(text) => w.write_lenenc_string(text),
                None => w.write_u8(0xFB),
            }
        }
        buf
    }

    pub(crate) fn prepare_ok(statement_id: u32, num_columns: u16, num_params: u16) -> Vec<u8> {
        let mut buf = vec![0x00];
        buf.extend_from_slice(&statement_id.to_le_bytes());
        buf.extend_from_slice(&num_columns.to_le_bytes());
        buf.extend_from_slice(&num_params.to_le_bytes());
        buf.push(0);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf
    }

    /// Greeting and OK for a passwordless native-password login.
    pub(crate) fn login() -> Vec<u8> {
        let mut out = frame(0, &greeting("mysql_native_password"));
        out.extend(frame(2, &ok(0, 0, 0x0002)));
        out
    }
}
