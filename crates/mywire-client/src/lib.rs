//! MySQL client wire protocol.
//!
//! This crate implements the MySQL client/server protocol from scratch. It
//! provides:
//!
//! - Frame layer with sequence numbers and resumable writes
//! - Authentication (mysql_native_password, caching_sha2_password,
//!   sha256_password, mysql_clear_password) and optional TLS
//! - Text and binary (prepared statement) result decoding
//! - Row streaming, multi-result sets and fully buffered results
//! - A blocking [`Connection`] and an asupersync [`AsyncConnection`] that
//!   run the same protocol state machines
//! - String escaping and [`format_sql`] for composing queries client-side
//!
//! # MySQL Protocol Overview
//!
//! MySQL uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Messages of 16MB or more are split over several frames
//! - Request/response pairing via sequence numbers
//!
//! # Example
//!
//! ```rust,ignore
//! use mywire_client::{Connection, ExecutionState, MySqlConfig};
//!
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut conn = Connection::connect(config)?;
//! let mut st = ExecutionState::new();
//! conn.start_query("SELECT id, name FROM users", &mut st)?;
//! while let Some(row) = conn.read_one_row(&mut st)? {
//!     println!("{:?}", row.to_row());
//! }
//! conn.close();
//! ```

pub mod async_connection;
pub mod auth;
pub mod channel;
pub mod charset;
pub mod codec;
pub mod config;
pub mod connection;
pub mod escape;
pub mod execution;
pub mod format;
mod ops;
pub mod protocol;
pub mod tls;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use async_connection::AsyncConnection;
pub use channel::ChannelStatus;
pub use charset::CharacterSet;
pub use codec::Encoding;
pub use config::{MySqlConfig, SslMode, TlsConfig};
pub use connection::Connection;
pub use escape::{FormatOptions, QuotingContext, escape_string};
pub use execution::{ExecutionState, Phase, ResultSet, Results};
pub use format::{FormatContext, FormatSql, Identifier, format_sql, format_sql_to};
pub use protocol::{OkPacket, Statement};
pub use transport::{AsyncStream, AsyncTransport, Stream, Transport};
pub use types::{ColumnMeta, FieldType, ValueClass};

pub use mywire_core::{
    Cx, Date, DateTime, Error, ErrorCode, FieldView, Outcome, Result, Row, RowSet, RowView, Time,
    Value,
};
