//! Core types for the mywire MySQL client.
//!
//! This crate holds the pieces shared by every layer of the client:
//!
//! - [`Value`] and [`FieldView`], the owned and borrowed SQL value model
//! - [`Date`], [`DateTime`] and [`Time`], validated temporal types
//! - [`RowSet`], [`RowView`] and [`Row`] for row storage
//! - [`Error`], the error taxonomy, and its code-based view [`ErrorCode`]
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct async operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod error;
pub mod row;
pub mod temporal;
pub mod value;

pub use error::{
    ClientError, ClientErrorKind, ConnectionError, ConnectionErrorKind, Error, ErrorCode,
    ProtocolError, ProtocolErrorKind, Result, ServerError, server_codes,
};
pub use row::{Checkpoint, Row, RowSet, RowView, Rows};
pub use temporal::{Date, DateTime, Time};
pub use value::{FieldView, Kind, Value};
