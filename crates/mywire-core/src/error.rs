//! Error types for MySQL client operations.
//!
//! Errors fall into five families that differ in how the channel survives them:
//!
//! - [`ClientError`]: detected locally before any byte reaches the wire.
//!   The channel is untouched.
//! - [`ServerError`]: an ERR packet reported by the server. The exchange
//!   completed cleanly, so the channel stays usable.
//! - [`ProtocolError`]: malformed frames, out-of-range values, sequence
//!   desynchronization. The channel position is unknown and must be closed.
//! - [`ConnectionError`] and [`Error::Io`]: transport, TLS and authentication
//!   failures. Also fatal to the channel.
//! - [`Error::Cancelled`]: a pending I/O was abandoned mid-flight.

use std::fmt;

/// The primary error type for all client operations.
#[derive(Debug)]
pub enum Error {
    /// Validation failures detected before any network I/O
    Client(ClientError),
    /// Wire-level decoding or framing errors
    Protocol(ProtocolError),
    /// Error reported by the server in an ERR packet
    Server(ServerError),
    /// Connection, TLS or authentication errors
    Connection(ConnectionError),
    /// I/O errors from the transport
    Io(std::io::Error),
    /// The operation was cancelled before completing its I/O
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientErrorKind {
    /// Number of bound parameters differs from the statement's declared count
    WrongNumParams,
    /// A string is not valid in the requested character set
    InvalidEncoding,
    /// A value cannot be represented on the wire (e.g. NaN)
    InvalidValue,
    /// The channel is closed, broken or was never connected
    NotConnected,
    /// A result is being read and a new command cannot start yet
    OperationInProgress,
    /// Malformed format string passed to `format_sql`
    InvalidFormatString,
    /// A format placeholder references a missing argument
    FormatArgNotFound,
    /// A row does not match the row set's column count
    RowShape,
    /// The requested feature is not available in this build or transport
    Unsupported,
}

#[derive(Debug, Clone)]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolErrorKind {
    /// Fewer bytes than the message layout requires
    IncompleteMessage,
    /// Bytes left over after a message was fully decoded
    ExtraBytes,
    /// A frame arrived with an unexpected sequence number
    SequenceNumberMismatch,
    /// A decoded field exceeds its absolute range
    ValueOutOfRange,
    /// A field could not be interpreted (bad text number, NaN, ...)
    InvalidValue,
    /// A message type that is not valid at this point of the exchange
    UnexpectedMessage,
    /// The server lacks a capability this client requires
    ServerUnsupported,
    /// A reassembled message exceeds the configured maximum size
    MessageTooLarge,
}

/// Error packet contents sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionErrorKind {
    /// Failed to establish the transport connection
    Connect,
    /// The remote host refused the connection
    Refused,
    /// Host name resolution failed
    DnsResolution,
    /// Credentials were rejected or the exchange failed
    Authentication,
    /// The server asked for an authentication plugin we don't implement
    UnknownAuthPlugin,
    /// TLS negotiation failed or TLS is required but unavailable
    Ssl,
    /// The peer closed the stream
    Disconnected,
}

/// Flat, comparable view of an [`Error`].
///
/// `Result<T, Error>` carries the full error; `ErrorCode` is the equivalent
/// code-based report for callers that only branch on the condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Client(ClientErrorKind),
    Protocol(ProtocolErrorKind),
    Server(u16),
    Connection(ConnectionErrorKind),
    Io(std::io::ErrorKind),
    Cancelled,
}

/// Well-known server error codes.
pub mod server_codes {
    /// ER_BAD_FIELD_ERROR
    pub const BAD_FIELD_ERROR: u16 = 1054;
    /// ER_DUP_ENTRY
    pub const DUP_ENTRY: u16 = 1062;
    /// ER_PARSE_ERROR
    pub const PARSE_ERROR: u16 = 1064;
    /// ER_NO_SUCH_TABLE
    pub const NO_SUCH_TABLE: u16 = 1146;
    /// ER_ROW_IS_REFERENCED_2
    pub const ROW_IS_REFERENCED: u16 = 1451;
    /// ER_NO_REFERENCED_ROW_2
    pub const NO_REFERENCED_ROW: u16 = 1452;
    /// ER_TRUNCATED_WRONG_VALUE
    pub const TRUNCATED_WRONG_VALUE: u16 = 1292;
    /// ER_ACCESS_DENIED_ERROR
    pub const ACCESS_DENIED: u16 = 1045;
    /// ER_LOCK_DEADLOCK
    pub const LOCK_DEADLOCK: u16 = 1213;
}

impl Error {
    /// Build a client-side validation error.
    pub fn client(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Error::Client(ClientError {
            kind,
            message: message.into(),
        })
    }

    /// Build a protocol error.
    pub fn protocol(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            kind,
            message: message.into(),
        })
    }

    /// Build a connection error without an underlying source.
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::Connection(ConnectionError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Shorthand for an "incomplete message" protocol error.
    pub fn incomplete(what: &str) -> Self {
        Self::protocol(
            ProtocolErrorKind::IncompleteMessage,
            format!("incomplete message while reading {what}"),
        )
    }

    /// Shorthand for an "extra bytes" protocol error.
    pub fn extra_bytes(what: &str, remaining: usize) -> Self {
        Self::protocol(
            ProtocolErrorKind::ExtraBytes,
            format!("{remaining} extra bytes after {what}"),
        )
    }

    /// Does this error leave the channel in an unknown protocol position?
    ///
    /// Fatal errors require closing and reconnecting. Client validation
    /// errors and server-reported errors keep the channel usable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Client(_) | Error::Server(_) => false,
            Error::Protocol(_) | Error::Connection(_) | Error::Io(_) | Error::Cancelled => true,
        }
    }

    /// Code-based view of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Client(e) => ErrorCode::Client(e.kind),
            Error::Protocol(e) => ErrorCode::Protocol(e.kind),
            Error::Server(e) => ErrorCode::Server(e.code),
            Error::Connection(e) => ErrorCode::Connection(e.kind),
            Error::Io(e) => ErrorCode::Io(e.kind()),
            Error::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// The server error payload, if this is a server error.
    pub fn as_server(&self) -> Option<&ServerError> {
        match self {
            Error::Server(e) => Some(e),
            _ => None,
        }
    }

    /// Get SQLSTATE if available (e.g., "42S02" for a missing table)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(e) => Some(e.sql_state.as_str()),
            _ => None,
        }
    }
}

impl ServerError {
    /// Did the statement reference a table that does not exist?
    pub fn is_no_such_table(&self) -> bool {
        self.code == server_codes::NO_SUCH_TABLE
    }

    /// Did the statement reference an unknown column?
    pub fn is_bad_field(&self) -> bool {
        self.code == server_codes::BAD_FIELD_ERROR
    }

    /// Check if this is a duplicate key error.
    pub fn is_duplicate_key(&self) -> bool {
        self.code == server_codes::DUP_ENTRY
    }

    /// Check if this is a foreign key constraint violation.
    pub fn is_foreign_key_violation(&self) -> bool {
        self.code == server_codes::ROW_IS_REFERENCED || self.code == server_codes::NO_REFERENCED_ROW
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Client(e) => write!(f, "Client error: {}", e.message),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Server(e) => write!(
                f,
                "Server error {} (SQLSTATE {}): {}",
                e.code, e.sql_state, e.message
            ),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.sql_state)
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ClientError> for Error {
    fn from(err: ClientError) -> Self {
        Error::Client(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_helpers() {
        let err = ServerError {
            code: server_codes::NO_SUCH_TABLE,
            sql_state: "42S02".to_string(),
            message: "Table 'db.bad_table' doesn't exist".to_string(),
        };
        assert!(err.is_no_such_table());
        assert!(!err.is_bad_field());

        let err = Error::Server(err);
        assert_eq!(err.sqlstate(), Some("42S02"));
        assert_eq!(err.code(), ErrorCode::Server(1146));
        assert!(!err.is_fatal());
    }

    #[test]
    fn fatal_classification() {
        assert!(!Error::client(ClientErrorKind::WrongNumParams, "x").is_fatal());
        assert!(Error::incomplete("row").is_fatal());
        assert!(Error::connection(ConnectionErrorKind::Disconnected, "gone").is_fatal());
        assert!(Error::Cancelled.is_fatal());
        assert!(
            Error::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe")).is_fatal()
        );
    }

    #[test]
    fn codes_match_kinds() {
        let err = Error::extra_bytes("binary row", 3);
        assert_eq!(
            err.code(),
            ErrorCode::Protocol(ProtocolErrorKind::ExtraBytes)
        );
        assert_eq!(err.to_string(), "Protocol error: 3 extra bytes after binary row");

        let err = Error::client(ClientErrorKind::InvalidEncoding, "bad utf-8");
        assert_eq!(
            err.code(),
            ErrorCode::Client(ClientErrorKind::InvalidEncoding)
        );
    }

    #[test]
    fn foreign_key_codes() {
        for code in [1451, 1452] {
            let err = ServerError {
                code,
                sql_state: "23000".to_string(),
                message: String::new(),
            };
            assert!(err.is_foreign_key_violation());
        }
    }
}
