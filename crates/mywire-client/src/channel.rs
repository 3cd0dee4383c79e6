//! Sans-io channel state shared by the blocking and async drivers.
//!
//! A protocol exchange is an [`Operation`]: a state machine that is resumed
//! with the channel and answers what it needs next. The driver performs that
//! step (read some bytes, flush the prepared message, upgrade to TLS) and
//! resumes the operation again until it reports [`Next::Done`]. Neither the
//! operations nor the channel block or await, so both drivers run the exact
//! same code against the same bytes.

use mywire_core::{ClientErrorKind, ConnectionErrorKind, Error, Result, RowSet};

use crate::charset::CharacterSet;
use crate::config::MySqlConfig;
use crate::escape::FormatOptions;
use crate::protocol::{MessageReader, MessageWriter, OkPacket, PacketWriter, capabilities};

/// What an operation needs from the driver before it can continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Next {
    /// Read more bytes into the message reader.
    Read,
    /// Write the prepared message completely.
    Write,
    /// Upgrade the transport to TLS.
    TlsHandshake,
    Done,
}

pub(crate) trait Operation {
    fn resume(&mut self, chan: &mut ChannelCore) -> Result<Next>;
}

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Never connected, or closed.
    Disconnected,
    /// Connection phase in progress.
    Handshaking,
    /// Ready for a new command.
    Idle,
    /// Rows of the current result set are pending.
    ReadingRows,
    /// The current result set is done and the server announced another.
    ReadingHead,
    /// A fatal error or a cancellation left the stream in an unknown
    /// position. Only `close` is accepted.
    Broken,
}

/// Everything a channel owns besides its transport.
#[derive(Debug)]
pub struct ChannelCore {
    pub(crate) reader: MessageReader,
    pub(crate) writer: MessageWriter,
    /// Sequence number expected on the next frame, in either direction.
    pub(crate) seqnum: u8,
    pub(crate) status: ChannelStatus,
    pub(crate) capabilities: u32,
    pub(crate) backslash_escapes: bool,
    pub(crate) charset: Option<CharacterSet>,
    pub(crate) connection_id: u32,
    pub(crate) server_version: String,
    pub(crate) secure: bool,
    /// Rows of the last batch; reused by every row read.
    pub(crate) rows: RowSet,
}

impl ChannelCore {
    pub(crate) fn new(config: &MySqlConfig) -> Self {
        Self {
            reader: MessageReader::new(config.read_buffer_size, config.max_packet_size as usize),
            writer: MessageWriter::default(),
            seqnum: 0,
            status: ChannelStatus::Disconnected,
            capabilities: 0,
            backslash_escapes: true,
            charset: config.character_set(),
            connection_id: 0,
            server_version: String::new(),
            secure: false,
            rows: RowSet::default(),
        }
    }

    /// Try to complete a message from buffered bytes.
    ///
    /// On `true` the message is in `self.reader.message()` until the next
    /// call.
    pub(crate) fn read_message(&mut self) -> Result<bool> {
        self.reader.try_parse(&mut self.seqnum)
    }

    /// Every command starts a new sequence.
    pub(crate) fn start_command(&mut self) {
        self.seqnum = 0;
    }

    /// Serialize a message for the driver to write, continuing the current
    /// sequence.
    pub(crate) fn write_message<F>(&mut self, serialize: F)
    where
        F: FnOnce(&mut PacketWriter<'_>),
    {
        self.writer.prepare_write(self.seqnum, serialize);
        self.seqnum = self.writer.next_seqnum();
    }

    pub(crate) fn deprecate_eof(&self) -> bool {
        self.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0
    }

    /// Apply the status flags of an OK or EOF packet.
    pub(crate) fn on_ok(&mut self, ok: &OkPacket) {
        self.backslash_escapes = !ok.no_backslash_escapes();
    }

    pub(crate) fn mark_broken(&mut self) {
        if self.status != ChannelStatus::Broken {
            tracing::debug!(status = ?self.status, "channel marked broken");
        }
        self.status = ChannelStatus::Broken;
        self.reader.reset();
    }

    /// Can a new command be sent?
    pub(crate) fn check_idle(&self) -> Result<()> {
        match self.status {
            ChannelStatus::Idle => Ok(()),
            ChannelStatus::ReadingRows | ChannelStatus::ReadingHead => Err(Error::client(
                ClientErrorKind::OperationInProgress,
                "the previous result has not been read completely",
            )),
            ChannelStatus::Disconnected | ChannelStatus::Handshaking | ChannelStatus::Broken => {
                Err(self.not_connected())
            }
        }
    }

    pub(crate) fn check_status(&self, expected: ChannelStatus) -> Result<()> {
        if self.status == expected {
            return Ok(());
        }
        match self.status {
            ChannelStatus::Disconnected | ChannelStatus::Handshaking | ChannelStatus::Broken => {
                Err(self.not_connected())
            }
            _ => Err(Error::client(
                ClientErrorKind::OperationInProgress,
                format!(
                    "channel is {:?} but the operation needs {:?}",
                    self.status, expected
                ),
            )),
        }
    }

    fn not_connected(&self) -> Error {
        Error::client(
            ClientErrorKind::NotConnected,
            format!("channel is {:?}", self.status),
        )
    }

    /// Options for escaping and `format_sql` that match this session.
    pub(crate) fn format_options(&self) -> Result<FormatOptions> {
        let charset = self.charset.ok_or_else(|| {
            Error::client(
                ClientErrorKind::Unsupported,
                "the connection collation has no known character set",
            )
        })?;
        Ok(FormatOptions {
            charset,
            backslash_escapes: self.backslash_escapes,
        })
    }
}

pub(crate) fn disconnected() -> Error {
    Error::connection(
        ConnectionErrorKind::Disconnected,
        "server closed the connection",
    )
}

/// A transport call cut short by a signal; it moved no bytes and is retried.
pub(crate) fn interrupted(e: &Error) -> bool {
    matches!(e, Error::Io(io) if io.kind() == std::io::ErrorKind::Interrupted)
}

pub(crate) fn write_zero() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::WriteZero,
        "transport accepted no bytes",
    ))
}
