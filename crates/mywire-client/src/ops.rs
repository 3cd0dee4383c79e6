//! Protocol exchanges as resumable state machines.
//!
//! Each type here implements [`Operation`]. `resume` consumes whatever
//! complete messages are buffered, prepares the next message to send, and
//! returns as soon as it needs the driver to move bytes. Preconditions on the
//! channel status are checked by the drivers before an operation starts.

use mywire_core::{ClientErrorKind, Error, ProtocolErrorKind, Result, Value};

use crate::auth::{AuthAction, AuthContext, AuthPlugin};
use crate::channel::{ChannelCore, ChannelStatus, Next, Operation};
use crate::codec::{self, Encoding};
use crate::config::MySqlConfig;
use crate::execution::ExecutionState;
use crate::protocol::handshake::{AuthReply, HandshakeResponse, ServerHello, SslRequest};
use crate::protocol::prepared::{
    Statement, parse_stmt_prepare_ok, write_stmt_close, write_stmt_execute, write_stmt_prepare,
    write_stmt_reset,
};
use crate::protocol::{
    Command, ErrPacket, OkPacket, PacketReader, PacketType, capabilities, write_command, write_query,
};
use crate::tls;
use crate::types::ColumnMeta;

fn unexpected(what: &str, first_byte: Option<u8>) -> Error {
    match first_byte {
        Some(b) => Error::protocol(
            ProtocolErrorKind::UnexpectedMessage,
            format!("unexpected message 0x{b:02X} while reading {what}"),
        ),
        None => Error::incomplete(what),
    }
}

/// Interpret a reply that must be OK or ERR.
fn ok_or_err(msg: &[u8], what: &str) -> Result<OkPacket> {
    match msg.first() {
        Some(0x00) => PacketReader::new(msg).parse_ok_packet(),
        Some(0xFF) => Err(PacketReader::new(msg).parse_err_packet()?.into()),
        other => Err(unexpected(what, other.copied())),
    }
}

/// The result of the current result set has ended: record it and decide
/// whether another result set follows.
fn finish_resultset(chan: &mut ChannelCore, st: &mut ExecutionState, ok: OkPacket) {
    chan.on_ok(&ok);
    chan.status = if ok.more_results() {
        ChannelStatus::ReadingHead
    } else {
        ChannelStatus::Idle
    };
    tracing::debug!(
        affected_rows = ok.affected_rows,
        last_insert_id = ok.last_insert_id,
        warnings = ok.warnings,
        more_results = ok.more_results(),
        "result set complete"
    );
    st.complete(ok);
}

/// The server rejected the statement; the channel stays usable.
fn server_error(chan: &mut ChannelCore, st: &mut ExecutionState, err: ErrPacket) -> Result<Next> {
    chan.status = ChannelStatus::Idle;
    st.fail();
    Err(err.into())
}

// ---------------------------------------------------------------------------
// Connection phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    ReadGreeting,
    StartTls,
    TlsDone,
    SendResponse,
    ReadAuthReply,
    Done,
}

/// Greeting, optional TLS upgrade, handshake response and the
/// authentication exchange.
pub(crate) struct Handshake<'a> {
    config: &'a MySqlConfig,
    tls_supported: bool,
    state: HandshakeState,
    plugin: AuthPlugin,
    scramble: Vec<u8>,
    capabilities: u32,
    collation: u8,
}

impl<'a> Handshake<'a> {
    pub(crate) fn new(config: &'a MySqlConfig, tls_supported: bool) -> Self {
        Self {
            config,
            tls_supported,
            state: HandshakeState::ReadGreeting,
            plugin: AuthPlugin::NativePassword,
            scramble: Vec::new(),
            capabilities: 0,
            collation: 0,
        }
    }

    fn auth_context<'s>(&'s self, secure: bool) -> AuthContext<'s> {
        AuthContext {
            password: self.config.password.as_deref().unwrap_or(""),
            scramble: &self.scramble,
            secure,
            server_public_key: self.config.server_public_key.as_deref(),
        }
    }

    /// Negotiate capabilities from the greeting. Returns whether to
    /// upgrade to TLS.
    fn on_greeting(&mut self, chan: &mut ChannelCore, hello: ServerHello) -> Result<bool> {
        tracing::debug!(
            server_version = %hello.server_version,
            connection_id = hello.connection_id,
            auth_plugin = %hello.auth_plugin,
            "server greeting"
        );

        let mandatory = capabilities::MANDATORY_SERVER_FLAGS;
        if hello.capabilities & mandatory != mandatory {
            return Err(Error::protocol(
                ProtocolErrorKind::ServerUnsupported,
                format!(
                    "server lacks required capabilities 0x{:08X}",
                    mandatory & !hello.capabilities
                ),
            ));
        }

        let mut caps = self.config.capability_flags() & hello.capabilities;
        if self.config.database.is_some() && caps & capabilities::CLIENT_CONNECT_WITH_DB == 0 {
            return Err(Error::protocol(
                ProtocolErrorKind::ServerUnsupported,
                "server does not support selecting a database at connect time",
            ));
        }
        let use_tls = tls::negotiate_tls(self.config.ssl_mode, hello.capabilities, self.tls_supported)?;
        if use_tls {
            caps |= capabilities::CLIENT_SSL;
        }

        self.collation = u8::try_from(self.config.collation).map_err(|_| {
            Error::client(
                ClientErrorKind::Unsupported,
                format!(
                    "collation {} cannot be requested during the handshake",
                    self.config.collation
                ),
            )
        })?;
        self.capabilities = caps;
        self.plugin = AuthPlugin::from_name(&hello.auth_plugin)?;
        self.scramble = hello.auth_data;

        chan.capabilities = caps;
        chan.connection_id = hello.connection_id;
        chan.server_version = hello.server_version;
        Ok(use_tls)
    }

    fn send_response(&mut self, chan: &mut ChannelCore) -> Result<Next> {
        let auth_response = self.plugin.initial_response(&self.auth_context(chan.secure))?;
        let response = HandshakeResponse {
            capabilities: self.capabilities,
            max_packet_size: self.config.max_packet_size,
            collation: self.collation,
            username: &self.config.user,
            auth_response: &auth_response,
            database: self.config.database.as_deref().unwrap_or(""),
            auth_plugin: self.plugin.name(),
            attributes: &self.config.attributes,
        };
        chan.write_message(|w| response.serialize(w));
        self.state = HandshakeState::ReadAuthReply;
        Ok(Next::Write)
    }
}

impl Operation for Handshake<'_> {
    fn resume(&mut self, chan: &mut ChannelCore) -> Result<Next> {
        loop {
            match self.state {
                HandshakeState::ReadGreeting => {
                    if !chan.read_message()? {
                        return Ok(Next::Read);
                    }
                    let hello = ServerHello::parse(chan.reader.message())?;
                    if self.on_greeting(chan, hello)? {
                        let request = SslRequest {
                            capabilities: self.capabilities,
                            max_packet_size: self.config.max_packet_size,
                            collation: self.collation,
                        };
                        chan.write_message(|w| request.serialize(w));
                        self.state = HandshakeState::StartTls;
                        return Ok(Next::Write);
                    }
                    self.state = HandshakeState::SendResponse;
                }
                HandshakeState::StartTls => {
                    self.state = HandshakeState::TlsDone;
                    return Ok(Next::TlsHandshake);
                }
                HandshakeState::TlsDone => {
                    chan.secure = true;
                    self.state = HandshakeState::SendResponse;
                }
                HandshakeState::SendResponse => return self.send_response(chan),
                HandshakeState::ReadAuthReply => {
                    if !chan.read_message()? {
                        return Ok(Next::Read);
                    }
                    match AuthReply::parse(chan.reader.message())? {
                        AuthReply::Ok(ok) => {
                            chan.on_ok(&ok);
                            chan.status = ChannelStatus::Idle;
                            self.state = HandshakeState::Done;
                            tracing::debug!(
                                connection_id = chan.connection_id,
                                secure = chan.secure,
                                "authenticated"
                            );
                            return Ok(Next::Done);
                        }
                        AuthReply::Err(err) => return Err(err.into()),
                        AuthReply::Switch { plugin, data } => {
                            tracing::debug!(from = self.plugin.name(), to = %plugin, "auth plugin switch");
                            self.plugin = AuthPlugin::from_name(&plugin)?;
                            self.scramble = data.to_vec();
                            let response =
                                self.plugin.initial_response(&self.auth_context(chan.secure))?;
                            chan.write_message(|w| w.write_bytes(&response));
                            return Ok(Next::Write);
                        }
                        AuthReply::MoreData(data) => {
                            let action = self.plugin.more_data(data, &self.auth_context(chan.secure))?;
                            if let AuthAction::Send(payload) = action {
                                chan.write_message(|w| w.write_bytes(&payload));
                                return Ok(Next::Write);
                            }
                        }
                    }
                }
                HandshakeState::Done => return Ok(Next::Done),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Result sets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadState {
    First,
    Columns { remaining: usize },
    Eof,
}

/// Read the head of a result set: an OK/ERR, or a column count followed
/// by the column definitions.
pub(crate) struct ReadHead<'a> {
    st: &'a mut ExecutionState,
    state: HeadState,
}

impl<'a> ReadHead<'a> {
    /// Continue with the next result set of a multi-result execution.
    pub(crate) fn next_resultset(st: &'a mut ExecutionState) -> Self {
        st.begin_head();
        Self {
            st,
            state: HeadState::First,
        }
    }

    fn finish_head(&mut self, chan: &mut ChannelCore) -> Next {
        let num_columns = self.st.columns().len();
        chan.rows.reset(num_columns);
        chan.status = ChannelStatus::ReadingRows;
        self.st.headers_received();
        Next::Done
    }
}

impl Operation for ReadHead<'_> {
    fn resume(&mut self, chan: &mut ChannelCore) -> Result<Next> {
        loop {
            if !chan.read_message()? {
                return Ok(Next::Read);
            }
            let msg = chan.reader.message();

            match self.state {
                HeadState::First => {
                    let Some(&first) = msg.first() else {
                        return Err(Error::incomplete("result set head"));
                    };
                    match PacketType::from_first_byte(first, msg.len()) {
                        PacketType::Ok => {
                            let ok = PacketReader::new(msg).parse_ok_packet()?;
                            finish_resultset(chan, self.st, ok);
                            return Ok(Next::Done);
                        }
                        PacketType::Error => {
                            let err = PacketReader::new(msg).parse_err_packet()?;
                            return server_error(chan, self.st, err);
                        }
                        PacketType::LocalInfile => {
                            return Err(Error::protocol(
                                ProtocolErrorKind::UnexpectedMessage,
                                "LOCAL INFILE requests are not supported",
                            ));
                        }
                        PacketType::Eof | PacketType::Data => {
                            let mut reader = PacketReader::new(msg);
                            let count = reader.read_lenenc_int("column count")?;
                            reader.finish("column count")?;
                            let count = usize::try_from(count).ok().filter(|&c| c > 0).ok_or_else(|| {
                                Error::protocol(
                                    ProtocolErrorKind::InvalidValue,
                                    format!("invalid column count {count}"),
                                )
                            })?;
                            tracing::debug!(columns = count, "result set head");
                            self.state = HeadState::Columns { remaining: count };
                        }
                    }
                }
                HeadState::Columns { remaining } => {
                    self.st.push_column(ColumnMeta::parse(msg)?);
                    if remaining > 1 {
                        self.state = HeadState::Columns {
                            remaining: remaining - 1,
                        };
                    } else if chan.deprecate_eof() {
                        return Ok(self.finish_head(chan));
                    } else {
                        self.state = HeadState::Eof;
                    }
                }
                HeadState::Eof => {
                    if msg.first() != Some(&0xFE) {
                        return Err(unexpected("column definitions EOF", msg.first().copied()));
                    }
                    PacketReader::new(msg).parse_eof_packet()?;
                    return Ok(self.finish_head(chan));
                }
            }
        }
    }
}

/// What a statement execution sends.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Request<'a> {
    Query(&'a str),
    Execute {
        statement: &'a Statement,
        params: &'a [Value],
    },
}

/// Send a query or execute request, then read the first result set head.
pub(crate) struct StartExecution<'a> {
    request: Request<'a>,
    sent: bool,
    head: ReadHead<'a>,
}

impl<'a> StartExecution<'a> {
    pub(crate) fn new(request: Request<'a>, st: &'a mut ExecutionState) -> Self {
        let encoding = match request {
            Request::Query(_) => Encoding::Text,
            Request::Execute { .. } => Encoding::Binary,
        };
        st.reset(encoding);
        Self {
            request,
            sent: false,
            head: ReadHead {
                st,
                state: HeadState::First,
            },
        }
    }
}

impl Operation for StartExecution<'_> {
    fn resume(&mut self, chan: &mut ChannelCore) -> Result<Next> {
        if !self.sent {
            self.sent = true;
            chan.start_command();
            match self.request {
                Request::Query(sql) => {
                    tracing::debug!(sql = %sql, "query");
                    chan.write_message(|w| write_query(w, sql));
                }
                Request::Execute { statement, params } => {
                    tracing::debug!(statement_id = statement.id(), params = params.len(), "execute");
                    chan.write_message(|w| write_stmt_execute(w, statement.id(), params));
                }
            }
            return Ok(Next::Write);
        }
        self.head.resume(chan)
    }
}

/// Read rows of the current result set into the channel's row set.
///
/// Stops after `max` rows, at the end of the result set, or (once at least
/// one row was read) when no complete message is left in the buffer.
pub(crate) struct ReadRows<'a> {
    st: &'a mut ExecutionState,
    max: usize,
    read: usize,
    started: bool,
}

impl<'a> ReadRows<'a> {
    pub(crate) fn one(st: &'a mut ExecutionState) -> Self {
        Self::new(st, 1)
    }

    pub(crate) fn some(st: &'a mut ExecutionState) -> Self {
        Self::new(st, usize::MAX)
    }

    fn new(st: &'a mut ExecutionState, max: usize) -> Self {
        Self {
            st,
            max,
            read: 0,
            started: false,
        }
    }

    /// Rows decoded by this operation.
    pub(crate) fn rows_read(&self) -> usize {
        self.read
    }
}

impl Operation for ReadRows<'_> {
    fn resume(&mut self, chan: &mut ChannelCore) -> Result<Next> {
        if !self.started {
            self.started = true;
            chan.rows.clear();
            if !self.st.should_read_rows() {
                return Ok(Next::Done);
            }
        }
        let encoding = self
            .st
            .encoding()
            .ok_or_else(|| Error::protocol(ProtocolErrorKind::UnexpectedMessage, "rows read before any execution"))?;

        while self.read < self.max {
            if !chan.read_message()? {
                return Ok(Next::Read);
            }
            let msg = chan.reader.message();
            let Some(&first) = msg.first() else {
                return Err(Error::incomplete("row"));
            };
            match PacketType::from_first_byte(first, msg.len()) {
                PacketType::Eof => {
                    let ok = if chan.deprecate_eof() {
                        PacketReader::new(msg).parse_ok_packet()?
                    } else {
                        PacketReader::new(msg).parse_eof_packet()?.into()
                    };
                    finish_resultset(chan, self.st, ok);
                    return Ok(Next::Done);
                }
                PacketType::Error => {
                    let err = PacketReader::new(msg).parse_err_packet()?;
                    return server_error(chan, self.st, err);
                }
                _ => {
                    codec::decode_row(encoding, msg, self.st.columns(), &mut chan.rows)?;
                    self.read += 1;
                    // A batch never waits on the network once it has a row.
                    if !chan.reader.has_buffered_message() {
                        return Ok(Next::Done);
                    }
                }
            }
        }
        Ok(Next::Done)
    }
}

// ---------------------------------------------------------------------------
// Prepared statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrepareState {
    ReadOk,
    Params { remaining: usize },
    ParamsEof,
    Columns { remaining: usize },
    ColumnsEof,
}

/// COM_STMT_PREPARE and the metadata that follows it.
pub(crate) struct Prepare<'a> {
    sql: &'a str,
    sent: bool,
    state: PrepareState,
    statement_id: u32,
    num_columns: usize,
    params: Vec<ColumnMeta>,
    columns: Vec<ColumnMeta>,
    statement: Option<Statement>,
}

impl<'a> Prepare<'a> {
    pub(crate) fn new(sql: &'a str) -> Self {
        Self {
            sql,
            sent: false,
            state: PrepareState::ReadOk,
            statement_id: 0,
            num_columns: 0,
            params: Vec::new(),
            columns: Vec::new(),
            statement: None,
        }
    }

    pub(crate) fn take_statement(&mut self) -> Result<Statement> {
        self.statement.take().ok_or_else(|| {
            Error::protocol(
                ProtocolErrorKind::UnexpectedMessage,
                "prepare finished without a statement",
            )
        })
    }

    // Where to go once parameter metadata is read.
    fn after_params(&self) -> PrepareState {
        PrepareState::Columns {
            remaining: self.num_columns,
        }
    }

    fn finish(&mut self) -> Next {
        tracing::debug!(
            statement_id = self.statement_id,
            params = self.params.len(),
            columns = self.columns.len(),
            "statement prepared"
        );
        self.statement = Some(Statement::new(
            self.statement_id,
            std::mem::take(&mut self.params),
            std::mem::take(&mut self.columns),
        ));
        Next::Done
    }
}

impl Operation for Prepare<'_> {
    fn resume(&mut self, chan: &mut ChannelCore) -> Result<Next> {
        if !self.sent {
            self.sent = true;
            chan.start_command();
            let sql = self.sql;
            tracing::debug!(sql = %sql, "prepare");
            chan.write_message(|w| write_stmt_prepare(w, sql));
            return Ok(Next::Write);
        }

        loop {
            // Nothing left to read for statements without params or columns
            match self.state {
                PrepareState::Params { remaining: 0 } => {
                    self.state = self.after_params();
                    continue;
                }
                PrepareState::Columns { remaining: 0 } => return Ok(self.finish()),
                _ => {}
            }

            if !chan.read_message()? {
                return Ok(Next::Read);
            }
            let msg = chan.reader.message();

            match self.state {
                PrepareState::ReadOk => {
                    if msg.first() == Some(&0xFF) {
                        return Err(PacketReader::new(msg).parse_err_packet()?.into());
                    }
                    let ok = parse_stmt_prepare_ok(msg)?;
                    self.statement_id = ok.statement_id;
                    self.num_columns = usize::from(ok.num_columns);
                    self.params.reserve(usize::from(ok.num_params));
                    self.columns.reserve(self.num_columns);
                    self.state = PrepareState::Params {
                        remaining: usize::from(ok.num_params),
                    };
                }
                PrepareState::Params { remaining } => {
                    self.params.push(ColumnMeta::parse(msg)?);
                    self.state = match remaining - 1 {
                        0 if !chan.deprecate_eof() => PrepareState::ParamsEof,
                        0 => self.after_params(),
                        left => PrepareState::Params { remaining: left },
                    };
                }
                PrepareState::ParamsEof => {
                    if msg.first() != Some(&0xFE) {
                        return Err(unexpected("parameter definitions EOF", msg.first().copied()));
                    }
                    self.state = self.after_params();
                }
                PrepareState::Columns { remaining } => {
                    self.columns.push(ColumnMeta::parse(msg)?);
                    match remaining - 1 {
                        0 if !chan.deprecate_eof() => self.state = PrepareState::ColumnsEof,
                        0 => return Ok(self.finish()),
                        left => self.state = PrepareState::Columns { remaining: left },
                    }
                }
                PrepareState::ColumnsEof => {
                    if msg.first() != Some(&0xFE) {
                        return Err(unexpected("column definitions EOF", msg.first().copied()));
                    }
                    return Ok(self.finish());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Simple commands
// ---------------------------------------------------------------------------

/// A command answered by OK/ERR, or by nothing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SimpleCommand {
    Ping,
    ResetStatement(u32),
    /// No response.
    CloseStatement(u32),
    /// No response; the server closes the connection.
    Quit,
}

impl SimpleCommand {
    fn expects_reply(self) -> bool {
        matches!(self, SimpleCommand::Ping | SimpleCommand::ResetStatement(_))
    }
}

pub(crate) struct RunCommand {
    command: SimpleCommand,
    sent: bool,
}

impl RunCommand {
    pub(crate) fn new(command: SimpleCommand) -> Self {
        Self {
            command,
            sent: false,
        }
    }
}

impl Operation for RunCommand {
    fn resume(&mut self, chan: &mut ChannelCore) -> Result<Next> {
        if !self.sent {
            self.sent = true;
            chan.start_command();
            match self.command {
                SimpleCommand::Ping => chan.write_message(|w| write_command(w, Command::Ping)),
                SimpleCommand::Quit => chan.write_message(|w| write_command(w, Command::Quit)),
                SimpleCommand::ResetStatement(id) => chan.write_message(|w| write_stmt_reset(w, id)),
                SimpleCommand::CloseStatement(id) => {
                    tracing::debug!(statement_id = id, "closing statement");
                    chan.write_message(|w| write_stmt_close(w, id));
                }
            }
            return Ok(Next::Write);
        }
        if !self.command.expects_reply() {
            return Ok(Next::Done);
        }
        if !chan.read_message()? {
            return Ok(Next::Read);
        }
        let ok = ok_or_err(chan.reader.message(), "command reply")?;
        chan.on_ok(&ok);
        Ok(Next::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetState {
    Send,
    ReadReset,
    ReadSetNames,
}

/// COM_RESET_CONNECTION, pipelined with `SET NAMES` when the session
/// character set is known, since a reset restores the server defaults.
pub(crate) struct ResetConnection {
    state: ResetState,
    pipelined: bool,
    error: Option<Error>,
}

impl ResetConnection {
    pub(crate) fn new() -> Self {
        Self {
            state: ResetState::Send,
            pipelined: false,
            error: None,
        }
    }

    fn reply(&mut self, chan: &mut ChannelCore, what: &str) -> Result<()> {
        match ok_or_err(chan.reader.message(), what) {
            Ok(ok) => chan.on_ok(&ok),
            Err(e) if !e.is_fatal() => {
                self.error.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<Next> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(Next::Done),
        }
    }
}

impl Operation for ResetConnection {
    fn resume(&mut self, chan: &mut ChannelCore) -> Result<Next> {
        loop {
            match self.state {
                ResetState::Send => {
                    chan.start_command();
                    if let Some(charset) = chan.charset {
                        let set_names = format!("SET NAMES {}", charset.name);
                        chan.writer.prepare_pipelined_write(
                            0,
                            |w| write_command(w, Command::ResetConnection),
                            0,
                            |w| write_query(w, &set_names),
                        )?;
                        chan.seqnum = 1;
                        self.pipelined = true;
                    } else {
                        chan.write_message(|w| write_command(w, Command::ResetConnection));
                    }
                    self.state = ResetState::ReadReset;
                    return Ok(Next::Write);
                }
                ResetState::ReadReset => {
                    if !chan.read_message()? {
                        return Ok(Next::Read);
                    }
                    self.reply(chan, "reset connection reply")?;
                    if !self.pipelined {
                        return self.finish();
                    }
                    // Replies to pipelined commands each restart at 1
                    chan.seqnum = 1;
                    self.state = ResetState::ReadSetNames;
                }
                ResetState::ReadSetNames => {
                    if !chan.read_message()? {
                        return Ok(Next::Read);
                    }
                    self.reply(chan, "SET NAMES reply")?;
                    return self.finish();
                }
            }
        }
    }
}
