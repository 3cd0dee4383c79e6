//! Asynchronous MySQL connection on the asupersync runtime.
//!
//! [`AsyncConnection`] runs the same operations as the blocking
//! [`Connection`](crate::Connection), suspending at every network wait
//! point. Results use [`Outcome`]: a cancellation requested through the
//! [`Cx`] before an operation starts returns `Cancelled` and leaves the
//! connection as it was; a cancellation observed mid-operation leaves the
//! stream at an unknown protocol position, so the connection becomes
//! [`ChannelStatus::Broken`] and only [`close`](AsyncConnection::close)
//! remains.

use asupersync::{Cx, Outcome};
use mywire_core::{Error, Result, RowSet, RowView, Value};

use crate::channel::{
    ChannelCore, ChannelStatus, Next, Operation, disconnected, interrupted, write_zero,
};
use crate::config::MySqlConfig;
use crate::escape::FormatOptions;
use crate::execution::{ExecutionState, Results, ResultsBuilder};
use crate::ops::{
    Handshake, Prepare, ReadHead, ReadRows, Request, ResetConnection, RunCommand, SimpleCommand,
    StartExecution,
};
use crate::protocol::Statement;
use crate::transport::{AsyncStream, AsyncTransport};

macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return Outcome::Err(e),
        }
    };
}

macro_rules! try_outcome_ok {
    ($expr:expr) => {
        match $expr {
            Outcome::Ok(value) => value,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    };
}

/// Drive `op` to completion, checking for cancellation between steps.
async fn run_op<T: AsyncTransport>(
    transport: &mut T,
    core: &mut ChannelCore,
    config: &MySqlConfig,
    cx: &Cx,
    op: &mut impl Operation,
) -> Outcome<(), Error> {
    // Nothing has been exchanged yet
    if let Some(reason) = cx.cancel_reason() {
        return Outcome::Cancelled(reason);
    }

    let outcome = drive(transport, core, config, cx, op).await;
    match &outcome {
        Outcome::Err(e) if e.is_fatal() => {
            tracing::debug!(error = %e, "fatal error");
            core.mark_broken();
        }
        Outcome::Cancelled(reason) => {
            tracing::debug!(?reason, "operation cancelled mid-exchange");
            core.mark_broken();
        }
        _ => {}
    }
    outcome
}

async fn drive<T: AsyncTransport>(
    transport: &mut T,
    core: &mut ChannelCore,
    config: &MySqlConfig,
    cx: &Cx,
    op: &mut impl Operation,
) -> Outcome<(), Error> {
    loop {
        let next = match op.resume(core) {
            Ok(Next::Done) => return Outcome::Ok(()),
            Ok(next) => next,
            Err(e) => return Outcome::Err(e),
        };
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let step = match next {
            Next::Read => read(transport, core).await,
            Next::Write => write(transport, core).await,
            Next::TlsHandshake => transport.tls_handshake(config).await,
            Next::Done => Ok(()),
        };
        try_outcome!(step);
    }
}

async fn read<T: AsyncTransport>(transport: &mut T, core: &mut ChannelCore) -> Result<()> {
    let n = loop {
        match transport.read_some(core.reader.prepare_buffer()).await {
            Err(e) if interrupted(&e) => tracing::trace!("transport read interrupted, retrying"),
            other => break other?,
        }
    };
    if n == 0 {
        return Err(disconnected());
    }
    core.reader.commit(n);
    Ok(())
}

async fn write<T: AsyncTransport>(transport: &mut T, core: &mut ChannelCore) -> Result<()> {
    while !core.writer.done() {
        let n = match transport.write_some(core.writer.current_chunk()).await {
            Err(e) if interrupted(&e) => {
                tracing::trace!("transport write interrupted, retrying");
                continue;
            }
            other => other?,
        };
        if n == 0 {
            return Err(write_zero());
        }
        core.writer.resume(n);
    }
    Ok(())
}

/// An asynchronous session with a MySQL server.
pub struct AsyncConnection<T: AsyncTransport = AsyncStream> {
    transport: T,
    core: ChannelCore,
    config: MySqlConfig,
}

impl<T: AsyncTransport> std::fmt::Debug for AsyncConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncConnection")
            .field("connection_id", &self.core.connection_id)
            .field("server_version", &self.core.server_version)
            .field("status", &self.core.status)
            .field("secure", &self.core.secure)
            .finish_non_exhaustive()
    }
}

impl AsyncConnection<AsyncStream> {
    /// Open a TCP connection and authenticate.
    #[tracing::instrument(level = "debug", skip(cx, config), fields(host = %config.host, port = config.port))]
    pub async fn connect(cx: &Cx, config: MySqlConfig) -> Outcome<Self, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let stream = try_outcome!(AsyncStream::connect(&config).await);
        Self::handshake(cx, stream, config).await
    }
}

impl<T: AsyncTransport> AsyncConnection<T> {
    /// Run the connection phase over an already open transport.
    pub async fn handshake(cx: &Cx, mut transport: T, config: MySqlConfig) -> Outcome<Self, Error> {
        let mut core = ChannelCore::new(&config);
        core.status = ChannelStatus::Handshaking;
        let mut op = Handshake::new(&config, transport.supports_tls());
        match run_op(&mut transport, &mut core, &config, cx, &mut op).await {
            Outcome::Ok(()) => Outcome::Ok(Self {
                transport,
                core,
                config,
            }),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.core.status
    }

    pub fn connection_id(&self) -> u32 {
        self.core.connection_id
    }

    pub fn server_version(&self) -> &str {
        &self.core.server_version
    }

    pub fn backslash_escapes(&self) -> bool {
        self.core.backslash_escapes
    }

    #[allow(clippy::result_large_err)]
    pub fn format_options(&self) -> Result<FormatOptions> {
        self.core.format_options()
    }

    pub fn is_secure(&self) -> bool {
        self.core.secure
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    async fn run(&mut self, cx: &Cx, op: &mut impl Operation) -> Outcome<(), Error> {
        run_op(&mut self.transport, &mut self.core, &self.config, cx, op).await
    }

    /// Send a text query and read the head of its first result set.
    #[tracing::instrument(level = "debug", skip(self, cx, st))]
    pub async fn start_query(
        &mut self,
        cx: &Cx,
        sql: &str,
        st: &mut ExecutionState,
    ) -> Outcome<(), Error> {
        try_outcome!(self.core.check_idle());
        self.run(cx, &mut StartExecution::new(Request::Query(sql), st))
            .await
    }

    /// Execute a prepared statement; see
    /// [`Connection::start_execute`](crate::Connection::start_execute).
    #[tracing::instrument(level = "debug", skip(self, cx, statement, params, st), fields(statement_id = statement.id()))]
    pub async fn start_execute(
        &mut self,
        cx: &Cx,
        statement: &Statement,
        params: &[Value],
        st: &mut ExecutionState,
    ) -> Outcome<(), Error> {
        try_outcome!(self.core.check_idle());
        try_outcome!(statement.check_params(params));
        let request = Request::Execute { statement, params };
        self.run(cx, &mut StartExecution::new(request, st)).await
    }

    pub async fn read_one_row(
        &mut self,
        cx: &Cx,
        st: &mut ExecutionState,
    ) -> Outcome<Option<RowView<'_>>, Error> {
        if !st.should_read_rows() {
            self.core.rows.clear();
            return Outcome::Ok(None);
        }
        try_outcome!(self.core.check_status(ChannelStatus::ReadingRows));
        try_outcome_ok!(self.run(cx, &mut ReadRows::one(st)).await);
        Outcome::Ok(self.core.rows.first())
    }

    pub async fn read_some_rows(
        &mut self,
        cx: &Cx,
        st: &mut ExecutionState,
    ) -> Outcome<&RowSet, Error> {
        if !st.should_read_rows() {
            self.core.rows.clear();
            return Outcome::Ok(&self.core.rows);
        }
        try_outcome!(self.core.check_status(ChannelStatus::ReadingRows));
        try_outcome_ok!(self.run(cx, &mut ReadRows::some(st)).await);
        Outcome::Ok(&self.core.rows)
    }

    pub async fn read_resultset_head(
        &mut self,
        cx: &Cx,
        st: &mut ExecutionState,
    ) -> Outcome<(), Error> {
        if !st.should_read_head() {
            return Outcome::Ok(());
        }
        try_outcome!(self.core.check_status(ChannelStatus::ReadingHead));
        self.run(cx, &mut ReadHead::next_resultset(st)).await
    }

    pub async fn query(&mut self, cx: &Cx, sql: &str) -> Outcome<Results, Error> {
        let mut st = ExecutionState::new();
        try_outcome_ok!(self.start_query(cx, sql, &mut st).await);
        self.collect(cx, &mut st).await
    }

    pub async fn execute(
        &mut self,
        cx: &Cx,
        statement: &Statement,
        params: &[Value],
    ) -> Outcome<Results, Error> {
        let mut st = ExecutionState::new();
        try_outcome_ok!(self.start_execute(cx, statement, params, &mut st).await);
        self.collect(cx, &mut st).await
    }

    async fn collect(&mut self, cx: &Cx, st: &mut ExecutionState) -> Outcome<Results, Error> {
        let mut builder = ResultsBuilder::default();
        loop {
            while st.should_read_rows() {
                let num_columns = st.columns().len();
                let batch = try_outcome_ok!(self.read_some_rows(cx, st).await);
                try_outcome!(builder.append(num_columns, batch));
            }
            builder.finish_set(st);
            if !st.should_read_head() {
                return Outcome::Ok(builder.build());
            }
            try_outcome_ok!(self.read_resultset_head(cx, st).await);
        }
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn prepare(&mut self, cx: &Cx, sql: &str) -> Outcome<Statement, Error> {
        try_outcome!(self.core.check_idle());
        let mut op = Prepare::new(sql);
        try_outcome_ok!(self.run(cx, &mut op).await);
        match op.take_statement() {
            Ok(statement) => Outcome::Ok(statement),
            Err(e) => Outcome::Err(e),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, cx, statement), fields(statement_id = statement.id()))]
    pub async fn close_statement(&mut self, cx: &Cx, statement: &Statement) -> Outcome<(), Error> {
        try_outcome!(self.core.check_idle());
        let command = SimpleCommand::CloseStatement(statement.id());
        self.run(cx, &mut RunCommand::new(command)).await
    }

    #[tracing::instrument(level = "debug", skip(self, cx, statement), fields(statement_id = statement.id()))]
    pub async fn reset_statement(&mut self, cx: &Cx, statement: &Statement) -> Outcome<(), Error> {
        try_outcome!(self.core.check_idle());
        let command = SimpleCommand::ResetStatement(statement.id());
        self.run(cx, &mut RunCommand::new(command)).await
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn ping(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_outcome!(self.core.check_idle());
        self.run(cx, &mut RunCommand::new(SimpleCommand::Ping)).await
    }

    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn reset_connection(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_outcome!(self.core.check_idle());
        try_outcome_ok!(self.run(cx, &mut ResetConnection::new()).await);
        self.core.backslash_escapes = true;
        Outcome::Ok(())
    }

    /// Send QUIT and shut the transport down.
    ///
    /// Runs to completion even when `cx` is cancelled; the quit message is
    /// skipped in that case.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn close(&mut self, cx: &Cx) {
        match self.core.status {
            ChannelStatus::Disconnected => return,
            ChannelStatus::Broken | ChannelStatus::Handshaking => {}
            ChannelStatus::Idle | ChannelStatus::ReadingRows | ChannelStatus::ReadingHead => {
                match self.run(cx, &mut RunCommand::new(SimpleCommand::Quit)).await {
                    Outcome::Ok(()) => {}
                    Outcome::Err(e) => tracing::warn!(error = %e, "failed to send quit"),
                    Outcome::Cancelled(reason) => {
                        tracing::debug!(?reason, "quit skipped");
                    }
                    Outcome::Panicked(p) => tracing::warn!(?p, "quit panicked"),
                }
            }
        }
        if let Err(e) = self.transport.shutdown().await {
            tracing::warn!(error = %e, "failed to shut down transport");
        }
        self.core.status = ChannelStatus::Disconnected;
        self.core.reader.reset();
        self.core.rows.clear();
    }
}
