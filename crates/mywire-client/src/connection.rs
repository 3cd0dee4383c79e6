//! Blocking MySQL connection.
//!
//! [`Connection`] drives the operations in [`crate::ops`] over a
//! [`Transport`], performing each read, write and TLS upgrade the operation
//! asks for until it completes. A fatal error (protocol violation, broken
//! stream) leaves the connection [`ChannelStatus::Broken`]; server errors
//! leave it usable.

use mywire_core::{Result, RowSet, RowView, Value};

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
use crate::transport::{Stream, Transport};

/// Drive `op` to completion. Fatal errors break the channel.
fn run_op<T: Transport>(
    transport: &mut T,
    core: &mut ChannelCore,
    config: &MySqlConfig,
    op: &mut impl Operation,
) -> Result<()> {
    let result = drive(transport, core, config, op);
    if let Err(e) = &result {
        if e.is_fatal() {
            tracing::debug!(error = %e, "fatal error");
            core.mark_broken();
        }
    }
    result
}

fn retry<T>(mut call: impl FnMut() -> Result<T>) -> Result<T> {
    loop {
        match call() {
            Err(e) if interrupted(&e) => tracing::trace!("transport call interrupted, retrying"),
            other => return other,
        }
    }
}

fn drive<T: Transport>(
    transport: &mut T,
    core: &mut ChannelCore,
    config: &MySqlConfig,
    op: &mut impl Operation,
) -> Result<()> {
    loop {
        match op.resume(core)? {
            Next::Done => return Ok(()),
            Next::Read => {
                let n = retry(|| transport.read_some(core.reader.prepare_buffer()))?;
                if n == 0 {
                    return Err(disconnected());
                }
                core.reader.commit(n);
            }
            Next::Write => {
                while !core.writer.done() {
                    let n = retry(|| transport.write_some(core.writer.current_chunk()))?;
                    if n == 0 {
                        return Err(write_zero());
                    }
                    core.writer.resume(n);
                }
            }
            Next::TlsHandshake => transport.tls_handshake(config)?,
        }
    }
}

/// A blocking session with a MySQL server.
///
/// One operation runs at a time. Rows returned by
/// [`read_one_row`](Self::read_one_row) and
/// [`read_some_rows`](Self::read_some_rows) borrow the connection's row
/// buffer and are invalidated by the next call.
pub struct Connection<T: Transport = Stream> {
    transport: T,
    core: ChannelCore,
    config: MySqlConfig,
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connection_id", &self.core.connection_id)
            .field("server_version", &self.core.server_version)
            .field("status", &self.core.status)
            .field("secure", &self.core.secure)
            .finish_non_exhaustive()
    }
}

impl Connection<Stream> {
    /// Open a TCP connection and authenticate.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(config), fields(host = %config.host, port = config.port))]
    pub fn connect(config: MySqlConfig) -> Result<Self> {
        let stream = Stream::connect(&config)?;
        Self::handshake(stream, config)
    }
}

impl<T: Transport> Connection<T> {
    /// Run the connection phase over an already open transport.
    #[allow(clippy::result_large_err)]
    pub fn handshake(mut transport: T, config: MySqlConfig) -> Result<Self> {
        let mut core = ChannelCore::new(&config);
        core.status = ChannelStatus::Handshaking;
        let mut op = Handshake::new(&config, transport.supports_tls());
        if let Err(e) = run_op(&mut transport, &mut core, &config, &mut op) {
            core.mark_broken();
            return Err(e);
        }
        Ok(Self {
            transport,
            core,
            config,
        })
    }

    pub fn status(&self) -> ChannelStatus {
        self.core.status
    }

    /// Server-assigned id of this session.
    pub fn connection_id(&self) -> u32 {
        self.core.connection_id
    }

    pub fn server_version(&self) -> &str {
        &self.core.server_version
    }

    /// Does the server treat backslash as an escape character?
    pub fn backslash_escapes(&self) -> bool {
        self.core.backslash_escapes
    }

    /// Escaping options for this session, for [`crate::format_sql`] and
    /// [`crate::escape_string`].
    #[allow(clippy::result_large_err)]
    pub fn format_options(&self) -> Result<FormatOptions> {
        self.core.format_options()
    }

    /// Was TLS negotiated?
    pub fn is_secure(&self) -> bool {
        self.core.secure
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    fn run(&mut self, op: &mut impl Operation) -> Result<()> {
        run_op(&mut self.transport, &mut self.core, &self.config, op)
    }

    /// Send a text query and read the head of its first result set.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(self, st))]
    pub fn start_query(&mut self, sql: &str, st: &mut ExecutionState) -> Result<()> {
        self.core.check_idle()?;
        self.run(&mut StartExecution::new(Request::Query(sql), st))
    }

    /// Execute a prepared statement and read the head of its first result
    /// set. A parameter count mismatch fails before anything is sent.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(self, statement, params, st), fields(statement_id = statement.id()))]
    pub fn start_execute(
        &mut self,
        statement: &Statement,
        params: &[Value],
        st: &mut ExecutionState,
    ) -> Result<()> {
        self.core.check_idle()?;
        statement.check_params(params)?;
        let request = Request::Execute { statement, params };
        self.run(&mut StartExecution::new(request, st))
    }

    /// Read the next row of the current result set.
    ///
    /// Returns `None` at the end of the result set, at which point `st` is
    /// complete and carries the result summary.
    #[allow(clippy::result_large_err)]
    pub fn read_one_row(&mut self, st: &mut ExecutionState) -> Result<Option<RowView<'_>>> {
        if !st.should_read_rows() {
            self.core.rows.clear();
            return Ok(None);
        }
        self.core.check_status(ChannelStatus::ReadingRows)?;
        self.run(&mut ReadRows::one(st))?;
        Ok(self.core.rows.first())
    }

    /// Read at least one row, plus every further row that is already
    /// buffered. An empty batch means the result set is complete.
    #[allow(clippy::result_large_err)]
    pub fn read_some_rows(&mut self, st: &mut ExecutionState) -> Result<&RowSet> {
        if !st.should_read_rows() {
            self.core.rows.clear();
            return Ok(&self.core.rows);
        }
        self.core.check_status(ChannelStatus::ReadingRows)?;
        self.run(&mut ReadRows::some(st))?;
        Ok(&self.core.rows)
    }

    /// Move on to the next result set of a multi-result execution.
    #[allow(clippy::result_large_err)]
    pub fn read_resultset_head(&mut self, st: &mut ExecutionState) -> Result<()> {
        if !st.should_read_head() {
            return Ok(());
        }
        self.core.check_status(ChannelStatus::ReadingHead)?;
        self.run(&mut ReadHead::next_resultset(st))
    }

    /// Run a text query and buffer every result set.
    #[allow(clippy::result_large_err)]
    pub fn query(&mut self, sql: &str) -> Result<Results> {
        let mut st = ExecutionState::new();
        self.start_query(sql, &mut st)?;
        self.collect(&mut st)
    }

    /// Execute a prepared statement and buffer every result set.
    #[allow(clippy::result_large_err)]
    pub fn execute(&mut self, statement: &Statement, params: &[Value]) -> Result<Results> {
        let mut st = ExecutionState::new();
        self.start_execute(statement, params, &mut st)?;
        self.collect(&mut st)
    }

    fn collect(&mut self, st: &mut ExecutionState) -> Result<Results> {
        let mut builder = ResultsBuilder::default();
        loop {
            while st.should_read_rows() {
                let num_columns = st.columns().len();
                let batch = self.read_some_rows(st)?;
                builder.append(num_columns, batch)?;
            }
            builder.finish_set(st);
            if !st.should_read_head() {
                return Ok(builder.build());
            }
            self.read_resultset_head(st)?;
        }
    }

    /// Prepare a statement on the server.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn prepare(&mut self, sql: &str) -> Result<Statement> {
        self.core.check_idle()?;
        let mut op = Prepare::new(sql);
        self.run(&mut op)?;
        op.take_statement()
    }

    /// Deallocate a prepared statement. The server sends no reply.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(self, statement), fields(statement_id = statement.id()))]
    pub fn close_statement(&mut self, statement: &Statement) -> Result<()> {
        self.core.check_idle()?;
        self.run(&mut RunCommand::new(SimpleCommand::CloseStatement(statement.id())))
    }

    /// Reset the state of a prepared statement on the server.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(self, statement), fields(statement_id = statement.id()))]
    pub fn reset_statement(&mut self, statement: &Statement) -> Result<()> {
        self.core.check_idle()?;
        self.run(&mut RunCommand::new(SimpleCommand::ResetStatement(statement.id())))
    }

    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn ping(&mut self) -> Result<()> {
        self.core.check_idle()?;
        self.run(&mut RunCommand::new(SimpleCommand::Ping))
    }

    /// Reset session state (variables, temporary tables, prepared
    /// statements) without reconnecting.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn reset_connection(&mut self) -> Result<()> {
        self.core.check_idle()?;
        self.run(&mut ResetConnection::new())?;
        // Server defaults are back
        self.core.backslash_escapes = true;
        Ok(())
    }

    /// Send QUIT and shut the transport down.
    ///
    /// Safe to call in any state and more than once. Errors are logged and
    /// otherwise ignored.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn close(&mut self) {
        match self.core.status {
            ChannelStatus::Disconnected => return,
            ChannelStatus::Broken | ChannelStatus::Handshaking => {}
            ChannelStatus::Idle | ChannelStatus::ReadingRows | ChannelStatus::ReadingHead => {
                if let Err(e) = self.run(&mut RunCommand::new(SimpleCommand::Quit)) {
                    tracing::warn!(error = %e, "failed to send quit");
                }
            }
        }
        if let Err(e) = self.transport.shutdown() {
            tracing::warn!(error = %e, "failed to shut down transport");
        }
        self.core.status = ChannelStatus::Disconnected;
        self.core.reader.reset();
        self.core.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::server_status::SERVER_MORE_RESULTS_EXISTS;
    use crate::testing::{self, server};
    use crate::transport::mock::MockTransport;
    use crate::types::FieldType;
    use mywire_core::{ClientErrorKind, ErrorCode, FieldView, ProtocolErrorKind};

    fn connect(script: &[u8]) -> Connection<MockTransport> {
        let mut input = server::login();
        input.extend_from_slice(script);
        Connection::handshake(MockTransport::new(input).trickle(5), MySqlConfig::new().user("app"))
            .unwrap()
    }

    fn two_columns() -> Vec<u8> {
        let mut out = server::frame(1, &[2]);
        out.extend(server::frame(2, &testing::column_def_bytes("id", FieldType::Long, 0)));
        out.extend(server::frame(3, &testing::column_def_bytes("name", FieldType::VarString, 0)));
        out
    }

    #[test]
    fn test_handshake() {
        let conn = connect(&[]);
        assert_eq!(conn.status(), ChannelStatus::Idle);
        assert_eq!(conn.connection_id(), server::CONNECTION_ID);
        assert_eq!(conn.server_version(), "8.0.36");
        assert!(conn.backslash_escapes());
        assert!(!conn.is_secure());
        // Handshake response with sequence number 1
        assert_eq!(conn.transport.output[3], 1);
    }

    #[test]
    fn test_handshake_server_error() {
        let mut input = server::frame(0, &server::greeting("mysql_native_password"));
        input.extend(server::frame(2, &server::err(1045, "28000", "Access denied")));
        let err = Connection::handshake(MockTransport::new(input), MySqlConfig::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Server(1045));
    }

    #[test]
    fn test_handshake_eof() {
        let input = server::frame(0, &server::greeting("mysql_native_password"));
        let err = Connection::handshake(MockTransport::new(input), MySqlConfig::new()).unwrap_err();
        assert_eq!(
            err.code(),
            ErrorCode::Connection(mywire_core::ConnectionErrorKind::Disconnected)
        );
    }

    #[test]
    fn test_interrupted_transport_calls_are_retried() {
        let mut input = server::login();
        input.extend(server::frame(1, &server::ok(1, 7, 0)));
        input.extend(server::frame(1, &server::ok(0, 0, 0)));
        let transport = MockTransport::new(input).trickle(5).interrupted_once();
        let mut conn = Connection::handshake(transport, MySqlConfig::new().user("app")).unwrap();
        assert_eq!(conn.status(), ChannelStatus::Idle);

        conn.transport.interrupt_reads = 2;
        conn.transport.interrupt_writes = 2;
        let results = conn.query("INSERT INTO t VALUES (1)").unwrap();
        assert_eq!(results.last_insert_id(), 7);
        assert_eq!(conn.status(), ChannelStatus::Idle);
        assert_eq!(conn.transport.interrupt_reads, 0);
        assert_eq!(conn.transport.interrupt_writes, 0);

        conn.ping().unwrap();
    }

    #[test]
    fn test_select_empty_table() {
        let mut script = two_columns();
        script.extend(server::frame(4, &server::eof_ok(0)));
        let mut conn = connect(&script);

        let mut st = ExecutionState::new();
        conn.start_query("SELECT * FROM empty_table", &mut st).unwrap();
        assert_eq!(st.columns().len(), 2);
        assert!(!st.is_complete());

        assert!(conn.read_one_row(&mut st).unwrap().is_none());
        assert!(st.is_complete());
        assert_eq!(st.affected_rows(), 0);
        assert_eq!(conn.status(), ChannelStatus::Idle);
        // Further reads keep reporting the end
        assert!(conn.read_one_row(&mut st).unwrap().is_none());
    }

    #[test]
    fn test_rows_one_at_a_time() {
        let mut script = two_columns();
        script.extend(server::frame(4, &server::text_row(&[Some("1"), Some("ann")])));
        script.extend(server::frame(5, &server::text_row(&[Some("2"), Some("bob")])));
        script.extend(server::frame(6, &server::eof_ok(0)));
        let mut conn = connect(&script);

        let mut st = ExecutionState::new();
        conn.start_query("SELECT id, name FROM people", &mut st).unwrap();
        let mut names = Vec::new();
        while let Some(row) = conn.read_one_row(&mut st).unwrap() {
            match row.get(1) {
                Some(FieldView::Bytes(name)) => names.push(name.to_vec()),
                other => panic!("unexpected field {other:?}"),
            }
        }
        assert_eq!(names, [b"ann".to_vec(), b"bob".to_vec()]);
        assert!(st.is_complete());
    }

    #[test]
    fn test_insert() {
        let mut conn = connect(&server::frame(1, &server::ok(1, 42, 0)));
        let results = conn.query("INSERT INTO t (name) VALUES ('x')").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results.affected_rows(), 1);
        assert_eq!(results.last_insert_id(), 42);
        assert!(results.first().unwrap().columns().is_empty());
        assert_eq!(conn.status(), ChannelStatus::Idle);
    }

    #[test]
    fn test_server_error_keeps_connection_usable() {
        let mut script = server::frame(
            1,
            &server::err(1146, "42S02", "Table 'db.missing' doesn't exist"),
        );
        script.extend(server::frame(1, &server::ok(0, 0, 0)));
        let mut conn = connect(&script);

        let mut st = ExecutionState::new();
        let err = conn.start_query("SELECT * FROM missing", &mut st).unwrap_err();
        assert!(err.as_server().is_some_and(|e| e.is_no_such_table()));
        assert!(!st.is_complete());
        assert!(!st.should_read_rows());
        assert_eq!(conn.status(), ChannelStatus::Idle);

        conn.ping().unwrap();
    }

    #[test]
    fn test_sequence_mismatch_breaks_connection() {
        let mut conn = connect(&server::frame(3, &server::ok(0, 0, 0)));
        let err = conn.query("DO 1").unwrap_err();
        assert_eq!(
            err.code(),
            ErrorCode::Protocol(ProtocolErrorKind::SequenceNumberMismatch)
        );
        assert_eq!(conn.status(), ChannelStatus::Broken);
        assert_eq!(
            conn.ping().unwrap_err().code(),
            ErrorCode::Client(ClientErrorKind::NotConnected)
        );
    }

    #[test]
    fn test_wrong_param_count_sends_nothing() {
        let mut conn = connect(&[]);
        let statement = Statement::new(
            1,
            vec![testing::column(FieldType::VarString, false)],
            Vec::new(),
        );
        let sent = conn.transport.output.len();

        let mut st = ExecutionState::new();
        let err = conn.start_execute(&statement, &[], &mut st).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Client(ClientErrorKind::WrongNumParams));
        assert_eq!(conn.transport.output.len(), sent);
        assert_eq!(conn.status(), ChannelStatus::Idle);
    }

    #[test]
    fn test_command_while_reading_rows() {
        let mut conn = connect(&two_columns());
        let mut st = ExecutionState::new();
        conn.start_query("SELECT id, name FROM people", &mut st).unwrap();
        assert_eq!(
            conn.ping().unwrap_err().code(),
            ErrorCode::Client(ClientErrorKind::OperationInProgress)
        );
    }

    #[test]
    fn test_multiple_result_sets() {
        let mut script = server::frame(1, &[1]);
        script.extend(server::frame(2, &testing::column_def_bytes("n", FieldType::LongLong, 0)));
        script.extend(server::frame(3, &server::text_row(&[Some("1")])));
        script.extend(server::frame(4, &server::eof_ok(SERVER_MORE_RESULTS_EXISTS)));
        script.extend(server::frame(5, &server::ok(2, 0, 0)));
        let mut conn = connect(&script);

        let results = conn.query("SELECT 1; DELETE FROM t").unwrap();
        assert_eq!(results.len(), 2);
        let first = results.get(0).unwrap();
        assert_eq!(first.rows().to_rows()[0].values(), [Value::Int(1)]);
        assert_eq!(results.get(1).unwrap().affected_rows(), 2);
        assert_eq!(conn.status(), ChannelStatus::Idle);
    }

    #[test]
    fn test_prepare_and_execute() {
        let mut script = server::frame(1, &server::prepare_ok(5, 1, 1));
        script.extend(server::frame(2, &testing::column_def_bytes("?", FieldType::LongLong, 0)));
        script.extend(server::frame(3, &testing::column_def_bytes("n", FieldType::LongLong, 0)));
        // Execute response
        script.extend(server::frame(1, &[1]));
        script.extend(server::frame(2, &testing::column_def_bytes("n", FieldType::LongLong, 0)));
        let mut row = vec![0x00, 0x00];
        row.extend_from_slice(&10i64.to_le_bytes());
        script.extend(server::frame(3, &row));
        script.extend(server::frame(4, &server::eof_ok(0)));
        let mut conn = connect(&script);

        let statement = conn.prepare("SELECT ? * 2").unwrap();
        assert_eq!(statement.id(), 5);
        assert_eq!(statement.num_params(), 1);

        let results = conn.execute(&statement, &[Value::Int(5)]).unwrap();
        assert_eq!(results.rows().unwrap().to_rows()[0].values(), [Value::Int(10)]);

        conn.close_statement(&statement).unwrap();
        let tail = &conn.transport.output[conn.transport.output.len() - 9..];
        assert_eq!(tail, [5, 0, 0, 0, 0x19, 5, 0, 0, 0]);
    }

    #[test]
    fn test_reset_connection() {
        let mut script = server::frame(1, &server::ok(0, 0, 0x0200));
        script.extend(server::frame(1, &server::ok(0, 0, 0)));
        script.extend(server::frame(1, &server::ok(0, 0, 0)));
        script.extend(server::frame(1, &server::ok(0, 0, 0)));
        let mut conn = connect(&script);

        conn.ping().unwrap();
        assert!(!conn.backslash_escapes());
        conn.reset_connection().unwrap();
        assert!(conn.backslash_escapes());
        conn.ping().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut conn = connect(&[]);
        conn.close();
        assert_eq!(conn.status(), ChannelStatus::Disconnected);
        assert!(conn.transport.shut_down);
        assert!(conn.transport.output.ends_with(&[1, 0, 0, 0, 0x01]));

        let sent = conn.transport.output.len();
        conn.close();
        assert_eq!(conn.transport.output.len(), sent);

        let mut st = ExecutionState::new();
        assert_eq!(
            conn.start_query("SELECT 1", &mut st).unwrap_err().code(),
            ErrorCode::Client(ClientErrorKind::NotConnected)
        );
    }

    #[test]
    fn test_close_after_break_skips_quit() {
        let mut conn = connect(&server::frame(9, &server::ok(0, 0, 0)));
        assert!(conn.ping().is_err());
        let sent = conn.transport.output.len();
        conn.close();
        assert_eq!(conn.transport.output.len(), sent);
        assert!(conn.transport.shut_down);
    }
}
