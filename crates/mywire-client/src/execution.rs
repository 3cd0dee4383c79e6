//! Execution state of a statement and fully buffered results.

use mywire_core::{Result, RowSet};

use crate::codec::Encoding;
use crate::protocol::OkPacket;
use crate::types::ColumnMeta;

/// Where a statement execution stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Nothing sent yet, or the last attempt failed.
    #[default]
    NotStarted,
    /// Column metadata is known; rows are pending.
    HeadersReceived,
    /// The server sent the final OK/EOF of the current result set.
    Complete,
}

/// Tracks one execution across its result sets.
///
/// Filled in by `start_query`/`start_execute` and advanced by the row
/// reading operations. Once [`is_complete`](Self::is_complete) is true the
/// summary accessors describe the result set that just finished; if
/// [`should_read_head`](Self::should_read_head) is also true, another result
/// set follows and `read_resultset_head` moves on to it.
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    phase: Phase,
    encoding: Option<Encoding>,
    columns: Vec<ColumnMeta>,
    ok: OkPacket,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    pub fn should_read_rows(&self) -> bool {
        self.phase == Phase::HeadersReceived
    }

    /// Complete, with another result set announced by the server.
    pub fn should_read_head(&self) -> bool {
        self.phase == Phase::Complete && self.ok.more_results()
    }

    /// Row encoding of the current execution (text for queries, binary for
    /// prepared statements).
    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    /// Columns of the current result set. Empty for statements that
    /// return no rows.
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn affected_rows(&self) -> u64 {
        self.ok.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.ok.last_insert_id
    }

    pub fn warning_count(&self) -> u16 {
        self.ok.warnings
    }

    pub fn info(&self) -> &str {
        &self.ok.info
    }

    pub fn status_flags(&self) -> u16 {
        self.ok.status_flags
    }

    /// Final OK packet of the last completed result set.
    pub fn summary(&self) -> &OkPacket {
        &self.ok
    }

    pub(crate) fn reset(&mut self, encoding: Encoding) {
        self.phase = Phase::NotStarted;
        self.encoding = Some(encoding);
        self.columns.clear();
        self.ok = OkPacket::default();
    }

    /// Drop metadata from a previous result set before reading the next head.
    pub(crate) fn begin_head(&mut self) {
        self.columns.clear();
        self.ok = OkPacket::default();
    }

    pub(crate) fn push_column(&mut self, column: ColumnMeta) {
        self.columns.push(column);
    }

    pub(crate) fn headers_received(&mut self) {
        self.phase = Phase::HeadersReceived;
    }

    pub(crate) fn complete(&mut self, ok: OkPacket) {
        self.phase = Phase::Complete;
        self.ok = ok;
    }

    pub(crate) fn fail(&mut self) {
        self.phase = Phase::NotStarted;
    }
}

/// One fully read result set.
#[derive(Debug, Clone)]
pub struct ResultSet {
    columns: Vec<ColumnMeta>,
    rows: RowSet,
    ok: OkPacket,
}

impl ResultSet {
    pub(crate) fn new(columns: Vec<ColumnMeta>, rows: RowSet, ok: OkPacket) -> Self {
        Self { columns, rows, ok }
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn rows(&self) -> &RowSet {
        &self.rows
    }

    pub fn affected_rows(&self) -> u64 {
        self.ok.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.ok.last_insert_id
    }

    pub fn warning_count(&self) -> u16 {
        self.ok.warnings
    }

    pub fn info(&self) -> &str {
        &self.ok.info
    }
}

/// Every result set produced by one query or execution.
#[derive(Debug, Clone, Default)]
pub struct Results {
    sets: Vec<ResultSet>,
}

impl Results {
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ResultSet> {
        self.sets.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultSet> {
        self.sets.iter()
    }

    /// The first result set; every successful execution has one.
    pub fn first(&self) -> Option<&ResultSet> {
        self.sets.first()
    }

    /// Rows of the first result set.
    pub fn rows(&self) -> Option<&RowSet> {
        self.first().map(ResultSet::rows)
    }

    pub fn affected_rows(&self) -> u64 {
        self.first().map_or(0, ResultSet::affected_rows)
    }

    pub fn last_insert_id(&self) -> u64 {
        self.first().map_or(0, ResultSet::last_insert_id)
    }
}

impl<'a> IntoIterator for &'a Results {
    type Item = &'a ResultSet;
    type IntoIter = std::slice::Iter<'a, ResultSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.sets.iter()
    }
}

/// Accumulates batches read with `read_some_rows` into owned results.
#[derive(Debug, Default)]
pub(crate) struct ResultsBuilder {
    sets: Vec<ResultSet>,
    rows: Option<RowSet>,
}

impl ResultsBuilder {
    pub(crate) fn append(&mut self, num_columns: usize, batch: &RowSet) -> Result<()> {
        let rows = self.rows.get_or_insert_with(|| RowSet::new(num_columns));
        for row in batch {
            let fields: Vec<_> = row.iter().collect();
            rows.push_row(&fields)?;
        }
        Ok(())
    }

    /// Close the current result set; `st` must be complete.
    pub(crate) fn finish_set(&mut self, st: &ExecutionState) {
        let rows = self
            .rows
            .take()
            .unwrap_or_else(|| RowSet::new(st.columns().len()));
        self.sets
            .push(ResultSet::new(st.columns().to_vec(), rows, st.summary().clone()));
    }

    pub(crate) fn build(self) -> Results {
        Results { sets: self.sets }
    }
}
