//! Row storage.
//!
//! A [`RowSet`] stores any number of rows with the same column count in two
//! flat buffers: one slot per field and a single byte arena holding the
//! contents of every string/blob field. Slots refer to the arena by
//! `(offset, len)` rather than by pointer, so growing the arena never leaves
//! a dangling reference: a [`RowView`] resolves its byte slices against the
//! arena at access time. Mutating the set requires `&mut self`, which the
//! borrow checker only grants once every outstanding view is gone.

use std::ops::Range;

use crate::error::{ClientErrorKind, Error};
use crate::temporal::{Date, DateTime, Time};
use crate::value::{FieldView, Value};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Null,
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Bytes { offset: usize, len: usize },
    Date(Date),
    DateTime(DateTime),
    Time(Time),
}

/// A growable collection of rows sharing one backing buffer.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    num_columns: usize,
    slots: Vec<Slot>,
    arena: Vec<u8>,
}

/// A saved length of a [`RowSet`], used to discard a partially decoded row.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    slots: usize,
    arena: usize,
}

impl RowSet {
    /// Create an empty set for rows of `num_columns` fields.
    pub fn new(num_columns: usize) -> Self {
        Self {
            num_columns,
            slots: Vec::new(),
            arena: Vec::new(),
        }
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Number of complete rows.
    ///
    /// A set with zero columns never holds rows.
    pub fn len(&self) -> usize {
        if self.num_columns == 0 {
            0
        } else {
            self.slots.len() / self.num_columns
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every row and change the column count. Keeps allocations.
    pub fn reset(&mut self, num_columns: usize) {
        self.num_columns = num_columns;
        self.slots.clear();
        self.arena.clear();
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.arena.clear();
    }

    /// Append a complete row.
    pub fn push_row(&mut self, fields: &[FieldView<'_>]) -> Result<()> {
        if fields.len() != self.num_columns {
            return Err(Error::client(
                ClientErrorKind::RowShape,
                format!(
                    "row has {} fields but the result has {} columns",
                    fields.len(),
                    self.num_columns
                ),
            ));
        }
        for field in fields {
            self.push_field(*field);
        }
        Ok(())
    }

    /// Append a single field to the row currently being built.
    ///
    /// Callers that push field by field are responsible for pushing exactly
    /// `num_columns` fields per row, rolling back to a [`Checkpoint`] on
    /// failure.
    pub fn push_field(&mut self, field: FieldView<'_>) {
        let slot = match field {
            FieldView::Null => Slot::Null,
            FieldView::Int(v) => Slot::Int(v),
            FieldView::UInt(v) => Slot::UInt(v),
            FieldView::Float(v) => Slot::Float(v),
            FieldView::Double(v) => Slot::Double(v),
            FieldView::Bytes(b) => {
                let offset = self.arena.len();
                let capacity = self.arena.capacity();
                self.arena.extend_from_slice(b);
                if self.arena.capacity() != capacity {
                    tracing::trace!(
                        old = capacity,
                        new = self.arena.capacity(),
                        "row set arena grew"
                    );
                }
                Slot::Bytes {
                    offset,
                    len: b.len(),
                }
            }
            FieldView::Date(v) => Slot::Date(v),
            FieldView::DateTime(v) => Slot::DateTime(v),
            FieldView::Time(v) => Slot::Time(v),
        };
        self.slots.push(slot);
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            slots: self.slots.len(),
            arena: self.arena.len(),
        }
    }

    /// Discard everything pushed since `checkpoint` was taken.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.slots.truncate(checkpoint.slots);
        self.arena.truncate(checkpoint.arena);
    }

    /// Get a view of the row at `index`.
    pub fn row(&self, index: usize) -> Option<RowView<'_>> {
        if index >= self.len() {
            return None;
        }
        let start = index * self.num_columns;
        Some(RowView {
            set: self,
            range: start..start + self.num_columns,
        })
    }

    pub fn first(&self) -> Option<RowView<'_>> {
        self.row(0)
    }

    pub fn iter(&self) -> Rows<'_> {
        Rows {
            set: self,
            next: 0,
        }
    }

    /// Copy every row out into owned [`Row`]s.
    pub fn to_rows(&self) -> Vec<Row> {
        self.iter().map(|r| r.to_row()).collect()
    }

    fn resolve(&self, slot: Slot) -> FieldView<'_> {
        match slot {
            Slot::Null => FieldView::Null,
            Slot::Int(v) => FieldView::Int(v),
            Slot::UInt(v) => FieldView::UInt(v),
            Slot::Float(v) => FieldView::Float(v),
            Slot::Double(v) => FieldView::Double(v),
            Slot::Bytes { offset, len } => FieldView::Bytes(&self.arena[offset..offset + len]),
            Slot::Date(v) => FieldView::Date(v),
            Slot::DateTime(v) => FieldView::DateTime(v),
            Slot::Time(v) => FieldView::Time(v),
        }
    }
}

impl<'a> IntoIterator for &'a RowSet {
    type Item = RowView<'a>;
    type IntoIter = Rows<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the rows of a [`RowSet`].
#[derive(Debug, Clone)]
pub struct Rows<'a> {
    set: &'a RowSet,
    next: usize,
}

impl<'a> Iterator for Rows<'a> {
    type Item = RowView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.set.row(self.next)?;
        self.next += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.set.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Rows<'_> {}

/// A borrowed row inside a [`RowSet`].
#[derive(Debug, Clone)]
pub struct RowView<'a> {
    set: &'a RowSet,
    range: Range<usize>,
}

impl<'a> RowView<'a> {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Get the field at `index`.
    pub fn get(&self, index: usize) -> Option<FieldView<'a>> {
        if index >= self.len() {
            return None;
        }
        let slot = self.set.slots[self.range.start + index];
        Some(self.set.resolve(slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = FieldView<'a>> + '_ {
        let set = self.set;
        self.set.slots[self.range.clone()]
            .iter()
            .map(move |slot| set.resolve(*slot))
    }

    /// Copy this row into an owned [`Row`].
    pub fn to_row(&self) -> Row {
        Row(self.iter().map(|f| f.to_value()).collect())
    }
}

impl PartialEq for RowView<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl PartialEq<Row> for RowView<'_> {
    fn eq(&self, other: &Row) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == *b)
    }
}

/// An owned row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl PartialEq<RowView<'_>> for Row {
    fn eq(&self, other: &RowView<'_>) -> bool {
        other == self
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> FieldView<'_> {
        FieldView::Bytes(s.as_bytes())
    }

    #[test]
    fn test_push_and_get() {
        let mut set = RowSet::new(2);
        set.push_row(&[FieldView::Int(1), text("one")]).unwrap();
        set.push_row(&[FieldView::Null, text("two")]).unwrap();

        assert_eq!(set.len(), 2);
        let row = set.row(1).unwrap();
        assert_eq!(row.get(0), Some(FieldView::Null));
        assert_eq!(row.get(1).and_then(|f| f.as_str()), Some("two"));
        assert_eq!(row.get(2), None);
        assert!(set.row(2).is_none());
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let mut set = RowSet::new(2);
        let err = set.push_row(&[FieldView::Int(1)]).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Client(ClientErrorKind::RowShape));
        assert!(set.is_empty());
    }

    #[test]
    fn test_zero_columns_has_no_rows() {
        let mut set = RowSet::new(0);
        set.push_row(&[]).unwrap();
        assert_eq!(set.len(), 0);
        assert!(set.first().is_none());
    }

    #[test]
    fn test_growth_keeps_earlier_rows_intact() {
        let mut set = RowSet::new(2);
        set.push_row(&[text("first-row-string"), FieldView::UInt(7)])
            .unwrap();
        let snapshot = set.row(0).unwrap().to_row();
        let initial_capacity = set.arena.capacity();

        let mut i = 0u64;
        while set.arena.capacity() == initial_capacity {
            let s = format!("filler row number {i}");
            set.push_row(&[text(&s), FieldView::UInt(i)]).unwrap();
            i += 1;
        }

        assert_eq!(set.row(0).unwrap(), snapshot);
        let last = set.row(set.len() - 1).unwrap();
        assert_eq!(
            last.get(0).and_then(|f| f.as_str()),
            Some(format!("filler row number {}", i - 1).as_str())
        );
    }

    #[test]
    fn test_rollback_discards_partial_row() {
        let mut set = RowSet::new(2);
        set.push_row(&[text("a"), text("b")]).unwrap();
        let cp = set.checkpoint();
        set.push_field(text("partial"));
        set.rollback(cp);
        assert_eq!(set.len(), 1);
        set.push_row(&[text("c"), text("d")]).unwrap();
        assert_eq!(set.row(1).unwrap().get(0).and_then(|f| f.as_str()), Some("c"));
    }

    #[test]
    fn test_iter_and_to_rows() {
        let mut set = RowSet::new(1);
        for v in [1i64, 2, 3] {
            set.push_row(&[FieldView::Int(v)]).unwrap();
        }
        let ints: Vec<i64> = set
            .iter()
            .filter_map(|r| r.get(0).and_then(|f| f.as_i64()))
            .collect();
        assert_eq!(ints, vec![1, 2, 3]);
        assert_eq!(set.iter().len(), 3);
        assert_eq!(set.to_rows()[2], Row::new(vec![Value::Int(3)]));
    }

    #[test]
    fn test_reset_changes_shape() {
        let mut set = RowSet::new(1);
        set.push_row(&[FieldView::Int(1)]).unwrap();
        set.reset(3);
        assert_eq!(set.num_columns(), 3);
        assert!(set.is_empty());
    }
}
