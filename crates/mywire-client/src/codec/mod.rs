//! Value codecs.
//!
//! Rows arrive in one of two encodings:
//!
//! - **Text** (`COM_QUERY` results): every field is a length-encoded string,
//!   or the single byte 0xFB for NULL, and is parsed according to its
//!   column type.
//! - **Binary** (`COM_STMT_EXECUTE` results): a header byte, a NULL bitmap
//!   and a type-specific encoding per non-NULL field.
//!
//! Both decoders write into a [`RowSet`]. A row that fails to decode is
//! rolled back so the set never holds a partial row.

pub mod binary;
pub mod text;

use mywire_core::{Error, FieldView, ProtocolErrorKind, Result, RowSet};

use crate::types::{ColumnMeta, FieldType};

/// Row encoding of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Text,
    Binary,
}

/// Decode one row message and append it to `out`.
pub fn decode_row(
    encoding: Encoding,
    payload: &[u8],
    columns: &[ColumnMeta],
    out: &mut RowSet,
) -> Result<()> {
    let checkpoint = out.checkpoint();
    let result = match encoding {
        Encoding::Text => text::decode_row(payload, columns, out),
        Encoding::Binary => binary::decode_row(payload, columns, out),
    };
    if result.is_err() {
        out.rollback(checkpoint);
    }
    result
}

/// Parse a JSON column value.
///
/// Returns `Ok(None)` for NULL. Non-string fields are not JSON columns and
/// are rejected.
pub fn json_value(field: FieldView<'_>) -> Result<Option<serde_json::Value>> {
    match field {
        FieldView::Null => Ok(None),
        FieldView::Bytes(b) => serde_json::from_slice(b).map(Some).map_err(|e| {
            Error::protocol(
                ProtocolErrorKind::InvalidValue,
                format!("invalid JSON value: {e}"),
            )
        }),
        other => Err(Error::protocol(
            ProtocolErrorKind::InvalidValue,
            format!("{} is not a JSON value", other.kind().name()),
        )),
    }
}

pub(crate) fn out_of_range(what: &str, detail: impl std::fmt::Display) -> Error {
    Error::protocol(
        ProtocolErrorKind::ValueOutOfRange,
        format!("{what} value out of range: {detail}"),
    )
}

pub(crate) fn invalid_value(ty: FieldType, detail: impl std::fmt::Display) -> Error {
    Error::protocol(
        ProtocolErrorKind::InvalidValue,
        format!("invalid {} value: {detail}", ty.name()),
    )
}

/// Check raw temporal components against their absolute maximums and
/// build the date part.
///
/// Components beyond what any MySQL value can hold are a protocol error.
/// A zero date, a partially zero date or a date that does not exist in
/// the calendar yields `None`, which decodes to NULL.
pub(crate) fn checked_date(
    year: u16,
    month: u8,
    day: u8,
) -> Result<Option<mywire_core::Date>> {
    if year > 9999 || month > 12 || day > 31 {
        return Err(out_of_range(
            "date",
            format_args!("{year:04}-{month:02}-{day:02}"),
        ));
    }
    if month == 0 || day == 0 || day > mywire_core::temporal::days_in_month(year, month) {
        return Ok(None);
    }
    mywire_core::Date::new(year, month, day)
        .map(Some)
        .map_err(|e| out_of_range("date", e))
}

pub(crate) fn check_time_of_day(hour: u8, minute: u8, second: u8, micros: u32) -> Result<()> {
    if hour > 23 || minute > 59 || second > 59 || micros > 999_999 {
        return Err(out_of_range(
            "time",
            format_args!("{hour:02}:{minute:02}:{second:02}.{micros:06}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_value() {
        let v = json_value(FieldView::Bytes(br#"{"a":[1,2]}"#)).unwrap().unwrap();
        assert_eq!(v["a"][1], 2);
        assert!(json_value(FieldView::Null).unwrap().is_none());
        assert!(json_value(FieldView::Bytes(b"{nope")).is_err());
        assert!(json_value(FieldView::Int(1)).is_err());
    }

    #[test]
    fn test_checked_date_rules() {
        assert!(checked_date(2021, 2, 28).unwrap().is_some());
        assert!(checked_date(2021, 2, 30).unwrap().is_none());
        assert!(checked_date(0, 0, 0).unwrap().is_none());
        assert!(checked_date(2021, 0, 10).unwrap().is_none());
        assert!(checked_date(2021, 13, 1).is_err());
        assert!(checked_date(2021, 1, 32).is_err());
        assert!(checked_date(10000, 1, 1).is_err());
    }

    #[test]
    fn test_failed_row_is_rolled_back() {
        let columns = vec![crate::testing::column(FieldType::LongLong, false)];
        let mut set = RowSet::new(1);
        decode_row(Encoding::Text, &[1, b'7'], &columns, &mut set).unwrap();
        assert!(decode_row(Encoding::Text, &[2, b'x'], &columns, &mut set).is_err());
        assert_eq!(set.len(), 1);
        assert_eq!(set.row(0).unwrap().get(0), Some(FieldView::Int(7)));
    }
}
