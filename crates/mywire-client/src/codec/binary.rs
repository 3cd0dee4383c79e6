//! Binary protocol codec.
//!
//! Used for rows of prepared statement results and for statement
//! parameters. Each non-NULL field has a fixed layout chosen by its column
//! type:
//!
//! | Type                         | Layout                                  |
//! |------------------------------|-----------------------------------------|
//! | TINY                         | 1 byte                                  |
//! | SHORT, YEAR                  | 2 bytes LE                              |
//! | INT24, LONG                  | 4 bytes LE                              |
//! | LONGLONG                     | 8 bytes LE                              |
//! | FLOAT / DOUBLE               | 4 / 8 bytes IEEE-754 LE                 |
//! | DATE, DATETIME, TIMESTAMP    | length byte (0, 4, 7, 11) + components  |
//! | TIME                         | length byte (0, 8, 12) + components     |
//! | everything else              | length-encoded string                   |

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

use mywire_core::{
    ClientErrorKind, Date, DateTime, Error, FieldView, Result, RowSet, Time, Value,
};

use super::{check_time_of_day, checked_date, invalid_value, out_of_range};
use crate::protocol::{PacketReader, PacketWriter};
use crate::types::{ColumnMeta, FieldType, ValueClass};

/// Bit offset of the first column in a result row NULL bitmap.
pub const ROW_BITMAP_OFFSET: usize = 2;

/// Largest day count a TIME value may carry (838:59:59 is 34 days and change).
const MAX_TIME_DAYS: u32 = 34;

/// Hours of the largest TIME the server produces, 838:59:59.
pub(crate) const MAX_TIME_HOURS: u32 = 838;

/// Flag set on a parameter type to mark it unsigned.
const UNSIGNED_PARAM_FLAG: u8 = 0x80;

/// Size of a NULL bitmap for `num_fields` fields starting at `offset`.
#[must_use]
pub const fn null_bitmap_len(num_fields: usize, offset: usize) -> usize {
    (num_fields + offset).div_ceil(8)
}

fn is_null(bitmap: &[u8], index: usize, offset: usize) -> bool {
    let bit = index + offset;
    bitmap
        .get(bit / 8)
        .is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
}

/// Decode one binary result row and append its fields to `out`.
///
/// The caller rolls back `out` if this fails.
pub fn decode_row(payload: &[u8], columns: &[ColumnMeta], out: &mut RowSet) -> Result<()> {
    let mut reader = PacketReader::new(payload);
    // Packet header, always 0x00
    reader.read_u8("binary row")?;
    let bitmap = reader.read_bytes(
        null_bitmap_len(columns.len(), ROW_BITMAP_OFFSET),
        "binary row NULL bitmap",
    )?;

    for (i, column) in columns.iter().enumerate() {
        let field = if is_null(bitmap, i, ROW_BITMAP_OFFSET) {
            FieldView::Null
        } else {
            decode_field(&mut reader, column.column_type, column.is_unsigned())?
        };
        out.push_field(field);
    }

    reader.finish("binary row")
}

/// Decode a single non-NULL field of the given type.
pub fn decode_field<'a>(
    reader: &mut PacketReader<'a>,
    ty: FieldType,
    unsigned: bool,
) -> Result<FieldView<'a>> {
    let field = match ty.value_class() {
        ValueClass::Integer {
            width,
            unsigned_only,
        } => {
            let raw = match width {
                1 => u64::from(reader.read_u8(ty.name())?),
                2 => u64::from(reader.read_u16_le(ty.name())?),
                4 => u64::from(reader.read_u32_le(ty.name())?),
                _ => reader.read_u64_le(ty.name())?,
            };
            integer(raw, width, unsigned || unsigned_only)
        }
        ValueClass::Float => {
            let v = reader.read_f32_le("FLOAT")?;
            if !v.is_finite() {
                return Err(invalid_value(ty, v));
            }
            FieldView::Float(v)
        }
        ValueClass::Double => {
            let v = reader.read_f64_le("DOUBLE")?;
            if !v.is_finite() {
                return Err(invalid_value(ty, v));
            }
            FieldView::Double(v)
        }
        ValueClass::Date => decode_date(reader)?,
        ValueClass::DateTime => decode_datetime(reader)?,
        ValueClass::Time => FieldView::Time(decode_time(reader)?),
        ValueClass::Bit => {
            let bytes = reader.read_lenenc_bytes("BIT")?;
            FieldView::UInt(bit_value(bytes).ok_or_else(|| invalid_value(ty, "more than 64 bits"))?)
        }
        ValueClass::Null => FieldView::Null,
        ValueClass::Bytes => FieldView::Bytes(reader.read_lenenc_bytes(ty.name())?),
    };
    Ok(field)
}

/// Widen a `width`-byte little-endian integer, sign-extending unless
/// `unsigned`.
fn integer(raw: u64, width: u8, unsigned: bool) -> FieldView<'static> {
    if unsigned {
        return FieldView::UInt(raw);
    }
    let shift = 64 - u32::from(width) * 8;
    FieldView::Int(((raw << shift) as i64) >> shift)
}

/// Interpret a big-endian BIT payload, `None` if it exceeds 8 bytes.
pub(crate) fn bit_value(bytes: &[u8]) -> Option<u64> {
    if bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn decode_date<'a>(reader: &mut PacketReader<'a>) -> Result<FieldView<'a>> {
    let len = reader.read_u8("DATE length")?;
    match len {
        0 => Ok(FieldView::Null),
        4 => {
            let year = reader.read_u16_le("DATE")?;
            let month = reader.read_u8("DATE")?;
            let day = reader.read_u8("DATE")?;
            Ok(checked_date(year, month, day)?.map_or(FieldView::Null, FieldView::Date))
        }
        other => Err(invalid_value(FieldType::Date, format_args!("length {other}"))),
    }
}

fn decode_datetime<'a>(reader: &mut PacketReader<'a>) -> Result<FieldView<'a>> {
    let len = reader.read_u8("DATETIME length")?;
    if !matches!(len, 0 | 4 | 7 | 11) {
        return Err(invalid_value(FieldType::DateTime, format_args!("length {len}")));
    }
    if len == 0 {
        return Ok(FieldView::Null);
    }
    let year = reader.read_u16_le("DATETIME")?;
    let month = reader.read_u8("DATETIME")?;
    let day = reader.read_u8("DATETIME")?;
    let (mut hour, mut minute, mut second, mut micros) = (0, 0, 0, 0);
    if len >= 7 {
        hour = reader.read_u8("DATETIME")?;
        minute = reader.read_u8("DATETIME")?;
        second = reader.read_u8("DATETIME")?;
    }
    if len == 11 {
        micros = reader.read_u32_le("DATETIME")?;
    }

    let date = checked_date(year, month, day)?;
    check_time_of_day(hour, minute, second, micros)?;
    match date {
        Some(date) => DateTime::from_date_time(date, hour, minute, second, micros)
            .map(FieldView::DateTime)
            .map_err(|e| out_of_range("datetime", e)),
        None => Ok(FieldView::Null),
    }
}

fn decode_time(reader: &mut PacketReader<'_>) -> Result<Time> {
    let len = reader.read_u8("TIME length")?;
    if !matches!(len, 0 | 8 | 12) {
        return Err(invalid_value(FieldType::Time, format_args!("length {len}")));
    }
    if len == 0 {
        return Ok(Time::zero());
    }
    let negative = reader.read_u8("TIME")? != 0;
    let days = reader.read_u32_le("TIME")?;
    let hour = reader.read_u8("TIME")?;
    let minute = reader.read_u8("TIME")?;
    let second = reader.read_u8("TIME")?;
    let micros = if len == 12 {
        reader.read_u32_le("TIME")?
    } else {
        0
    };

    if days > MAX_TIME_DAYS {
        return Err(out_of_range("time", format_args!("{days} days")));
    }
    check_time_of_day(hour, minute, second, micros)?;
    let hours = days * 24 + u32::from(hour);
    if hours > MAX_TIME_HOURS {
        return Err(out_of_range("time", format_args!("{hours} hours")));
    }
    Time::new(negative, hours, minute, second, micros).map_err(|e| out_of_range("time", e))
}

// ==================== Encoding ====================

/// Reject values that have no representation on the wire.
///
/// Called for every parameter before anything is serialized, so a bad
/// parameter never leaves a half-written message behind.
pub fn validate_param(value: &Value) -> Result<()> {
    let finite = match value {
        Value::Float(f) => f.is_finite(),
        Value::Double(d) => d.is_finite(),
        _ => true,
    };
    if finite {
        Ok(())
    } else {
        Err(Error::client(
            ClientErrorKind::InvalidValue,
            format!("{value:?} cannot be sent to the server"),
        ))
    }
}

/// Wire type and unsigned flag used to send a parameter.
#[must_use]
pub fn param_type(value: &Value) -> (FieldType, bool) {
    match value {
        Value::Null => (FieldType::Null, false),
        Value::Int(_) => (FieldType::LongLong, false),
        Value::UInt(_) => (FieldType::LongLong, true),
        Value::Float(_) => (FieldType::Float, false),
        Value::Double(_) => (FieldType::Double, false),
        Value::Bytes(_) => (FieldType::String, false),
        Value::Date(_) => (FieldType::Date, false),
        Value::DateTime(_) => (FieldType::DateTime, false),
        Value::Time(_) => (FieldType::Time, false),
    }
}

/// Write the `(type, flags)` pair announcing a parameter.
pub fn write_param_type(value: &Value, w: &mut PacketWriter<'_>) {
    let (ty, unsigned) = param_type(value);
    w.write_u8(ty as u8);
    w.write_u8(if unsigned { UNSIGNED_PARAM_FLAG } else { 0 });
}

/// Write a non-NULL parameter value in its natural width.
pub fn write_param(value: &Value, w: &mut PacketWriter<'_>) {
    match value {
        Value::Null => {}
        Value::Int(v) => w.write_u64_le(*v as u64),
        Value::UInt(v) => w.write_u64_le(*v),
        Value::Float(v) => w.write_f32_le(*v),
        Value::Double(v) => w.write_f64_le(*v),
        Value::Bytes(b) => w.write_lenenc_bytes(b),
        Value::Date(d) => write_date(*d, w),
        Value::DateTime(dt) => write_datetime(*dt, w),
        Value::Time(t) => write_time(*t, w),
    }
}

/// Encode `field` as a value of column type `ty`.
///
/// This is the inverse of [`decode_field`]. Integers are truncated to the
/// column width; a field whose variant does not fit the column type is a
/// client error.
pub fn encode_field(
    field: FieldView<'_>,
    ty: FieldType,
    w: &mut PacketWriter<'_>,
) -> Result<()> {
    let int = |field: FieldView<'_>| match field {
        FieldView::Int(v) => Some(v as u64),
        FieldView::UInt(v) => Some(v),
        _ => None,
    };
    let mismatch = || {
        Error::client(
            ClientErrorKind::InvalidValue,
            format!("cannot encode {} as {}", field.kind().name(), ty.name()),
        )
    };

    match ty.value_class() {
        ValueClass::Integer { width, .. } => {
            let v = int(field).ok_or_else(mismatch)?;
            match width {
                1 => w.write_u8(v as u8),
                2 => w.write_u16_le(v as u16),
                4 => w.write_u32_le(v as u32),
                _ => w.write_u64_le(v),
            }
        }
        ValueClass::Float => match field {
            FieldView::Float(v) if v.is_finite() => w.write_f32_le(v),
            _ => return Err(mismatch()),
        },
        ValueClass::Double => match field {
            FieldView::Double(v) if v.is_finite() => w.write_f64_le(v),
            _ => return Err(mismatch()),
        },
        ValueClass::Date => match field {
            FieldView::Date(d) => write_date(d, w),
            _ => return Err(mismatch()),
        },
        ValueClass::DateTime => match field {
            FieldView::DateTime(dt) => write_datetime(dt, w),
            _ => return Err(mismatch()),
        },
        ValueClass::Time => match field {
            FieldView::Time(t) => write_time(t, w),
            _ => return Err(mismatch()),
        },
        ValueClass::Bit => {
            let v = int(field).ok_or_else(mismatch)?;
            let bytes = v.to_be_bytes();
            let skip = (v.leading_zeros() / 8).min(7) as usize;
            w.write_lenenc_bytes(&bytes[skip..]);
        }
        ValueClass::Null => {}
        ValueClass::Bytes => match field {
            FieldView::Bytes(b) => w.write_lenenc_bytes(b),
            _ => return Err(mismatch()),
        },
    }
    Ok(())
}

fn write_date(date: Date, w: &mut PacketWriter<'_>) {
    if date.is_zero() {
        w.write_u8(0);
        return;
    }
    w.write_u8(4);
    w.write_u16_le(date.year());
    w.write_u8(date.month());
    w.write_u8(date.day());
}

fn write_datetime(dt: DateTime, w: &mut PacketWriter<'_>) {
    let len: u8 = if dt.microsecond() != 0 {
        11
    } else if !dt.is_midnight() {
        7
    } else if !dt.date().is_zero() {
        4
    } else {
        0
    };
    w.write_u8(len);
    if len >= 4 {
        let date = dt.date();
        w.write_u16_le(date.year());
        w.write_u8(date.month());
        w.write_u8(date.day());
    }
    if len >= 7 {
        w.write_u8(dt.hour());
        w.write_u8(dt.minute());
        w.write_u8(dt.second());
    }
    if len == 11 {
        w.write_u32_le(dt.microsecond());
    }
}

fn write_time(time: Time, w: &mut PacketWriter<'_>) {
    let len: u8 = if time.microseconds() != 0 {
        12
    } else if time.as_micros() != 0 {
        8
    } else {
        0
    };
    w.write_u8(len);
    if len == 0 {
        return;
    }
    w.write_u8(u8::from(time.is_negative()));
    w.write_u32_le(time.days());
    w.write_u8(time.hours());
    w.write_u8(time.minutes());
    w.write_u8(time.seconds());
    if len == 12 {
        w.write_u32_le(time.microseconds());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::column;
    use mywire_core::{ErrorCode, ProtocolErrorKind};

    fn decode(bytes: &[u8], ty: FieldType, unsigned: bool) -> Result<FieldView<'_>> {
        let mut reader = PacketReader::new(bytes);
        let field = decode_field(&mut reader, ty, unsigned)?;
        reader.finish("field")?;
        Ok(field)
    }

    fn encode(field: FieldView<'_>, ty: FieldType) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_field(field, ty, &mut PacketWriter::new(&mut buf)).unwrap();
        buf
    }

    fn protocol_kind(result: Result<FieldView<'_>>) -> ProtocolErrorKind {
        match result.unwrap_err().code() {
            ErrorCode::Protocol(kind) => kind,
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn test_integer_signedness() {
        assert_eq!(decode(&[0xFF], FieldType::Tiny, false).unwrap(), FieldView::Int(-1));
        assert_eq!(decode(&[0xFF], FieldType::Tiny, true).unwrap(), FieldView::UInt(255));
        assert_eq!(
            decode(&[0xFE, 0xFF], FieldType::Short, false).unwrap(),
            FieldView::Int(-2)
        );
        assert_eq!(
            decode(&[0xE5, 0x07], FieldType::Year, false).unwrap(),
            FieldView::UInt(2021)
        );
        assert_eq!(
            decode(&[0xFF, 0xFF, 0xFF, 0xFF], FieldType::Int24, true).unwrap(),
            FieldView::UInt(u64::from(u32::MAX))
        );
        assert_eq!(
            decode(&[0xFF; 8], FieldType::LongLong, false).unwrap(),
            FieldView::Int(-1)
        );
        assert_eq!(
            decode(&[0xFF; 8], FieldType::LongLong, true).unwrap(),
            FieldView::UInt(u64::MAX)
        );
    }

    #[test]
    fn test_integer_reencode_is_identity() {
        let cases: &[(FieldType, usize)] = &[
            (FieldType::Tiny, 1),
            (FieldType::Short, 2),
            (FieldType::Int24, 4),
            (FieldType::Long, 4),
            (FieldType::LongLong, 8),
        ];
        for &(ty, width) in cases {
            for unsigned in [false, true] {
                for fill in [0x00u8, 0x01, 0x7F, 0x80, 0xFE, 0xFF] {
                    let mut bytes = vec![fill; width];
                    bytes[0] ^= 0x5A;
                    let field = decode(&bytes, ty, unsigned).unwrap();
                    assert_eq!(encode(field, ty), bytes, "{ty:?} unsigned={unsigned}");
                }
            }
        }
    }

    #[test]
    fn test_floats_reject_non_finite() {
        assert_eq!(
            decode(&1.5f32.to_le_bytes(), FieldType::Float, false).unwrap(),
            FieldView::Float(1.5)
        );
        assert_eq!(
            decode(&(-2.25f64).to_le_bytes(), FieldType::Double, false).unwrap(),
            FieldView::Double(-2.25)
        );
        assert_eq!(
            protocol_kind(decode(&f32::NAN.to_le_bytes(), FieldType::Float, false)),
            ProtocolErrorKind::InvalidValue
        );
        assert_eq!(
            protocol_kind(decode(&f64::INFINITY.to_le_bytes(), FieldType::Double, false)),
            ProtocolErrorKind::InvalidValue
        );
    }

    #[test]
    fn test_date_decoding() {
        assert_eq!(
            decode(&[4, 0xE5, 0x07, 3, 14], FieldType::Date, false).unwrap(),
            FieldView::Date(Date::new(2021, 3, 14).unwrap())
        );
        assert_eq!(decode(&[0], FieldType::Date, false).unwrap(), FieldView::Null);
        // Zero date and non-calendar dates are NULL
        assert_eq!(
            decode(&[4, 0, 0, 0, 0], FieldType::Date, false).unwrap(),
            FieldView::Null
        );
        assert_eq!(
            decode(&[4, 0xE5, 0x07, 2, 30], FieldType::Date, false).unwrap(),
            FieldView::Null
        );
        assert_eq!(
            protocol_kind(decode(&[4, 0xE5, 0x07, 13, 1], FieldType::Date, false)),
            ProtocolErrorKind::ValueOutOfRange
        );
        assert_eq!(
            protocol_kind(decode(&[4, 0xE5, 0x07, 1, 32], FieldType::Date, false)),
            ProtocolErrorKind::ValueOutOfRange
        );
        assert_eq!(
            protocol_kind(decode(&[4, 0x10, 0x27, 1, 1], FieldType::Date, false)),
            ProtocolErrorKind::ValueOutOfRange
        );
        assert_eq!(
            protocol_kind(decode(&[5, 0xE5, 0x07, 1, 1, 0], FieldType::Date, false)),
            ProtocolErrorKind::InvalidValue
        );
        assert_eq!(
            protocol_kind(decode(&[4, 0xE5, 0x07], FieldType::Date, false)),
            ProtocolErrorKind::IncompleteMessage
        );
    }

    #[test]
    fn test_datetime_decoding() {
        let full = [11, 0xE5, 0x07, 3, 14, 15, 9, 26, 0x40, 0xE2, 0x01, 0x00];
        assert_eq!(
            decode(&full, FieldType::DateTime, false).unwrap(),
            FieldView::DateTime(DateTime::new(2021, 3, 14, 15, 9, 26, 123_456).unwrap())
        );
        assert_eq!(
            decode(&[7, 0xE5, 0x07, 3, 14, 15, 9, 26], FieldType::Timestamp, false).unwrap(),
            FieldView::DateTime(DateTime::new(2021, 3, 14, 15, 9, 26, 0).unwrap())
        );
        assert_eq!(
            decode(&[4, 0xE5, 0x07, 3, 14], FieldType::DateTime, false).unwrap(),
            FieldView::DateTime(DateTime::new(2021, 3, 14, 0, 0, 0, 0).unwrap())
        );
        assert_eq!(decode(&[0], FieldType::DateTime, false).unwrap(), FieldView::Null);
        assert_eq!(
            decode(&[7, 0, 0, 0, 0, 10, 0, 0], FieldType::DateTime, false).unwrap(),
            FieldView::Null
        );
        assert_eq!(
            protocol_kind(decode(&[7, 0xE5, 0x07, 3, 14, 24, 0, 0], FieldType::DateTime, false)),
            ProtocolErrorKind::ValueOutOfRange
        );
        assert_eq!(
            protocol_kind(decode(&[7, 0xE5, 0x07, 3, 14, 255, 0, 0], FieldType::DateTime, false)),
            ProtocolErrorKind::ValueOutOfRange
        );
        // Out-of-range time on an otherwise NULL date is still an error
        assert_eq!(
            protocol_kind(decode(&[7, 0, 0, 0, 0, 10, 60, 0], FieldType::DateTime, false)),
            ProtocolErrorKind::ValueOutOfRange
        );
    }

    #[test]
    fn test_time_decoding() {
        assert_eq!(decode(&[0], FieldType::Time, false).unwrap(), FieldView::Time(Time::zero()));
        let t = decode(&[8, 1, 2, 0, 0, 0, 3, 4, 5], FieldType::Time, false)
            .unwrap()
            .as_time()
            .unwrap();
        assert!(t.is_negative());
        assert_eq!(t.total_hours(), 51);
        assert_eq!((t.minutes(), t.seconds()), (4, 5));

        let t = decode(
            &[12, 0, 0, 0, 0, 0, 23, 59, 59, 0x3F, 0x42, 0x0F, 0x00],
            FieldType::Time,
            false,
        )
        .unwrap()
        .as_time()
        .unwrap();
        assert_eq!(t.microseconds(), 999_999);

        assert_eq!(
            protocol_kind(decode(&[8, 0, 35, 0, 0, 0, 0, 0, 0], FieldType::Time, false)),
            ProtocolErrorKind::ValueOutOfRange
        );
    }

    #[test]
    fn test_time_limit_matches_text_protocol() {
        let t = decode(&[8, 1, 34, 0, 0, 0, 22, 59, 59], FieldType::Time, false)
            .unwrap()
            .as_time()
            .unwrap();
        assert!(t.is_negative());
        assert_eq!(t.total_hours(), 838);
        // 34 days and 23 hours is 839:00:00
        assert_eq!(
            protocol_kind(decode(&[8, 0, 34, 0, 0, 0, 23, 0, 0], FieldType::Time, false)),
            ProtocolErrorKind::ValueOutOfRange
        );
        assert_eq!(
            protocol_kind(crate::codec::text::decode_field(b"839:00:00", FieldType::Time, false)),
            ProtocolErrorKind::ValueOutOfRange
        );
    }

    #[test]
    fn test_time_component_limits() {
        assert_eq!(
            protocol_kind(decode(&[8, 0, 0, 0, 0, 0, 24, 0, 0], FieldType::Time, false)),
            ProtocolErrorKind::ValueOutOfRange
        );
        assert_eq!(
            protocol_kind(decode(&[9, 0, 0, 0, 0, 0, 1, 0, 0, 0], FieldType::Time, false)),
            ProtocolErrorKind::InvalidValue
        );
    }

    #[test]
    fn test_temporal_reencode() {
        let dt = DateTime::new(2021, 3, 14, 15, 9, 26, 123_456).unwrap();
        let bytes = encode(FieldView::DateTime(dt), FieldType::DateTime);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode(&bytes, FieldType::DateTime, false).unwrap(), FieldView::DateTime(dt));

        let t = Time::new(true, 50, 1, 2, 3).unwrap();
        let bytes = encode(FieldView::Time(t), FieldType::Time);
        assert_eq!(bytes.len(), 13);
        assert_eq!(decode(&bytes, FieldType::Time, false).unwrap(), FieldView::Time(t));

        let midnight = DateTime::new(2020, 1, 1, 0, 0, 0, 0).unwrap();
        assert_eq!(encode(FieldView::DateTime(midnight), FieldType::DateTime).len(), 5);
    }

    #[test]
    fn test_strings_and_bits() {
        assert_eq!(
            decode(b"\x05hello", FieldType::VarString, false).unwrap(),
            FieldView::Bytes(b"hello")
        );
        // Length prefix shorter than the data leaves extra bytes
        assert!(decode(b"\x0312.50", FieldType::NewDecimal, false).is_err());
        assert_eq!(
            decode(&[2, 0x01, 0x02], FieldType::Bit, false).unwrap(),
            FieldView::UInt(0x0102)
        );
        assert_eq!(encode(FieldView::UInt(0x0102), FieldType::Bit), [2, 0x01, 0x02]);
        assert_eq!(encode(FieldView::UInt(0), FieldType::Bit), [1, 0]);
        assert!(decode(&[9, 1, 2, 3, 4, 5, 6, 7, 8, 9], FieldType::Bit, false).is_err());
    }

    #[test]
    fn test_decode_row_with_nulls() {
        let columns = vec![
            column(FieldType::LongLong, false),
            column(FieldType::VarString, false),
            column(FieldType::Tiny, true),
        ];
        // Header, bitmap with column 1 NULL (bit 3), then columns 0 and 2
        let mut payload = vec![0x00, 0b0000_1000];
        payload.extend_from_slice(&42u64.to_le_bytes());
        payload.push(7);

        let mut set = RowSet::new(3);
        decode_row(&payload, &columns, &mut set).unwrap();
        let row = set.row(0).unwrap();
        assert_eq!(row.get(0), Some(FieldView::Int(42)));
        assert_eq!(row.get(1), Some(FieldView::Null));
        assert_eq!(row.get(2), Some(FieldView::UInt(7)));
    }

    #[test]
    fn test_decode_row_length_errors() {
        let columns = vec![column(FieldType::Long, false)];
        let mut set = RowSet::new(1);

        let short = [0x00, 0x00, 0x01, 0x00];
        let err = decode_row(&short, &columns, &mut set).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Protocol(ProtocolErrorKind::IncompleteMessage));

        let long = [0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0xAA];
        let err = decode_row(&long, &columns, &mut set).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Protocol(ProtocolErrorKind::ExtraBytes));
    }

    #[test]
    fn test_params() {
        assert!(validate_param(&Value::Double(f64::NAN)).is_err());
        assert!(validate_param(&Value::Float(f32::NEG_INFINITY)).is_err());
        assert!(validate_param(&Value::Double(1.0)).is_ok());
        assert_eq!(
            validate_param(&Value::Float(f32::NAN)).unwrap_err().code(),
            ErrorCode::Client(ClientErrorKind::InvalidValue)
        );

        assert_eq!(param_type(&Value::UInt(1)), (FieldType::LongLong, true));
        assert_eq!(param_type(&Value::from("x")), (FieldType::String, false));

        let mut buf = Vec::new();
        let mut w = PacketWriter::new(&mut buf);
        write_param_type(&Value::UInt(5), &mut w);
        write_param(&Value::UInt(5), &mut w);
        write_param_type(&Value::from("ab"), &mut w);
        write_param(&Value::from("ab"), &mut w);
        assert_eq!(
            buf,
            [0x08, 0x80, 5, 0, 0, 0, 0, 0, 0, 0, 0xFE, 0x00, 2, b'a', b'b']
        );
    }

    #[test]
    fn test_null_bitmap_len() {
        assert_eq!(null_bitmap_len(0, 2), 1);
        assert_eq!(null_bitmap_len(6, 2), 1);
        assert_eq!(null_bitmap_len(7, 2), 2);
        assert_eq!(null_bitmap_len(8, 0), 1);
        assert_eq!(null_bitmap_len(9, 0), 2);
    }
}
