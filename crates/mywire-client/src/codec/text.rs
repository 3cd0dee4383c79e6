//! Text protocol codec.
//!
//! In text result rows every value is sent as a length-encoded string
//! (0xFB for NULL). Numbers and temporal values are parsed from their
//! canonical server formatting; everything else stays as bytes.

#![allow(clippy::cast_possible_truncation)]

use mywire_core::{FieldView, Result, RowSet, Time};

use super::binary::{MAX_TIME_HOURS, bit_value};
use super::{check_time_of_day, checked_date, invalid_value, out_of_range};
use crate::protocol::PacketReader;
use crate::types::{ColumnMeta, FieldType, ValueClass};

/// Marker byte for a NULL value in a text row.
pub const NULL_MARKER: u8 = 0xFB;

/// Decode one text result row and append its fields to `out`.
pub fn decode_row(payload: &[u8], columns: &[ColumnMeta], out: &mut RowSet) -> Result<()> {
    let mut reader = PacketReader::new(payload);
    for column in columns {
        let field = if reader.peek() == Some(NULL_MARKER) {
            reader.skip(1, "text row")?;
            FieldView::Null
        } else {
            let bytes = reader.read_lenenc_bytes("text row")?;
            decode_field(bytes, column.column_type, column.is_unsigned())?
        };
        out.push_field(field);
    }
    reader.finish("text row")
}

/// Parse the textual representation of a non-NULL field.
pub fn decode_field(bytes: &[u8], ty: FieldType, unsigned: bool) -> Result<FieldView<'_>> {
    let field = match ty.value_class() {
        ValueClass::Integer { unsigned_only, .. } => {
            let s = ascii(bytes, ty)?;
            if unsigned || unsigned_only {
                FieldView::UInt(s.parse().map_err(|_| invalid_value(ty, s))?)
            } else {
                FieldView::Int(s.parse().map_err(|_| invalid_value(ty, s))?)
            }
        }
        ValueClass::Float => {
            let s = ascii(bytes, ty)?;
            let v: f32 = s.parse().map_err(|_| invalid_value(ty, s))?;
            if !v.is_finite() {
                return Err(invalid_value(ty, s));
            }
            FieldView::Float(v)
        }
        ValueClass::Double => {
            let s = ascii(bytes, ty)?;
            let v: f64 = s.parse().map_err(|_| invalid_value(ty, s))?;
            if !v.is_finite() {
                return Err(invalid_value(ty, s));
            }
            FieldView::Double(v)
        }
        ValueClass::Date => {
            let s = ascii(bytes, ty)?;
            let (year, month, day) = parse_date(s).ok_or_else(|| invalid_value(ty, s))?;
            checked_date(year, month, day)?.map_or(FieldView::Null, FieldView::Date)
        }
        ValueClass::DateTime => parse_datetime(ascii(bytes, ty)?, ty)?,
        ValueClass::Time => FieldView::Time(parse_time(ascii(bytes, ty)?, ty)?),
        ValueClass::Bit => {
            FieldView::UInt(bit_value(bytes).ok_or_else(|| invalid_value(ty, "more than 64 bits"))?)
        }
        ValueClass::Null => FieldView::Null,
        ValueClass::Bytes => FieldView::Bytes(bytes),
    };
    Ok(field)
}

fn ascii(bytes: &[u8], ty: FieldType) -> Result<&str> {
    std::str::from_utf8(bytes)
        .ok()
        .filter(|s| s.is_ascii())
        .ok_or_else(|| invalid_value(ty, "non-ASCII text"))
}

/// Parse exactly `n` ASCII digits.
fn digits<T: std::str::FromStr>(s: &str, n: usize) -> Option<T> {
    if s.len() == n && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// `YYYY-MM-DD`
fn parse_date(s: &str) -> Option<(u16, u8, u8)> {
    let mut parts = s.split('-');
    let year = digits(parts.next()?, 4)?;
    let month = digits(parts.next()?, 2)?;
    let day = digits(parts.next()?, 2)?;
    if parts.next().is_some() {
        return None;
    }
    Some((year, month, day))
}

/// `.ffffff` with one to six digits, scaled to microseconds.
fn parse_fraction(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u32 = s.parse().ok()?;
    Some(value * 10u32.pow(6 - s.len() as u32))
}

/// `HH:MM:SS[.ffffff]`, hours of arbitrary width.
fn parse_clock(s: &str) -> Option<(u32, u8, u8, u32)> {
    let (whole, micros) = match s.split_once('.') {
        Some((whole, frac)) => (whole, parse_fraction(frac)?),
        None => (s, 0),
    };
    let mut parts = whole.split(':');
    let hours = parts.next()?;
    if hours.is_empty() || !hours.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours = hours.parse().ok()?;
    let minutes = digits(parts.next()?, 2)?;
    let seconds = digits(parts.next()?, 2)?;
    if parts.next().is_some() {
        return None;
    }
    Some((hours, minutes, seconds, micros))
}

fn parse_datetime(s: &str, ty: FieldType) -> Result<FieldView<'_>> {
    let (date, clock) = s.split_once(' ').ok_or_else(|| invalid_value(ty, s))?;
    let (year, month, day) = parse_date(date).ok_or_else(|| invalid_value(ty, s))?;
    let (hour, minute, second, micros) = parse_clock(clock)
        .filter(|(h, ..)| clock.find(':') == Some(2) && *h <= u32::from(u8::MAX))
        .ok_or_else(|| invalid_value(ty, s))?;
    let hour = hour as u8;

    let date = checked_date(year, month, day)?;
    check_time_of_day(hour, minute, second, micros)?;
    match date {
        Some(date) => mywire_core::DateTime::from_date_time(date, hour, minute, second, micros)
            .map(FieldView::DateTime)
            .map_err(|e| out_of_range("datetime", e)),
        None => Ok(FieldView::Null),
    }
}

fn parse_time(s: &str, ty: FieldType) -> Result<Time> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (hours, minutes, seconds, micros) = parse_clock(rest).ok_or_else(|| invalid_value(ty, s))?;
    if hours > MAX_TIME_HOURS || minutes > 59 || seconds > 59 {
        return Err(out_of_range("time", s));
    }
    Time::new(negative, hours, minutes, seconds, micros).map_err(|e| out_of_range("time", e))
}
