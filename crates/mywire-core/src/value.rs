//! Dynamic SQL values.
//!
//! [`Value`] owns its data and is what callers bind as statement parameters.
//! [`FieldView`] is the borrowed counterpart returned when reading rows: its
//! string/blob variant points into a buffer owned by someone else (a row set
//! or the connection's read buffer). Copying a `FieldView` never copies
//! bytes; call [`FieldView::to_value`] to get an owned copy.

use serde::{Deserialize, Serialize};

use crate::temporal::{Date, DateTime, Time};

/// An owned SQL value.
///
/// Strings and blobs share the `Bytes` representation: MySQL transmits both
/// as length-prefixed byte strings and the column metadata tells them apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Signed integer of any width
    Int(i64),

    /// Unsigned integer of any width
    UInt(u64),

    /// 32-bit floating point
    Float(f32),

    /// 64-bit floating point
    Double(f64),

    /// String or blob data
    Bytes(Vec<u8>),

    /// Calendar date
    Date(Date),

    /// Date and time of day
    DateTime(DateTime),

    /// Signed duration
    Time(Time),
}

/// A borrowed SQL value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldView<'a> {
    Null,
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Bytes(&'a [u8]),
    Date(Date),
    DateTime(DateTime),
    Time(Time),
}

/// Discriminant shared by [`Value`] and [`FieldView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Int,
    UInt,
    Float,
    Double,
    Bytes,
    Date,
    DateTime,
    Time,
}

impl Kind {
    pub const fn name(self) -> &'static str {
        match self {
            Kind::Null => "NULL",
            Kind::Int => "INT",
            Kind::UInt => "UNSIGNED INT",
            Kind::Float => "FLOAT",
            Kind::Double => "DOUBLE",
            Kind::Bytes => "BYTES",
            Kind::Date => "DATE",
            Kind::DateTime => "DATETIME",
            Kind::Time => "TIME",
        }
    }
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind(&self) -> Kind {
        self.as_view().kind()
    }

    /// Borrow this value as a [`FieldView`].
    pub fn as_view(&self) -> FieldView<'_> {
        match self {
            Value::Null => FieldView::Null,
            Value::Int(v) => FieldView::Int(*v),
            Value::UInt(v) => FieldView::UInt(*v),
            Value::Float(v) => FieldView::Float(*v),
            Value::Double(v) => FieldView::Double(*v),
            Value::Bytes(v) => FieldView::Bytes(v),
            Value::Date(v) => FieldView::Date(*v),
            Value::DateTime(v) => FieldView::DateTime(*v),
            Value::Time(v) => FieldView::Time(*v),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_view().as_i64()
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_view().as_u64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_view().as_f64()
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Try to get this value as a UTF-8 string.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }
}

impl<'a> FieldView<'a> {
    pub const fn is_null(&self) -> bool {
        matches!(self, FieldView::Null)
    }

    pub const fn kind(&self) -> Kind {
        match self {
            FieldView::Null => Kind::Null,
            FieldView::Int(_) => Kind::Int,
            FieldView::UInt(_) => Kind::UInt,
            FieldView::Float(_) => Kind::Float,
            FieldView::Double(_) => Kind::Double,
            FieldView::Bytes(_) => Kind::Bytes,
            FieldView::Date(_) => Kind::Date,
            FieldView::DateTime(_) => Kind::DateTime,
            FieldView::Time(_) => Kind::Time,
        }
    }

    /// Copy the referenced data into an owned [`Value`].
    pub fn to_value(&self) -> Value {
        match *self {
            FieldView::Null => Value::Null,
            FieldView::Int(v) => Value::Int(v),
            FieldView::UInt(v) => Value::UInt(v),
            FieldView::Float(v) => Value::Float(v),
            FieldView::Double(v) => Value::Double(v),
            FieldView::Bytes(v) => Value::Bytes(v.to_vec()),
            FieldView::Date(v) => Value::Date(v),
            FieldView::DateTime(v) => Value::DateTime(v),
            FieldView::Time(v) => Value::Time(v),
        }
    }

    /// Integer value, converting unsigned values that fit.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldView::Int(v) => Some(v),
            FieldView::UInt(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Unsigned value, converting non-negative signed values.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            FieldView::UInt(v) => Some(v),
            FieldView::Int(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            FieldView::Float(v) => Some(f64::from(v)),
            FieldView::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            FieldView::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_date(&self) -> Option<Date> {
        match *self {
            FieldView::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime> {
        match *self {
            FieldView::DateTime(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<Time> {
        match *self {
            FieldView::Time(t) => Some(t),
            _ => None,
        }
    }
}

impl PartialEq<Value> for FieldView<'_> {
    fn eq(&self, other: &Value) -> bool {
        *self == other.as_view()
    }
}

impl PartialEq<FieldView<'_>> for Value {
    fn eq(&self, other: &FieldView<'_>) -> bool {
        self.as_view() == *other
    }
}

impl<'a> From<&'a Value> for FieldView<'a> {
    fn from(v: &'a Value) -> Self {
        v.as_view()
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::UInt(u64::from(v))
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64);
impl_from_unsigned!(u8, u16, u32, u64);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Bytes(v.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Date> for Value {
    fn from(v: Date) -> Self {
        Value::Date(v)
    }
}

impl From<DateTime> for Value {
    fn from(v: DateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Time> for Value {
    fn from(v: Time) -> Self {
        Value::Time(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
