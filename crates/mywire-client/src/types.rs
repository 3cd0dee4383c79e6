//! MySQL type system and column metadata.
//!
//! This module provides:
//! - MySQL field type codes and the [`ValueClass`] each one decodes to
//! - Column flags
//! - [`ColumnMeta`], parsed from column definition messages
//!
//! # MySQL Type System
//!
//! MySQL uses field type codes in result sets and binary protocol.
//! The encoding differs between text protocol (all strings) and
//! binary protocol (type-specific binary encoding); see [`crate::codec`].

use mywire_core::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::PacketReader;

/// How the values of a column are represented once decoded.
///
/// Both codecs dispatch on this rather than on [`FieldType`] directly, so a
/// type code only has to be classified once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    /// Integer sent in `width` bytes by the binary protocol. `unsigned_only`
    /// types ignore the column's UNSIGNED flag.
    Integer { width: u8, unsigned_only: bool },
    Float,
    Double,
    Date,
    DateTime,
    Time,
    /// Big-endian bit field of up to 64 bits.
    Bit,
    Null,
    /// Strings, blobs, decimals, JSON, and any type code this crate does
    /// not know.
    Bytes,
}

const fn int(width: u8) -> ValueClass {
    ValueClass::Integer {
        width,
        unsigned_only: false,
    }
}

macro_rules! field_types {
    ($($variant:ident = $code:literal, $name:literal, $class:expr;)*) => {
        /// MySQL field type codes (`MYSQL_TYPE_*`).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum FieldType {
            $($variant = $code,)*
        }

        impl FieldType {
            /// Map a wire type code. Unknown codes are read as strings.
            #[must_use]
            pub fn from_u8(value: u8) -> Self {
                match value {
                    $($code => FieldType::$variant,)*
                    _ => FieldType::String,
                }
            }

            /// SQL name of the type, for messages.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(FieldType::$variant => $name,)*
                }
            }

            #[must_use]
            pub const fn value_class(self) -> ValueClass {
                match self {
                    $(FieldType::$variant => $class,)*
                }
            }
        }
    };
}

field_types! {
    Decimal = 0x00, "DECIMAL", ValueClass::Bytes;
    Tiny = 0x01, "TINYINT", int(1);
    Short = 0x02, "SMALLINT", int(2);
    Long = 0x03, "INT", int(4);
    Float = 0x04, "FLOAT", ValueClass::Float;
    Double = 0x05, "DOUBLE", ValueClass::Double;
    Null = 0x06, "NULL", ValueClass::Null;
    Timestamp = 0x07, "TIMESTAMP", ValueClass::DateTime;
    LongLong = 0x08, "BIGINT", int(8);
    // Three bytes in storage, four on the wire
    Int24 = 0x09, "MEDIUMINT", int(4);
    Date = 0x0A, "DATE", ValueClass::Date;
    Time = 0x0B, "TIME", ValueClass::Time;
    DateTime = 0x0C, "DATETIME", ValueClass::DateTime;
    Year = 0x0D, "YEAR", ValueClass::Integer { width: 2, unsigned_only: true };
    NewDate = 0x0E, "DATE", ValueClass::Date;
    VarChar = 0x0F, "VARCHAR", ValueClass::Bytes;
    Bit = 0x10, "BIT", ValueClass::Bit;
    Timestamp2 = 0x11, "TIMESTAMP", ValueClass::DateTime;
    DateTime2 = 0x12, "DATETIME", ValueClass::DateTime;
    Time2 = 0x13, "TIME", ValueClass::Time;
    Json = 0xF5, "JSON", ValueClass::Bytes;
    NewDecimal = 0xF6, "DECIMAL", ValueClass::Bytes;
    Enum = 0xF7, "ENUM", ValueClass::Bytes;
    Set = 0xF8, "SET", ValueClass::Bytes;
    TinyBlob = 0xF9, "TINYBLOB", ValueClass::Bytes;
    MediumBlob = 0xFA, "MEDIUMBLOB", ValueClass::Bytes;
    LongBlob = 0xFB, "LONGBLOB", ValueClass::Bytes;
    Blob = 0xFC, "BLOB", ValueClass::Bytes;
    VarString = 0xFD, "VARCHAR", ValueClass::Bytes;
    String = 0xFE, "CHAR", ValueClass::Bytes;
    Geometry = 0xFF, "GEOMETRY", ValueClass::Bytes;
}

/// Column definition flags.
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
    pub const NO_DEFAULT_VALUE: u16 = 4096;
    pub const ON_UPDATE_NOW: u16 = 8192;
    pub const NUM: u16 = 32768;
}

/// Column metadata from a result set or a prepared statement.
///
/// Produced once per result set and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Catalog name (always "def")
    pub catalog: String,
    /// Schema (database) name
    pub schema: String,
    /// Table name (or alias)
    pub table: String,
    /// Original table name
    pub org_table: String,
    /// Column name (or alias)
    pub name: String,
    /// Original column name
    pub org_name: String,
    /// Collation id
    pub collation: u16,
    /// Column length
    pub column_length: u32,
    /// Column type
    pub column_type: FieldType,
    /// Column flags
    pub flags: u16,
    /// Number of decimals
    pub decimals: u8,
}

impl ColumnMeta {
    /// Parse a protocol 4.1 column definition message.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let catalog = reader.read_lenenc_string("column definition")?;
        let schema = reader.read_lenenc_string("column definition")?;
        let table = reader.read_lenenc_string("column definition")?;
        let org_table = reader.read_lenenc_string("column definition")?;
        let name = reader.read_lenenc_string("column definition")?;
        let org_name = reader.read_lenenc_string("column definition")?;
        // Length of the fixed-size fields, always 0x0c
        reader.read_lenenc_int("column definition")?;
        let collation = reader.read_u16_le("column definition")?;
        let column_length = reader.read_u32_le("column definition")?;
        let column_type = FieldType::from_u8(reader.read_u8("column definition")?);
        let flags = reader.read_u16_le("column definition")?;
        let decimals = reader.read_u8("column definition")?;
        reader.skip(2, "column definition")?;
        // COM_FIELD_LIST default values are never requested
        reader.finish("column definition")?;

        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            collation,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    /// Is every bit of `flag` (see [`column_flags`]) set?
    #[must_use]
    pub const fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag == flag
    }

    /// Integers of this column decode to `UInt`.
    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.has_flag(column_flags::UNSIGNED)
    }
}
