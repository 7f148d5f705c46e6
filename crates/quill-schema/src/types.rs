//! Semantic field types and default values.

use serde::{Deserialize, Serialize};

/// Semantic type of a stored field.
///
/// Dialects map each variant to a concrete column type. Length limits are
/// carried separately in [`Field::max_length`](crate::Field::max_length).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Variable length string. Requires a maximum length.
    VarChar,
    /// Binary blob, optionally length limited.
    VarBinary,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// Single precision float.
    Float,
    /// Double precision float.
    Double,
    /// Boolean.
    Boolean,
    /// Calendar date.
    Date,
    /// Date and time without zone.
    DateTime,
    /// Date and time with zone.
    Timestamp,
    /// Time of day.
    Time,
    /// Named enumeration stored as one of a closed set of strings.
    Choices {
        /// Enumeration name.
        name: String,
        /// String encodings of the variants, in declaration order.
        values: Vec<String>,
    },
}

impl FieldType {
    /// Returns whether this is one of the integer types.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// Returns whether this is a floating point type.
    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Returns whether this is a date or time type.
    #[must_use]
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            Self::Date | Self::DateTime | Self::Timestamp | Self::Time
        )
    }

    /// Returns whether a maximum length may be attached to this type.
    #[must_use]
    pub fn accepts_max_length(&self) -> bool {
        matches!(self, Self::VarChar | Self::VarBinary)
    }

    /// Inclusive value range of an integer type.
    #[must_use]
    pub fn integer_range(&self) -> Option<(i64, i64)> {
        match self {
            Self::Int8 => Some((i8::MIN.into(), i8::MAX.into())),
            Self::Int16 => Some((i16::MIN.into(), i16::MAX.into())),
            Self::Int32 => Some((i32::MIN.into(), i32::MAX.into())),
            Self::Int64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Short name used in diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::VarChar => "var_char",
            Self::VarBinary => "var_binary",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float => "float",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "date_time",
            Self::Timestamp => "timestamp",
            Self::Time => "time",
            Self::Choices { .. } => "choices",
        }
    }
}

/// A fixed default value, typed by its literal kind.
///
/// Binary defaults are written as hex strings; temporal defaults as ISO 8601
/// strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    /// Boolean literal.
    Boolean(bool),
    /// Integer literal.
    Integer(i64),
    /// Float literal.
    Float(f64),
    /// String literal.
    String(String),
}

impl DefaultValue {
    /// Short name used in diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

/// The effective default of a column: either a literal or the current time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    /// A fixed literal.
    Value(DefaultValue),
    /// Populated with the current date/time on insert.
    CurrentTime,
}
