use std::fmt::Display;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

/// Type of a column.
///
/// - `Integer`: 32-bit signed integer, fixed width
/// - `String`: UTF-8 text, stored length-prefixed
/// - `DateTime`: timestamp with microsecond precision, fixed width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    String,
    DateTime,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::String => "string",
            Self::DateTime => "datetime",
        }
    }

    /// Value a field takes when unset or lost to truncation
    pub fn default_value(&self) -> Value {
        match self {
            Self::Integer => Value::Int(0),
            Self::String => Value::Str(String::new()),
            Self::DateTime => Value::DateTime(datetime_min()),
        }
    }
}

impl From<ColumnType> for u8 {
    fn from(value: ColumnType) -> Self {
        match value {
            ColumnType::Integer => 1,
            ColumnType::String => 2,
            ColumnType::DateTime => 3,
        }
    }
}

impl TryFrom<u8> for ColumnType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Integer),
            2 => Ok(Self::String),
            3 => Ok(Self::DateTime),
            v => Err(format!("unknown column type: {:#x}", v)),
        }
    }
}

/// A typed field value.
///
/// Values order first by variant, then by content; indexes rely on that to
/// keep mixed keys sortable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Int(i32),
    Str(String),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Int(_) => ColumnType::Integer,
            Self::Str(_) => ColumnType::String,
            Self::DateTime(_) => ColumnType::DateTime,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(v) => Some(*v),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S%.6f")),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

/// Earliest representable timestamp; stored as zero
pub fn datetime_min() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Converts a timestamp to its stored form: microseconds since 0001-01-01
pub fn datetime_to_micros(value: &NaiveDateTime) -> i64 {
    value
        .signed_duration_since(datetime_min())
        .num_microseconds()
        .unwrap_or(i64::MAX)
}

pub fn micros_to_datetime(micros: i64) -> Option<NaiveDateTime> {
    datetime_min().checked_add_signed(TimeDelta::microseconds(micros))
}
