//! Logical types.
//!
//! `LogicalType` is the backend-agnostic classification of a field value.
//! Each backend derives its own column type from it (see
//! [`crate::schema::TypeMapping`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend-agnostic classification of a field's value.
///
/// # YAML Format
///
/// ```yaml
/// defaultTypes:
///   _timestamp: timestamp
///   user_id: string
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    /// Nulls and values without a usable shape
    Unknown,
    Boolean,
    /// 64-bit signed integer
    Integer,
    /// 64-bit IEEE 754 floating point
    Float,
    String,
    /// Instant in UTC
    Timestamp,
    /// Calendar date without time
    Date,
    /// Nested document or array
    Json,
}

impl LogicalType {
    /// Least general type able to hold values of both `self` and `other`.
    ///
    /// Lattice:
    /// - `Unknown` is below everything
    /// - `Boolean`, `Integer` < `Float` < `String`
    /// - `Date` < `Timestamp` < `String`
    /// - `Json` < `String`
    /// - incomparable pairs meet at `String`
    pub fn widen(self, other: LogicalType) -> LogicalType {
        use LogicalType::*;

        if self == other {
            return self;
        }
        match (self, other) {
            (Unknown, t) | (t, Unknown) => t,
            (Boolean, Integer) | (Integer, Boolean) => Float,
            (Boolean | Integer, Float) | (Float, Boolean | Integer) => Float,
            (Date, Timestamp) | (Timestamp, Date) => Timestamp,
            _ => String,
        }
    }

    /// Whether `self` is strictly more general than `other`.
    pub fn is_wider_than(self, other: LogicalType) -> bool {
        self != other && self.widen(other) == self
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
