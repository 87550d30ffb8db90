//! Values and records.
//!
//! A [`Record`] arrives with raw JSON numbers kept at full precision
//! ([`Value::Number`]). The type resolver canonicalises every value with
//! [`reformat`] before a logical type is inferred from it, so the record and
//! the resolved fields always agree.

use std::fmt;
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use indexmap::IndexMap;

use crate::error::{BulkError, Result};
use crate::types::LogicalType;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Formats accepted for date-times that carry no offset; they are read as UTC.
const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// Raw JSON number, not yet classified as integer or float.
    Number(serde_json::Number),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    /// Nested object or array.
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Logical type inferred from the value's shape.
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Value::Null => LogicalType::Unknown,
            Value::Bool(_) => LogicalType::Boolean,
            Value::Number(n) => {
                if n.as_i64().is_some() {
                    LogicalType::Integer
                } else {
                    LogicalType::Float
                }
            }
            Value::Int(_) => LogicalType::Integer,
            Value::Float(_) => LogicalType::Float,
            Value::String(_) => LogicalType::String,
            Value::Timestamp(_) => LogicalType::Timestamp,
            Value::Date(_) => LogicalType::Date,
            Value::Json(_) => LogicalType::Json,
        }
    }

    /// Force-cast the value of `field` to `target`.
    ///
    /// Nulls stay null. Fails with [`BulkError::TypeConversion`] when the
    /// value has no faithful representation in `target`.
    pub fn convert(self, field: &str, target: LogicalType) -> Result<Value> {
        let converted = match (target, self) {
            (_, Value::Null) => Value::Null,
            (LogicalType::Unknown, v) => v,
            (LogicalType::String, Value::String(s)) => Value::String(s),
            (LogicalType::String, v) => Value::String(v.to_string()),
            (LogicalType::Json, Value::Json(j)) => Value::Json(j),
            (LogicalType::Json, v) => Value::Json(v.to_json()),
            (target, v) => cast(&v, target).ok_or_else(|| BulkError::TypeConversion {
                field: field.to_string(),
                value: v.to_string(),
                target,
            })?,
        };
        Ok(converted)
    }

    /// JSON rendering; timestamps and dates become strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(_) | Value::Date(_) => serde_json::Value::String(self.to_string()),
            Value::Json(j) => j.clone(),
        }
    }

    fn from_json_value(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            nested => Value::Json(nested),
        }
    }
}

/// Casts between scalar types. `None` means no faithful cast exists.
fn cast(value: &Value, target: LogicalType) -> Option<Value> {
    match target {
        LogicalType::Boolean => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Int(0) => Some(Value::Bool(false)),
            Value::Int(1) => Some(Value::Bool(true)),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        LogicalType::Integer => match value {
            Value::Int(i) => Some(Value::Int(*i)),
            Value::Bool(b) => Some(Value::Int(i64::from(*b))),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().and_then(integral_f64))
                .map(Value::Int),
            Value::Float(f) => integral_f64(*f).map(Value::Int),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::Int),
            _ => None,
        },
        LogicalType::Float => match value {
            Value::Float(f) => Some(Value::Float(*f)),
            Value::Int(i) => Some(Value::Float(*i as f64)),
            Value::Number(n) => n.as_f64().map(Value::Float),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float),
            _ => None,
        },
        LogicalType::Timestamp => match value {
            Value::Timestamp(ts) => Some(Value::Timestamp(*ts)),
            Value::Date(d) => d.and_hms_opt(0, 0, 0).map(|dt| Value::Timestamp(dt.and_utc())),
            Value::String(s) => parse_timestamp(s)
                .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc()))
                .map(Value::Timestamp),
            _ => None,
        },
        LogicalType::Date => match value {
            Value::Date(d) => Some(Value::Date(*d)),
            Value::Timestamp(ts) => Some(Value::Date(ts.date_naive())),
            Value::String(s) => parse_date(s)
                .or_else(|| parse_timestamp(s).map(|ts| ts.date_naive()))
                .map(Value::Date),
            _ => None,
        },
        LogicalType::Unknown | LogicalType::String | LogicalType::Json => None,
    }
}

fn integral_f64(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Parse an ISO-8601 date-time: RFC 3339 with offset, or a naive
/// `YYYY-MM-DD[ T]HH:MM:SS[.f]` read as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    // Cheap shape check before trying the parsers.
    let bytes = s.as_bytes();
    if bytes.len() < 19 || bytes[4] != b'-' || bytes[7] != b'-' || bytes[13] != b':' {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|dt| dt.and_utc())
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

/// Canonical representation of a raw value.
///
/// - raw numbers become `Int` when integral and within `i64`, `Float` otherwise
/// - strings shaped like ISO-8601 date-times become `Timestamp`
/// - everything else, including quoted numbers and date-only strings, is kept
pub fn reformat(value: Value) -> Value {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() => Value::Float(f),
                    _ => Value::String(n.to_string()),
                }
            }
        }
        Value::String(s) => match parse_timestamp(&s) {
            Some(ts) => Value::Timestamp(ts),
            None => Value::String(s),
        },
        other => other,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
            Value::Timestamp(ts) => f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// One ingested object: field name to value, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(IndexMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one JSON object, keeping numbers at full precision.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(s).map_err(|e| BulkError::InvalidRecord(e.to_string()))?;
        Self::from_json(value)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(Record(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json_value(v)))
                    .collect(),
            )),
            other => Err(BulkError::InvalidRecord(format!(
                "expected a JSON object, got: {other}"
            ))),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    pub fn into_inner(self) -> IndexMap<String, Value> {
        self.0
    }
}

impl Deref for Record {
    type Target = IndexMap<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Record {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Record(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
