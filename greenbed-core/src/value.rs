//! Scalar attribute values and attribute maps.
//!
//! A row travelling between the store and an entity is an `AttributeMap`:
//! column name to nullable scalar. Entities convert to and from it through
//! `Persistable`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Timestamp, ValidationError};

/// A nullable scalar column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

/// Column name to value mapping for one row.
pub type AttributeMap = BTreeMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers widen to floats; text never coerces.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Name of the variant, used in decode errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so that string order
/// equals chronological order.
impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Text(v.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// TYPED ACCESSORS
// ============================================================================

/// Typed column accessors used by `Persistable::from_attributes`.
pub trait AttributeMapExt {
    fn req_i64(&self, column: &str) -> Result<i64, ValidationError>;
    fn opt_i64(&self, column: &str) -> Result<Option<i64>, ValidationError>;
    fn opt_f64(&self, column: &str) -> Result<Option<f64>, ValidationError>;
    fn req_text(&self, column: &str) -> Result<String, ValidationError>;
    fn opt_text(&self, column: &str) -> Result<Option<String>, ValidationError>;
    fn req_bool(&self, column: &str) -> Result<bool, ValidationError>;
    fn req_timestamp(&self, column: &str) -> Result<Timestamp, ValidationError>;
    fn opt_timestamp(&self, column: &str) -> Result<Option<Timestamp>, ValidationError>;
}

fn type_mismatch(column: &str, expected: &str, got: &Value) -> ValidationError {
    ValidationError::InvalidValue {
        field: column.to_string(),
        reason: format!("expected {}, got {}", expected, got.kind()),
    }
}

fn missing(column: &str) -> ValidationError {
    ValidationError::RequiredFieldMissing {
        field: column.to_string(),
    }
}

fn parse_timestamp(column: &str, raw: &str) -> Result<Timestamp, ValidationError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| ValidationError::InvalidValue {
            field: column.to_string(),
            reason: e.to_string(),
        })
}

impl AttributeMapExt for AttributeMap {
    fn req_i64(&self, column: &str) -> Result<i64, ValidationError> {
        self.opt_i64(column)?.ok_or_else(|| missing(column))
    }

    fn opt_i64(&self, column: &str) -> Result<Option<i64>, ValidationError> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Integer(v)) => Ok(Some(*v)),
            Some(other) => Err(type_mismatch(column, "integer", other)),
        }
    }

    fn opt_f64(&self, column: &str) -> Result<Option<f64>, ValidationError> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| type_mismatch(column, "real", v)),
        }
    }

    fn req_text(&self, column: &str) -> Result<String, ValidationError> {
        self.opt_text(column)?.ok_or_else(|| missing(column))
    }

    fn opt_text(&self, column: &str) -> Result<Option<String>, ValidationError> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Text(v)) => Ok(Some(v.clone())),
            Some(other) => Err(type_mismatch(column, "text", other)),
        }
    }

    fn req_bool(&self, column: &str) -> Result<bool, ValidationError> {
        match self.get(column) {
            None | Some(Value::Null) => Err(missing(column)),
            Some(v) => v.as_bool().ok_or_else(|| type_mismatch(column, "boolean", v)),
        }
    }

    fn req_timestamp(&self, column: &str) -> Result<Timestamp, ValidationError> {
        self.opt_timestamp(column)?.ok_or_else(|| missing(column))
    }

    fn opt_timestamp(&self, column: &str) -> Result<Option<Timestamp>, ValidationError> {
        match self.opt_text(column)? {
            None => Ok(None),
            Some(raw) => parse_timestamp(column, &raw).map(Some),
        }
    }
}
