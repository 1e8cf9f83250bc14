//! Runtime values scanned from the row source and stored in records.
//!
//! All integer-family driver types are collapsed to `Int(i64)` at the
//! row-source boundary so join-key comparison never has to reason
//! about widths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::Record;

/// Declared type of a column or record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int,
    Float,
    Text,
    Uuid,
    Timestamp,
    /// A nested record produced by a `One` relation holder.
    Record,
    /// A nested record collection produced by a `Many` relation holder.
    RecordList,
}

impl DataType {
    /// Short name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Text => "text",
            DataType::Uuid => "uuid",
            DataType::Timestamp => "timestamp",
            DataType::Record => "record",
            DataType::RecordList => "record_list",
        }
    }
}

/// A single scanned or merged value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    /// Holder value for a `One` relation.
    Record(Record),
    /// Holder value for a `Many` relation.
    Many(Vec<Record>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The data type this value carries, or `None` for `Null`.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Bool),
            Value::Int(_) => Some(DataType::Int),
            Value::Float(_) => Some(DataType::Float),
            Value::Text(_) => Some(DataType::Text),
            Value::Uuid(_) => Some(DataType::Uuid),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Record(_) => Some(DataType::Record),
            Value::Many(_) => Some(DataType::RecordList),
        }
    }

    /// Short name of the carried type, for error messages.
    pub fn type_name(&self) -> &'static str {
        self.data_type().map_or("null", DataType::name)
    }

    /// Convert to integer if the value is numeric.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Borrow text content if the value is textual.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render as JSON for the external marshaling layer.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            Value::Record(r) => r.to_json(),
            Value::Many(rs) => serde_json::Value::Array(rs.iter().map(Record::to_json).collect()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
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

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn value_type_names() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::Int(1).type_name(), "int");
        assert_eq!(Value::Text("a".into()).type_name(), "text");
    }

    #[test]
    fn integral_float_as_i64() {
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
        assert_eq!(Value::Int(7).as_i64(), Some(7));
    }

    #[test]
    fn json_rendering() {
        assert_eq!(Value::Null.to_json(), serde_json::Value::Null);
        assert_eq!(Value::Int(5).to_json(), serde_json::json!(5));
        let u = Uuid::nil();
        assert_eq!(Value::Uuid(u).to_json(), serde_json::json!(u.to_string()));
    }

    #[test]
    fn data_type_serialization() {
        let json = serde_json::to_string(&DataType::RecordList).unwrap();
        assert_eq!(json, "\"record_list\"");
        let parsed: DataType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, DataType::RecordList);
    }
}
