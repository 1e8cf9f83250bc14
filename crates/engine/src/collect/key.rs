//! Join-key normalization.
//!
//! The driver and the declared schema may disagree on exact numeric
//! width, so join-key values are coerced to one canonical comparable
//! form before use as map keys: the whole signed-integer family (and
//! integral floats and timestamps) collapse to `Int(i64)`.

use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::value::Value;

/// Canonical comparable join key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

impl Key {
    /// Convert back to a bindable value (for `IN` predicates).
    pub fn into_value(self) -> Value {
        match self {
            Key::Null => Value::Null,
            Key::Bool(b) => Value::Bool(b),
            Key::Int(i) => Value::Int(i),
            Key::Text(s) => Value::Text(s),
            Key::Uuid(u) => Value::Uuid(u),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Key::Null)
    }
}

/// Coerce a value to its canonical key form.
///
/// Idempotent: normalizing the key's value form yields the same key.
/// Nested records are not usable as join keys.
pub fn normalize_key(value: &Value) -> EngineResult<Key> {
    match value {
        Value::Null => Ok(Key::Null),
        Value::Bool(b) => Ok(Key::Bool(*b)),
        Value::Int(i) => Ok(Key::Int(*i)),
        Value::Float(f) if f.fract() == 0.0 && f.abs() < (i64::MAX as f64) => {
            Ok(Key::Int(*f as i64))
        }
        Value::Float(_) => Err(EngineError::UnsupportedKeyType("non-integral float")),
        Value::Text(s) => Ok(Key::Text(s.clone())),
        Value::Uuid(u) => Ok(Key::Uuid(*u)),
        Value::Timestamp(t) => Ok(Key::Int(t.timestamp_micros())),
        Value::Record(_) => Err(EngineError::UnsupportedKeyType("record")),
        Value::Many(_) => Err(EngineError::UnsupportedKeyType("record_list")),
    }
}
