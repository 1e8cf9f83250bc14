//! Row source abstraction and value codecs.
//!
//! The engine fetches through `RowSource`, a narrow async trait over
//! "execute this SQL with these bind arguments and stream rows back".
//! Any backend that can produce `(column name, value)` rows can drive
//! the engine; the Postgres adapter behind the `postgres` feature is
//! one implementation, the in-memory source in the test-utils crate is
//! another.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{EngineError, EngineResult};
use crate::value::Value;

/// Column metadata reported by the driver for one result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    /// Driver-reported type name, informational only.
    pub type_name: String,
}

impl ColumnMeta {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
        }
    }
}

/// A streaming result set. Rows arrive in driver order; `columns` is
/// stable for the lifetime of the set.
#[async_trait]
pub trait RowSet: Send {
    fn columns(&self) -> &[ColumnMeta];

    /// Next row, positionally aligned with `columns`. `None` ends the
    /// stream.
    async fn next_row(&mut self) -> EngineResult<Option<Vec<Value>>>;
}

/// Something that executes parameterized SQL and returns rows.
///
/// SQL arrives with `?` bind markers in argument order; sources for
/// backends with positional syntax rewrite them (see the Postgres
/// adapter).
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn query(&self, sql: &str, args: &[Value]) -> EngineResult<Box<dyn RowSet>>;
}

/// Post-scan value transform applied per column.
///
/// Codecs run after driver decoding and numeric-width coercion, before
/// the record is appended to the collector.
pub trait Codec: Send + Sync {
    fn decode(&self, value: Value) -> EngineResult<Value>;
}

impl<F> Codec for F
where
    F: Fn(Value) -> EngineResult<Value> + Send + Sync,
{
    fn decode(&self, value: Value) -> EngineResult<Value> {
        self(value)
    }
}

/// Named codec registry, shared across reads.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: DashMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, codec: Arc<dyn Codec>) {
        self.codecs.insert(name.to_string(), codec);
    }

    /// Look up a codec; a column naming an unregistered codec fails
    /// the read.
    pub fn get(&self, name: &str) -> EngineResult<Arc<dyn Codec>> {
        self.codecs
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::UnknownCodec(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = String::new();
        for entry in self.codecs.iter() {
            if !names.is_empty() {
                let _ = write!(names, ", ");
            }
            let _ = write!(names, "{}", entry.key());
        }
        f.debug_struct("CodecRegistry").field("codecs", &names).finish()
    }
}

/// An in-memory row set over pre-built rows; the building block for
/// non-streaming sources.
pub struct VecRowSet {
    columns: Vec<ColumnMeta>,
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl VecRowSet {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
        }
    }
}

#[async_trait]
impl RowSet for VecRowSet {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    async fn next_row(&mut self) -> EngineResult<Option<Vec<Value>>> {
        Ok(self.rows.next())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup_is_fallible() {
        let registry = CodecRegistry::new();
        registry.register(
            "upper",
            Arc::new(|value: Value| match value {
                Value::Text(s) => Ok(Value::Text(s.to_uppercase())),
                other => Ok(other),
            }),
        );

        let codec = registry.get("upper").unwrap();
        assert_eq!(
            codec.decode(Value::Text("abc".into())).unwrap(),
            Value::Text("ABC".into())
        );
        assert!(matches!(
            registry.get("missing"),
            Err(EngineError::UnknownCodec(_))
        ));
    }

    #[tokio::test]
    async fn vec_row_set_streams_in_order() {
        let mut set = VecRowSet::new(
            vec![ColumnMeta::new("id", "int8")],
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        );
        assert_eq!(set.next_row().await.unwrap(), Some(vec![Value::Int(1)]));
        assert_eq!(set.next_row().await.unwrap(), Some(vec![Value::Int(2)]));
        assert_eq!(set.next_row().await.unwrap(), None);
    }
}
