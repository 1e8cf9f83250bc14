//! Postgres row source backed by an sqlx connection pool.
//!
//! The engine emits `?` bind markers in argument order; Postgres wants
//! `$1..$n`, so markers are rewritten before execution. Generated SQL
//! never carries a literal `?` inside a string (strings travel through
//! the bind channel), which keeps the rewrite a plain scan.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column as _, Row as _, TypeInfo as _};

use crate::error::{EngineError, EngineResult};
use crate::source::{ColumnMeta, RowSet, RowSource, VecRowSet};
use crate::value::Value;

/// `RowSource` over a shared Postgres pool.
#[derive(Debug, Clone)]
pub struct PgRowSource {
    pool: PgPool,
}

impl PgRowSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RowSource for PgRowSource {
    async fn query(&self, sql: &str, args: &[Value]) -> EngineResult<Box<dyn RowSet>> {
        let sql = number_markers(sql);
        let mut query = sqlx::query(&sql);
        for arg in args {
            query = match arg {
                Value::Null => query.bind(Option::<i64>::None),
                Value::Bool(b) => query.bind(*b),
                Value::Int(i) => query.bind(*i),
                Value::Float(f) => query.bind(*f),
                Value::Text(s) => query.bind(s.clone()),
                Value::Uuid(u) => query.bind(*u),
                Value::Timestamp(t) => query.bind(*t),
                Value::Record(_) | Value::Many(_) => {
                    return Err(EngineError::Source(
                        "nested records cannot be bound as query arguments".to_string(),
                    ));
                }
            };
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::Source(e.to_string()))?;

        let columns = match rows.first() {
            Some(row) => row
                .columns()
                .iter()
                .map(|c| ColumnMeta::new(c.name(), c.type_info().name()))
                .collect(),
            None => Vec::new(),
        };

        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            decoded.push(decode_row(row)?);
        }
        Ok(Box::new(VecRowSet::new(columns, decoded)))
    }
}

/// Rewrite `?` markers to `$1..$n`.
fn number_markers(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0usize;
    for c in sql.chars() {
        if c == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(c);
        }
    }
    out
}

fn decode_row(row: &PgRow) -> EngineResult<Vec<Value>> {
    let mut values = Vec::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        values.push(decode_value(row, i, column.type_info().name())?);
    }
    Ok(values)
}

fn decode_value(row: &PgRow, i: usize, type_name: &str) -> EngineResult<Value> {
    let source_err = |e: sqlx::Error| EngineError::Source(e.to_string());
    let value = match type_name {
        "INT2" => row
            .try_get::<Option<i16>, _>(i)
            .map_err(source_err)?
            .map_or(Value::Null, |v| Value::Int(i64::from(v))),
        "INT4" => row
            .try_get::<Option<i32>, _>(i)
            .map_err(source_err)?
            .map_or(Value::Null, |v| Value::Int(i64::from(v))),
        "INT8" => row
            .try_get::<Option<i64>, _>(i)
            .map_err(source_err)?
            .map_or(Value::Null, Value::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(i)
            .map_err(source_err)?
            .map_or(Value::Null, |v| Value::Float(f64::from(v))),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(i)
            .map_err(source_err)?
            .map_or(Value::Null, Value::Float),
        "BOOL" => row
            .try_get::<Option<bool>, _>(i)
            .map_err(source_err)?
            .map_or(Value::Null, Value::Bool),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(i)
            .map_err(source_err)?
            .map_or(Value::Null, Value::Uuid),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(i)
            .map_err(source_err)?
            .map_or(Value::Null, Value::Timestamp),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(i)
            .map_err(source_err)?
            .map_or(Value::Null, |v| Value::Timestamp(v.and_utc())),
        // Everything else comes across as text.
        _ => row
            .try_get::<Option<String>, _>(i)
            .map_err(source_err)?
            .map_or(Value::Null, Value::Text),
    };
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn markers_number_left_to_right() {
        assert_eq!(
            number_markers("SELECT 1 WHERE a = ? AND b IN (?, ?)"),
            "SELECT 1 WHERE a = $1 AND b IN ($2, $3)"
        );
    }

    #[test]
    fn marker_free_sql_is_unchanged() {
        assert_eq!(number_markers("SELECT 1"), "SELECT 1");
    }
}
