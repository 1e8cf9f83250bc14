//! Raccolta test utilities.
//!
//! An in-memory `RowSource` that understands the SQL shapes the engine
//! emits (`col = ?`, `col IN (?, ...)`, `1 = 0`, ORDER BY, LIMIT and
//! OFFSET), plus fluent table fixtures. Every executed statement is
//! recorded with its bind arguments so tests can assert on the exact
//! SQL the engine produced.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;

use raccolta_engine::{ColumnMeta, EngineError, EngineResult, RowSet, RowSource, Value, VecRowSet};

#[allow(clippy::unwrap_used)]
static FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFROM\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());
#[allow(clippy::unwrap_used)]
static WHERE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bWHERE\s+(.*?)(?:\s+ORDER\s+BY|\s+LIMIT|\s+OFFSET|\s*$)").unwrap()
});
#[allow(clippy::unwrap_used)]
static ORDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bORDER\s+BY\s+(.*?)(?:\s+LIMIT|\s+OFFSET|\s*$)").unwrap());
#[allow(clippy::unwrap_used)]
static LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)").unwrap());
#[allow(clippy::unwrap_used)]
static OFFSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bOFFSET\s+(\d+)").unwrap());
#[allow(clippy::unwrap_used)]
static IN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([A-Za-z_][A-Za-z0-9_]*)\s+IN\s+\(([?,\s]+)\)$").unwrap());
#[allow(clippy::unwrap_used)]
static EQ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*(=|!=|<>|<=|>=|<|>)\s*(\?|\d+|true|false)$").unwrap()
});

/// One executed statement, in execution order.
#[derive(Debug, Clone)]
pub struct ExecutedQuery {
    pub sql: String,
    pub args: Vec<Value>,
}

/// A fixture table: named columns with driver type names, plus rows.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    pub fn new(name: &str, columns: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|(n, t)| ColumnMeta::new(n, t))
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Append one row; arity must match the column list.
    pub fn row(mut self, values: Vec<Value>) -> Self {
        assert_eq!(
            values.len(),
            self.columns.len(),
            "row arity mismatch for table '{}'",
            self.name
        );
        self.rows.push(values);
        self
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// In-memory row source evaluating the engine's generated SQL against
/// fixture tables.
#[derive(Debug, Default)]
pub struct MemoryRowSource {
    tables: HashMap<String, MemoryTable>,
    log: Mutex<Vec<ExecutedQuery>>,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: MemoryTable) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// All executed statements so far, in order.
    pub fn executed(&self) -> Vec<ExecutedQuery> {
        self.log.lock().clone()
    }

    /// Executed statements whose SQL contains `needle`.
    pub fn executed_matching(&self, needle: &str) -> Vec<ExecutedQuery> {
        self.log
            .lock()
            .iter()
            .filter(|q| q.sql.contains(needle))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RowSource for MemoryRowSource {
    async fn query(&self, sql: &str, args: &[Value]) -> EngineResult<Box<dyn RowSet>> {
        self.log.lock().push(ExecutedQuery {
            sql: sql.to_string(),
            args: args.to_vec(),
        });

        let table_name = FROM_RE
            .captures(sql)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| EngineError::Source(format!("no FROM clause in: {sql}")))?;
        let table = self
            .tables
            .get(&table_name)
            .ok_or_else(|| EngineError::Source(format!("unknown table '{table_name}'")))?;

        let mut rows = table.rows.clone();
        let mut cursor = args.iter();

        if let Some(caps) = WHERE_RE.captures(sql) {
            for predicate in caps[1].split(" AND ") {
                rows = apply_predicate(table, rows, predicate.trim(), &mut cursor)?;
            }
        }

        if let Some(caps) = ORDER_RE.captures(sql) {
            apply_order(table, &mut rows, &caps[1])?;
        }

        let offset = OFFSET_RE
            .captures(sql)
            .and_then(|c| c[1].parse::<usize>().ok())
            .unwrap_or(0);
        if offset > 0 {
            rows = rows.into_iter().skip(offset).collect();
        }
        if let Some(limit) = LIMIT_RE
            .captures(sql)
            .and_then(|c| c[1].parse::<usize>().ok())
        {
            rows.truncate(limit);
        }

        Ok(Box::new(VecRowSet::new(table.columns.clone(), rows)))
    }
}

fn apply_predicate<'a>(
    table: &MemoryTable,
    rows: Vec<Vec<Value>>,
    predicate: &str,
    cursor: &mut impl Iterator<Item = &'a Value>,
) -> EngineResult<Vec<Vec<Value>>> {
    if predicate == "1 = 0" {
        return Ok(Vec::new());
    }

    if let Some(caps) = IN_RE.captures(predicate) {
        let idx = require_column(table, &caps[1])?;
        let count = caps[2].matches('?').count();
        let keys: Vec<&Value> = cursor.take(count).collect();
        if keys.len() != count {
            return Err(EngineError::Source(format!(
                "bind arguments exhausted in: {predicate}"
            )));
        }
        return Ok(rows
            .into_iter()
            .filter(|row| keys.iter().any(|k| values_equal(&row[idx], k)))
            .collect());
    }

    if let Some(caps) = EQ_RE.captures(predicate) {
        let idx = require_column(table, &caps[1])?;
        let op = caps[2].to_string();
        let rhs = match &caps[3] {
            "?" => cursor.next().cloned().ok_or_else(|| {
                EngineError::Source(format!("bind arguments exhausted in: {predicate}"))
            })?,
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            literal => Value::Int(literal.parse::<i64>().map_err(|_| {
                EngineError::Source(format!("unsupported literal in: {predicate}"))
            })?),
        };
        return Ok(rows
            .into_iter()
            .filter(|row| compare_with_op(&row[idx], &rhs, &op))
            .collect());
    }

    Err(EngineError::Source(format!(
        "unsupported predicate: {predicate}"
    )))
}

fn apply_order(table: &MemoryTable, rows: &mut [Vec<Value>], clause: &str) -> EngineResult<()> {
    let mut keys = Vec::new();
    for entry in clause.split(',') {
        let mut parts = entry.split_whitespace();
        let column = parts
            .next()
            .ok_or_else(|| EngineError::Source(format!("empty ORDER BY entry: {clause}")))?;
        let descending = parts.next().is_some_and(|d| d.eq_ignore_ascii_case("DESC"));
        keys.push((require_column(table, column)?, descending));
    }
    // Stable sort applied last-key-first keeps earlier keys as the
    // primary ordering.
    for &(idx, descending) in keys.iter().rev() {
        rows.sort_by(|a, b| {
            let ord = order_values(&a[idx], &b[idx]);
            if descending { ord.reverse() } else { ord }
        });
    }
    Ok(())
}

fn require_column(table: &MemoryTable, name: &str) -> EngineResult<usize> {
    table
        .column_index(name)
        .ok_or_else(|| EngineError::Source(format!("unknown column '{name}'")))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    !matches!(a, Value::Null) && order_values(a, b) == Ordering::Equal
}

fn compare_with_op(a: &Value, b: &Value, op: &str) -> bool {
    if matches!(a, Value::Null) {
        return false;
    }
    let ord = order_values(a, b);
    match op {
        "=" => ord == Ordering::Equal,
        "!=" | "<>" => ord != Ordering::Equal,
        "<" => ord == Ordering::Less,
        ">" => ord == Ordering::Greater,
        "<=" => ord != Ordering::Greater,
        ">=" => ord != Ordering::Less,
        _ => false,
    }
}

/// Total order across fixture values: nulls first, numbers compared
/// across the int/float divide, then text, bool, uuid and timestamps
/// by value.
fn order_values(a: &Value, b: &Value) -> Ordering {
    fn numeric(v: &Value) -> Option<f64> {
        match v {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Uuid(x), Value::Uuid(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        _ => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}
