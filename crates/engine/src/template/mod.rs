//! SQL template expansion.
//!
//! Takes a template containing structural placeholders (`$CRITERIA`,
//! `$COLUMN_IN`, `$PAGINATION`, `$FILTERS`, `$WHERE_*`, `$AND_*`,
//! `$OR_*`, ordinary `$key` parameters, and the `$?` sanitized-literal
//! marker) and produces final SQL text plus an ordered bind-value
//! list. Data values are never inlined; every one leaves through the
//! bind channel as a `?` marker.

mod parser;
mod sanitize;

pub use parser::{Span, parse_template};
pub use sanitize::{CriteriaSanitizer, check_literal};

use std::collections::{HashMap, VecDeque};

use crate::error::{EngineError, EngineResult};
use crate::value::Value;

/// Result of one template expansion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Expansion {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

/// Parameter state for one expansion: bound values, the sanitized
/// criteria expansion, the sequential-fetch `IN` list, paging, and
/// the pre-sanitized literal cursor for `$?`.
#[derive(Debug, Default)]
pub struct TemplateState {
    params: HashMap<String, Vec<Value>>,
    criteria: Option<Expansion>,
    column_in: Option<(String, Vec<Value>)>,
    limit: Option<u64>,
    offset: Option<u64>,
    sanitized: VecDeque<String>,
}

impl TemplateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a single value to an ordinary `$key`.
    pub fn set_param(&mut self, key: &str, value: Value) {
        self.params.insert(key.to_string(), vec![value]);
    }

    /// Bind a value list to an ordinary `$key` (expands to one marker
    /// per value).
    pub fn set_param_list(&mut self, key: &str, values: Vec<Value>) {
        self.params.insert(key.to_string(), values);
    }

    /// Install the sanitized criteria expansion for `$CRITERIA`.
    pub fn set_criteria(&mut self, expansion: Expansion) {
        self.criteria = Some(expansion);
    }

    /// Install the parent-key `IN` predicate inputs for `$COLUMN_IN`.
    pub fn set_column_in(&mut self, column: &str, values: Vec<Value>) {
        self.column_in = Some((column.to_string(), values));
    }

    pub fn set_pagination(&mut self, limit: Option<u64>, offset: Option<u64>) {
        self.limit = limit;
        self.offset = offset;
    }

    /// Queue one caller-pre-sanitized literal consumed by `$?`.
    pub fn push_sanitized(&mut self, text: &str) {
        self.sanitized.push_back(text.to_string());
    }

    fn next_sanitized(&mut self) -> Option<String> {
        self.sanitized.pop_front()
    }
}

/// Pluggable placeholder evaluation; the grammar behind ordinary keys
/// is an implementation detail behind this contract.
pub trait ExprEvaluator: Send + Sync {
    fn evaluate(&self, key: &str, state: &TemplateState) -> EngineResult<Option<Expansion>>;
}

/// Default evaluator resolving placeholders from the template state.
#[derive(Debug, Default)]
pub struct StateEvaluator;

impl ExprEvaluator for StateEvaluator {
    fn evaluate(&self, key: &str, state: &TemplateState) -> EngineResult<Option<Expansion>> {
        match key {
            "CRITERIA" => Ok(state.criteria.clone().filter(|e| !e.is_empty())),
            "COLUMN_IN" => Ok(state.column_in.as_ref().map(|(column, values)| {
                if values.is_empty() {
                    // No parent keys: nothing can match.
                    Expansion::new("1 = 0", Vec::new())
                } else {
                    let markers = vec!["?"; values.len()].join(", ");
                    Expansion::new(format!("{column} IN ({markers})"), values.clone())
                }
            })),
            "PAGINATION" => {
                let sql = match (state.limit, state.offset) {
                    (Some(limit), Some(offset)) => format!("LIMIT {limit} OFFSET {offset}"),
                    (Some(limit), None) => format!("LIMIT {limit}"),
                    (None, Some(offset)) => format!("OFFSET {offset}"),
                    (None, None) => return Ok(None),
                };
                Ok(Some(Expansion::new(sql, Vec::new())))
            }
            "FILTERS" => {
                let mut parts: Vec<Expansion> = Vec::new();
                if state.column_in.is_some()
                    && let Some(part) = self.evaluate("COLUMN_IN", state)?
                {
                    parts.push(part);
                }
                if let Some(part) = self.evaluate("CRITERIA", state)? {
                    parts.push(part);
                }
                if parts.is_empty() {
                    return Ok(None);
                }
                let sql = parts
                    .iter()
                    .map(|p| p.sql.clone())
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let args = parts.into_iter().flat_map(|p| p.args).collect();
                Ok(Some(Expansion { sql, args }))
            }
            _ => match state.params.get(key) {
                Some(values) => {
                    let markers = vec!["?"; values.len()].join(", ");
                    Ok(Some(Expansion::new(markers, values.clone())))
                }
                // A structural key with nothing set expands to
                // nothing; an ordinary parameter with no bound value
                // would silently drop a filter or leave dangling SQL.
                None => Err(EngineError::UnboundParameter(key.to_string())),
            },
        }
    }
}

/// Expand a template against the given state.
///
/// Prefix placeholders (`WHERE_`, `AND_`, `OR_`) resolve their suffix
/// first and wrap only non-empty output, so an empty inner expansion
/// never leaves a dangling connector.
pub fn expand(
    template: &str,
    state: &mut TemplateState,
    evaluator: &dyn ExprEvaluator,
) -> EngineResult<Expansion> {
    let mut sql = String::new();
    let mut args = Vec::new();

    for span in parse_template(template) {
        match span {
            Span::Literal(text) => sql.push_str(&text),
            Span::SanitizedLiteral => {
                let text = state
                    .next_sanitized()
                    .ok_or(EngineError::SanitizedArgsExhausted)?;
                sql.push_str(&text);
            }
            Span::Placeholder(key) => {
                if let Some(expansion) = resolve_key(&key, state, evaluator)? {
                    sql.push_str(&expansion.sql);
                    args.extend(expansion.args);
                }
            }
        }
    }

    Ok(Expansion { sql, args })
}

fn resolve_key(
    key: &str,
    state: &TemplateState,
    evaluator: &dyn ExprEvaluator,
) -> EngineResult<Option<Expansion>> {
    for (prefix, connector) in [("WHERE_", "WHERE"), ("AND_", "AND"), ("OR_", "OR")] {
        if let Some(suffix) = key.strip_prefix(prefix) {
            let inner = resolve_key(suffix, state, evaluator)?;
            return Ok(inner.filter(|e| !e.is_empty()).map(|e| Expansion {
                sql: format!("{connector} {}", e.sql),
                args: e.args,
            }));
        }
    }
    evaluator.evaluate(key, state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn expand_with(template: &str, state: &mut TemplateState) -> Expansion {
        expand(template, state, &StateEvaluator).unwrap()
    }

    #[test]
    fn empty_criteria_leaves_no_dangling_where() {
        let mut state = TemplateState::new();
        let out = expand_with("SELECT * FROM users $WHERE_CRITERIA", &mut state);
        assert!(!out.sql.contains("WHERE"), "dangling WHERE: {}", out.sql);
        assert!(out.args.is_empty());
    }

    #[test]
    fn criteria_wrapped_in_where() {
        let mut state = TemplateState::new();
        state.set_criteria(Expansion::new("status = ?", vec![Value::Int(1)]));
        let out = expand_with("SELECT * FROM users $WHERE_CRITERIA", &mut state);
        assert_eq!(out.sql, "SELECT * FROM users WHERE status = ?");
        assert_eq!(out.args, vec![Value::Int(1)]);
    }

    #[test]
    fn and_prefix_drops_with_empty_inner() {
        let mut state = TemplateState::new();
        let out = expand_with("WHERE active = true $AND_CRITERIA", &mut state);
        assert!(!out.sql.contains("AND"), "dangling AND: {}", out.sql);
    }

    #[test]
    fn nested_prefixes_resolve_innermost_first() {
        let mut state = TemplateState::new();
        state.set_criteria(Expansion::new("id = ?", vec![Value::Int(3)]));
        let out = expand_with("SELECT 1 $WHERE_CRITERIA", &mut state);
        assert!(out.sql.ends_with("WHERE id = ?"));
    }

    #[test]
    fn column_in_renders_markers_per_value() {
        let mut state = TemplateState::new();
        state.set_column_in("user_id", vec![Value::Int(1), Value::Int(2)]);
        let out = expand_with("SELECT * FROM orders $WHERE_COLUMN_IN", &mut state);
        assert_eq!(out.sql, "SELECT * FROM orders WHERE user_id IN (?, ?)");
        assert_eq!(out.args, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn column_in_with_no_keys_matches_nothing() {
        let mut state = TemplateState::new();
        state.set_column_in("user_id", Vec::new());
        let out = expand_with("SELECT * FROM orders $WHERE_COLUMN_IN", &mut state);
        assert_eq!(out.sql, "SELECT * FROM orders WHERE 1 = 0");
    }

    #[test]
    fn pagination_renders_limit_and_offset() {
        let mut state = TemplateState::new();
        state.set_pagination(Some(10), Some(20));
        let out = expand_with("SELECT 1 $PAGINATION", &mut state);
        assert_eq!(out.sql, "SELECT 1 LIMIT 10 OFFSET 20");
    }

    #[test]
    fn filters_joins_column_in_and_criteria() {
        let mut state = TemplateState::new();
        state.set_column_in("user_id", vec![Value::Int(5)]);
        state.set_criteria(Expansion::new("status = ?", vec![Value::Int(1)]));
        let out = expand_with("SELECT * FROM orders $WHERE_FILTERS", &mut state);
        assert_eq!(
            out.sql,
            "SELECT * FROM orders WHERE user_id IN (?) AND status = ?"
        );
        assert_eq!(out.args, vec![Value::Int(5), Value::Int(1)]);
    }

    #[test]
    fn ordinary_params_bind_never_inline() {
        let mut state = TemplateState::new();
        state.set_param("user_id", Value::Int(99));
        let out = expand_with("SELECT * FROM orders WHERE user_id = $user_id", &mut state);
        assert_eq!(out.sql, "SELECT * FROM orders WHERE user_id = ?");
        assert!(!out.sql.contains("99"));
        assert_eq!(out.args, vec![Value::Int(99)]);
    }

    #[test]
    fn param_lists_expand_to_marker_lists() {
        let mut state = TemplateState::new();
        state.set_param_list(
            "ids",
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
        );
        let out = expand_with("WHERE id IN ($ids)", &mut state);
        assert_eq!(out.sql, "WHERE id IN (?, ?, ?)");
        assert_eq!(out.args.len(), 3);
    }

    #[test]
    fn unbound_inline_param_is_an_error() {
        let mut state = TemplateState::new();
        let err = expand(
            "SELECT * FROM accounts WHERE owner = $owner",
            &mut state,
            &StateEvaluator,
        );
        assert!(matches!(err, Err(EngineError::UnboundParameter(ref key)) if key == "owner"));
    }

    #[test]
    fn unbound_param_under_prefix_is_an_error() {
        // A silently dropped $WHERE_status would run the query
        // unfiltered.
        let mut state = TemplateState::new();
        let err = expand("SELECT * FROM accounts $WHERE_status", &mut state, &StateEvaluator);
        assert!(matches!(err, Err(EngineError::UnboundParameter(ref key)) if key == "status"));
    }

    #[test]
    fn sanitized_literal_cursor() {
        let mut state = TemplateState::new();
        state.push_sanitized("status = 1");
        let out = expand_with("SELECT 1 WHERE $?", &mut state);
        assert_eq!(out.sql, "SELECT 1 WHERE status = 1");
    }

    #[test]
    fn exhausted_sanitized_cursor_is_an_error() {
        let mut state = TemplateState::new();
        let err = expand("WHERE $? AND $?", &mut state, &StateEvaluator);
        assert!(matches!(err, Err(EngineError::SanitizedArgsExhausted)));
    }
}
