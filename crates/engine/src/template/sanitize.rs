//! Ad-hoc criteria sanitization.
//!
//! Criteria text mixes structural SQL (connectors, parentheses,
//! comparison operators) with `safe_*` expressions wrapping every
//! dynamic part:
//! - `safe_column(name)` resolves against the view's filterable
//!   whitelist and emits the column's SQL expression.
//! - `safe_value` / `safe_int` / `safe_string` / `safe_bool` /
//!   `safe_float` validate the raw argument, append it to the bind
//!   list, and emit a `?` marker.
//! - A bare `?` consumes one caller-supplied placeholder value.
//!
//! Nothing caller-controlled is ever concatenated into the SQL text;
//! data values only leave through the bind channel.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::error::{EngineError, EngineResult};
use crate::schema::Column;
use crate::value::Value;

/// Reject free-standing literal text that could smuggle SQL comments.
pub fn check_literal(text: &str) -> EngineResult<()> {
    if text.contains('\n') || text.contains("--") || text.contains('#') {
        return Err(EngineError::UnsupportedLiteral(text.to_string()));
    }
    Ok(())
}

/// Structural pass-through spans additionally reject quoting and
/// statement separators; string data must use `safe_string`.
fn check_passthrough(text: &str) -> EngineResult<()> {
    check_literal(text)?;
    if text.contains('\'') || text.contains('"') || text.contains(';') {
        return Err(EngineError::UnsupportedLiteral(text.to_string()));
    }
    Ok(())
}

/// Transient per-expansion sanitizer: holds the column whitelist and
/// an accumulating bind list, discarded after one expansion.
pub struct CriteriaSanitizer {
    /// column name → (SQL expression, filterable flag)
    columns: HashMap<String, (String, bool)>,
    placeholders: VecDeque<Value>,
    args: Vec<Value>,
}

impl CriteriaSanitizer {
    /// Build a sanitizer from a view's declared columns.
    pub fn new(columns: &[Column]) -> Self {
        let columns = columns
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    (c.sql_expression().to_string(), c.filterable),
                )
            })
            .collect();
        Self {
            columns,
            placeholders: VecDeque::new(),
            args: Vec::new(),
        }
    }

    /// Supply values consumed by bare `?` markers, in order.
    pub fn with_placeholders(mut self, values: Vec<Value>) -> Self {
        self.placeholders = values.into();
        self
    }

    /// Expand criteria text into safe SQL. Bind values accumulate in
    /// scan order; retrieve them with `into_args`.
    pub fn sanitize(&mut self, criteria: &str) -> EngineResult<String> {
        let mut out = String::new();
        let mut passthrough = String::new();
        let mut chars = criteria.char_indices().peekable();

        while let Some(&(start, c)) = chars.peek() {
            if c == '?' {
                chars.next();
                let value = self
                    .placeholders
                    .pop_front()
                    .ok_or(EngineError::MissingPlaceholder)?;
                self.args.push(value);
                out.push('?');
                continue;
            }
            if c.is_ascii_alphabetic() || c == '_' {
                let ident: String = read_while(&mut chars, |k| k.is_ascii_alphanumeric() || k == '_');
                let lowered = ident.to_ascii_lowercase();
                if is_safe_function(&lowered) {
                    let arg = self.read_call_argument(criteria, start, &mut chars, &ident)?;
                    out.push_str(&self.apply(&lowered, &arg)?);
                } else {
                    passthrough.push_str(&ident);
                    out.push_str(&ident);
                }
                continue;
            }
            chars.next();
            passthrough.push(c);
            out.push(c);
        }

        check_passthrough(&passthrough)?;
        Ok(out)
    }

    /// The bind values accumulated by this expansion, in order.
    pub fn into_args(self) -> Vec<Value> {
        self.args
    }

    fn read_call_argument(
        &self,
        criteria: &str,
        start: usize,
        chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
        ident: &str,
    ) -> EngineResult<String> {
        // Skip whitespace before the opening parenthesis.
        while matches!(chars.peek(), Some(&(_, k)) if k.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            Some((_, '(')) => {}
            _ => {
                return Err(EngineError::UnsupportedLiteral(format!(
                    "{ident} at offset {start} is not a call"
                )));
            }
        }
        let mut arg = String::new();
        // The closing parenthesis only terminates the call outside a
        // quoted argument, so safe_string('a(b)') keeps its text.
        let mut quote: Option<char> = None;
        for (_, k) in chars.by_ref() {
            match quote {
                Some(q) if k == q => quote = None,
                None if k == '\'' || k == '"' => quote = Some(k),
                None if k == ')' => return Ok(unquote(arg.trim()).to_string()),
                _ => {}
            }
            arg.push(k);
        }
        Err(EngineError::UnsupportedLiteral(format!(
            "unterminated {ident} call"
        )))
    }

    fn apply(&mut self, function: &str, raw: &str) -> EngineResult<String> {
        match function {
            "safe_column" => {
                let (expression, filterable) = self
                    .columns
                    .get(raw)
                    .ok_or_else(|| EngineError::UnknownColumn(raw.to_string()))?;
                if !filterable {
                    return Err(EngineError::NotFilterable(raw.to_string()));
                }
                Ok(expression.clone())
            }
            "safe_int" => {
                let parsed: i64 = raw.parse().map_err(|_| EngineError::Conversion {
                    value: raw.to_string(),
                    target: "int",
                })?;
                self.bind(Value::Int(parsed))
            }
            "safe_float" => {
                let parsed: f64 = raw.parse().map_err(|_| EngineError::Conversion {
                    value: raw.to_string(),
                    target: "float",
                })?;
                self.bind(Value::Float(parsed))
            }
            "safe_bool" => {
                let parsed = match raw.to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(EngineError::Conversion {
                            value: raw.to_string(),
                            target: "bool",
                        });
                    }
                };
                self.bind(Value::Bool(parsed))
            }
            "safe_string" => self.bind(Value::Text(raw.to_string())),
            "safe_value" => {
                let value = if let Ok(i) = raw.parse::<i64>() {
                    Value::Int(i)
                } else if let Ok(f) = raw.parse::<f64>() {
                    Value::Float(f)
                } else if raw.eq_ignore_ascii_case("true") {
                    Value::Bool(true)
                } else if raw.eq_ignore_ascii_case("false") {
                    Value::Bool(false)
                } else {
                    Value::Text(raw.to_string())
                };
                self.bind(value)
            }
            other => Err(EngineError::Internal(format!(
                "unreachable sanitizer function {other}"
            ))),
        }
    }

    fn bind(&mut self, value: Value) -> EngineResult<String> {
        self.args.push(value);
        Ok("?".to_string())
    }
}

fn is_safe_function(ident: &str) -> bool {
    matches!(
        ident,
        "safe_column" | "safe_value" | "safe_int" | "safe_string" | "safe_bool" | "safe_float"
    )
}

fn read_while(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    keep: impl Fn(char) -> bool,
) -> String {
    let mut out = String::new();
    while let Some(&(_, k)) = chars.peek() {
        if keep(k) {
            out.push(k);
            chars.next();
        } else {
            break;
        }
    }
    out
}

fn unquote(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}
