//! Per-view query construction.
//!
//! Views without an explicit SQL template get a canonical SELECT
//! synthesized from their column list:
//!
//! ```sql
//! SELECT <columns> FROM <table> $WHERE_FILTERS <order> $PAGINATION
//! ```
//!
//! Views with a template keep it verbatim; structural placeholders are
//! expanded the same way in both cases. ORDER BY from the selector is
//! only injected into synthesized statements; a hand-written template
//! controls its own ordering.

use crate::error::{EngineError, EngineResult};
use crate::selector::Selector;
use crate::template::{CriteriaSanitizer, Expansion, StateEvaluator, TemplateState, expand};
use crate::value::Value;
use crate::view::View;

/// Build the final SQL and bind arguments for one view fetch.
///
/// `column_in` carries the parent join keys for sequential strategies;
/// `None` means the fetch is unconstrained by a parent.
pub(crate) fn build_query(
    view: &View,
    selector: Option<&Selector>,
    column_in: Option<(String, Vec<Value>)>,
) -> EngineResult<Expansion> {
    let template = match &view.sql {
        Some(sql) => sql.clone(),
        None => synthesize(view, selector)?,
    };

    let mut state = TemplateState::new();

    if let Some(sel) = selector
        && let Some(criteria) = &sel.criteria
    {
        let mut sanitizer =
            CriteriaSanitizer::new(&view.columns).with_placeholders(sel.placeholders.clone());
        let sql = sanitizer.sanitize(criteria).inspect_err(|err| {
            tracing::warn!(view = %view.name, %err, "criteria rejected");
        })?;
        state.set_criteria(Expansion::new(sql, sanitizer.into_args()));
    }

    if let Some((column, values)) = column_in {
        state.set_column_in(&column, values);
    }

    let limit = selector
        .and_then(|s| s.limit)
        .or(view.selector.default_limit);
    let offset = selector.and_then(|s| s.offset);
    state.set_pagination(limit, offset);

    expand(&template, &mut state, &StateEvaluator)
}

/// Synthesize the canonical SELECT for a view without a template.
fn synthesize(view: &View, selector: Option<&Selector>) -> EngineResult<String> {
    let columns = view
        .columns
        .iter()
        .map(|c| c.select_fragment())
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("SELECT {columns} FROM {} $WHERE_FILTERS", view.table);
    if let Some(order) = order_clause(view, selector)? {
        sql.push(' ');
        sql.push_str(&order);
    }
    sql.push_str(" $PAGINATION");
    Ok(sql)
}

/// Validate selector ordering against declared columns and render the
/// ORDER BY clause. Unknown columns fail the read; ordering is never
/// interpolated from raw caller text.
fn order_clause(view: &View, selector: Option<&Selector>) -> EngineResult<Option<String>> {
    let Some(sel) = selector else {
        return Ok(None);
    };
    if sel.order_by.is_empty() {
        return Ok(None);
    }
    let mut parts = Vec::with_capacity(sel.order_by.len());
    for entry in &sel.order_by {
        let column = view
            .column(&entry.column)
            .ok_or_else(|| EngineError::UnknownColumn(entry.column.clone()))?;
        parts.push(format!(
            "{} {}",
            column.sql_expression(),
            entry.direction.sql()
        ));
    }
    Ok(Some(format!("ORDER BY {}", parts.join(", "))))
}
