//! Per-request, per-view filter and paging state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One ORDER BY entry. The column must be declared on the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

/// Mutable filter/paging state for one (request, view) pair.
///
/// Criteria text may embed `safe_*` expressions and `?` bind markers;
/// markers consume `placeholders` in order during sanitization.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order_by: Vec<OrderBy>,
    /// Requested output fields; empty means all declared fields.
    pub projection: Vec<String>,
    pub criteria: Option<String>,
    pub placeholders: Vec<Value>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn order_by(mut self, column: &str, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            column: column.to_string(),
            direction,
        });
        self
    }

    pub fn project(mut self, fields: &[&str]) -> Self {
        self.projection = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    pub fn with_criteria(mut self, criteria: &str, placeholders: Vec<Value>) -> Self {
        self.criteria = Some(criteria.to_string());
        self.placeholders = placeholders;
        self
    }

    /// Whether the projection includes the named field.
    pub fn includes(&self, field: &str) -> bool {
        self.projection.is_empty() || self.projection.iter().any(|f| f == field)
    }

    /// Whether any constraint is set at all.
    pub fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.offset.is_none()
            && self.order_by.is_empty()
            && self.projection.is_empty()
            && self.criteria.is_none()
    }
}

/// Per-request session: one selector per view, owned by the caller.
#[derive(Debug, Clone, Default)]
pub struct Session {
    selectors: HashMap<String, Selector>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selector(&self, view: &str) -> Option<&Selector> {
        self.selectors.get(view)
    }

    /// Selector for a view, created empty on first access.
    pub fn selector_mut(&mut self, view: &str) -> &mut Selector {
        self.selectors.entry(view.to_string()).or_default()
    }

    pub fn set_selector(&mut self, view: &str, selector: Selector) {
        self.selectors.insert(view.to_string(), selector);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn session_creates_selectors_on_demand() {
        let mut session = Session::new();
        session.selector_mut("users").limit = Some(5);
        assert_eq!(session.selector("users").and_then(|s| s.limit), Some(5));
        assert!(session.selector("orders").is_none());
    }

    #[test]
    fn empty_projection_includes_everything() {
        let sel = Selector::new();
        assert!(sel.includes("anything"));
    }

    #[test]
    fn projection_excludes_unlisted_fields() {
        let sel = Selector::new().project(&["id", "name"]);
        assert!(sel.includes("id"));
        assert!(!sel.includes("Orders"));
    }

    #[test]
    fn builder_round_trip() {
        let sel = Selector::new()
            .with_limit(10)
            .with_offset(20)
            .order_by("created", SortDirection::Desc)
            .with_criteria("safe_column(status) = safe_int(1)", vec![]);
        assert_eq!(sel.limit, Some(10));
        assert_eq!(sel.offset, Some(20));
        assert_eq!(sel.order_by[0].direction, SortDirection::Desc);
        assert!(!sel.is_empty());
    }
}
