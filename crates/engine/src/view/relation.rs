//! Relations between a parent view and a referenced child view.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::schema::{Column, FieldDescriptor, RecordSchema};
use crate::value::DataType;
use crate::view::{MatchStrategy, View};

/// Cardinality of a relation's holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

impl Cardinality {
    /// The holder field type implied by this cardinality.
    pub fn holder_type(self) -> DataType {
        match self {
            Cardinality::One => DataType::Record,
            Cardinality::Many => DataType::RecordList,
        }
    }
}

/// The child side of a relation: the referenced view plus the join
/// column on the child's record type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceView {
    pub view: View,

    /// Child-side join column.
    pub on_column: String,
}

/// A typed join from a parent view to a child view.
///
/// The holder field is synthesized into the parent's record schema at
/// init time; its shape follows the cardinality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,

    pub cardinality: Cardinality,

    /// Parent-side join column.
    pub column: String,

    /// Field on the parent record that stores the child value(s).
    /// Must be an exported-style identifier (leading uppercase).
    pub holder: String,

    /// Whether the raw join column stays in the rendered output.
    #[serde(default = "default_true")]
    pub include_column: bool,

    #[serde(default)]
    pub strategy: MatchStrategy,

    pub of: ReferenceView,
}

fn default_true() -> bool {
    true
}

impl Relation {
    /// Create a `Many` relation with defaults.
    pub fn many(name: &str, column: &str, holder: &str, child: View, on_column: &str) -> Self {
        Self::new(name, Cardinality::Many, column, holder, child, on_column)
    }

    /// Create a `One` relation with defaults.
    pub fn one(name: &str, column: &str, holder: &str, child: View, on_column: &str) -> Self {
        Self::new(name, Cardinality::One, column, holder, child, on_column)
    }

    fn new(
        name: &str,
        cardinality: Cardinality,
        column: &str,
        holder: &str,
        child: View,
        on_column: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            cardinality,
            column: column.to_string(),
            holder: holder.to_string(),
            include_column: true,
            strategy: MatchStrategy::default(),
            of: ReferenceView {
                view: child,
                on_column: on_column.to_string(),
            },
        }
    }

    /// Set the match strategy.
    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Drop the raw join column from rendered output.
    pub fn exclude_column(mut self) -> Self {
        self.include_column = false;
        self
    }

    pub fn supports_parallel(&self) -> bool {
        self.strategy.supports_parallel()
    }

    /// Wire this relation into its parent view.
    ///
    /// Validates join links, locates or synthesizes the holder field
    /// on the parent schema, and recursively initializes the child
    /// view. Every failure is fatal at configuration time.
    pub(crate) fn init(
        &mut self,
        parent_view: &str,
        parent_columns: &[Column],
        parent_schema: &mut RecordSchema,
    ) -> EngineResult<()> {
        if self.column.is_empty() || self.of.on_column.is_empty() {
            return Err(self.invalid(parent_view, "join link columns must be non-empty"));
        }
        if !parent_columns.iter().any(|c| c.name == self.column) {
            return Err(self.invalid(
                parent_view,
                &format!("parent join column '{}' is not declared", self.column),
            ));
        }

        validate_holder_name(&self.holder)
            .map_err(|reason| self.invalid(parent_view, &reason))?;

        self.of.view.init()?;
        if self.of.view.column(&self.of.on_column).is_none() {
            return Err(self.invalid(
                parent_view,
                &format!(
                    "child join column '{}' is not declared on view '{}'",
                    self.of.on_column, self.of.view.name
                ),
            ));
        }

        let holder_type = self.cardinality.holder_type();
        match parent_schema.field_index(&self.holder) {
            Some(idx) => {
                // Pre-declared holder: its shape must agree with the
                // cardinality.
                let field = parent_schema.field(idx).ok_or_else(|| {
                    EngineError::Internal(format!("holder index {idx} out of range"))
                })?;
                if field.data_type != holder_type {
                    return Err(self.invalid(
                        parent_view,
                        &format!(
                            "holder '{}' has shape {}, cardinality requires {}",
                            self.holder,
                            field.data_type.name(),
                            holder_type.name()
                        ),
                    ));
                }
            }
            None => {
                parent_schema.push_field(FieldDescriptor {
                    name: self.holder.clone(),
                    data_type: holder_type,
                    nullable: true,
                    hidden: false,
                })?;
            }
        }

        Ok(())
    }

    fn invalid(&self, parent_view: &str, reason: &str) -> EngineError {
        EngineError::Relation {
            view: parent_view.to_string(),
            relation: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Holder fields use exported-style names: a leading uppercase ASCII
/// letter followed by identifier characters.
pub(crate) fn validate_holder_name(holder: &str) -> Result<(), String> {
    let mut chars = holder.chars();
    match chars.next() {
        None => return Err("holder field name must be non-empty".to_string()),
        Some(first) if !first.is_ascii_uppercase() => {
            return Err(format!(
                "holder '{holder}' must start with an uppercase letter"
            ));
        }
        Some(_) => {}
    }
    if chars.any(|c| !c.is_ascii_alphanumeric() && c != '_') {
        return Err(format!("holder '{holder}' is not a valid identifier"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::value::DataType;

    fn child_view() -> View {
        View::new("orders", "orders").with_columns(vec![
            Column::new("id", DataType::Int),
            Column::new("user_id", DataType::Int),
        ])
    }

    #[test]
    fn holder_naming_rules() {
        assert!(validate_holder_name("Orders").is_ok());
        assert!(validate_holder_name("orders").is_err());
        assert!(validate_holder_name("").is_err());
        assert!(validate_holder_name("Or ders").is_err());
    }

    #[test]
    fn init_synthesizes_holder() {
        let mut schema = RecordSchema::new();
        let parent_columns = vec![Column::new("id", DataType::Int)];
        let mut rel = Relation::many("user_orders", "id", "Orders", child_view(), "user_id");

        rel.init("users", &parent_columns, &mut schema).unwrap();

        let idx = schema.field_index("Orders").unwrap();
        assert_eq!(schema.field(idx).unwrap().data_type, DataType::RecordList);
    }

    #[test]
    fn missing_parent_column_is_fatal() {
        let mut schema = RecordSchema::new();
        let parent_columns = vec![Column::new("id", DataType::Int)];
        let mut rel = Relation::many("user_orders", "nope", "Orders", child_view(), "user_id");

        let err = rel.init("users", &parent_columns, &mut schema);
        assert!(matches!(err, Err(EngineError::Relation { .. })));
    }

    #[test]
    fn lowercase_holder_is_fatal() {
        let mut schema = RecordSchema::new();
        let parent_columns = vec![Column::new("id", DataType::Int)];
        let mut rel = Relation::many("user_orders", "id", "orders", child_view(), "user_id");

        let err = rel.init("users", &parent_columns, &mut schema);
        assert!(matches!(err, Err(EngineError::Relation { .. })));
    }

    #[test]
    fn predeclared_holder_shape_must_match_cardinality() {
        let mut schema = RecordSchema::new();
        schema
            .push_field(FieldDescriptor {
                name: "Orders".into(),
                data_type: DataType::Record,
                nullable: true,
                hidden: false,
            })
            .unwrap();
        let parent_columns = vec![Column::new("id", DataType::Int)];
        let mut rel = Relation::many("user_orders", "id", "Orders", child_view(), "user_id");

        let err = rel.init("users", &parent_columns, &mut schema);
        assert!(matches!(err, Err(EngineError::Relation { .. })));
    }

    #[test]
    fn missing_child_join_column_is_fatal() {
        let mut schema = RecordSchema::new();
        let parent_columns = vec![Column::new("id", DataType::Int)];
        let mut rel = Relation::many("user_orders", "id", "Orders", child_view(), "owner_id");

        let err = rel.init("users", &parent_columns, &mut schema);
        assert!(matches!(err, Err(EngineError::Relation { .. })));
    }
}
