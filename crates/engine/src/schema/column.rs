//! Output column model for views.

use serde::{Deserialize, Serialize};

use crate::value::DataType;

/// One output field of a view: name, source expression, nullability,
/// and the filterable flag that gates dynamic criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Output field name.
    pub name: String,

    /// Source SQL expression; defaults to the column name.
    #[serde(default)]
    pub expression: Option<String>,

    /// Resolved value type.
    pub data_type: DataType,

    /// Whether the database column may be NULL.
    #[serde(default = "default_true")]
    pub nullable: bool,

    /// Whether dynamic criteria may reference this column.
    ///
    /// False by default; set through the view's filterable whitelist
    /// (by name or the `*` wildcard) at init time.
    #[serde(default)]
    pub filterable: bool,

    /// Optional named codec applied to scanned values.
    #[serde(default)]
    pub codec: Option<String>,

    /// Hidden columns are fetched (join keys need them) but excluded
    /// from rendered output. Set when a relation declares
    /// `include_column: false`.
    #[serde(skip)]
    pub hidden: bool,
}

fn default_true() -> bool {
    true
}

impl Column {
    /// Create a column with the given name and type.
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            expression: None,
            data_type,
            nullable: true,
            filterable: false,
            codec: None,
            hidden: false,
        }
    }

    /// Set the source SQL expression.
    pub fn with_expression(mut self, expression: &str) -> Self {
        self.expression = Some(expression.to_string());
        self
    }

    /// Mark as non-nullable.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Attach a named codec.
    pub fn with_codec(mut self, codec: &str) -> Self {
        self.codec = Some(codec.to_string());
        self
    }

    /// The SQL expression selecting this column.
    pub fn sql_expression(&self) -> &str {
        self.expression.as_deref().unwrap_or(&self.name)
    }

    /// The SELECT-list fragment, aliased when an expression is set.
    pub fn select_fragment(&self) -> String {
        match &self.expression {
            Some(expr) if expr != &self.name => format!("{expr} AS {}", self.name),
            _ => self.name.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn filterable_defaults_false() {
        let json = r#"{"name": "id", "data_type": "int"}"#;
        let col: Column = serde_json::from_str(json).unwrap();
        assert!(!col.filterable);
        assert!(col.nullable);
    }

    #[test]
    fn select_fragment_aliases_expressions() {
        let plain = Column::new("id", DataType::Int);
        assert_eq!(plain.select_fragment(), "id");

        let expr = Column::new("full_name", DataType::Text)
            .with_expression("first_name || ' ' || last_name");
        assert_eq!(
            expr.select_fragment(),
            "first_name || ' ' || last_name AS full_name"
        );
    }
}
