//! View definitions: named, schema-bearing descriptions of fetchable
//! data sources and the relations connecting them.
//!
//! A view graph is built once (deserialized or assembled in code),
//! then `init` resolves columns, synthesizes holder fields, and wires
//! relations recursively. Initialization is single-threaded and the
//! result is treated as immutable afterward.

mod relation;
mod strategy;

pub use relation::{Cardinality, ReferenceView, Relation};
pub use strategy::MatchStrategy;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::schema::{Column, FieldDescriptor, RecordSchema};
use crate::value::DataType;

/// Self-referential hierarchy descriptor: rows of this view reference
/// other rows of the same view as parent/child, and the merged result
/// is restructured into a rooted forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfReference {
    /// Holder field collecting child records (exported-style name).
    pub holder: String,

    /// Column carrying the parent key on each row.
    pub parent_column: String,

    /// Column carrying the row's own key.
    pub child_column: String,
}

/// Filterable whitelist and fetch defaults for a view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Column names that dynamic criteria may reference; `*` allows
    /// every declared column.
    #[serde(default)]
    pub filterable: Vec<String>,

    /// Limit applied when the request selector sets none.
    #[serde(default)]
    pub default_limit: Option<u64>,
}

/// A named, initialized description of one query source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct View {
    /// Unique name within the view graph.
    pub name: String,

    /// Base table or inner query source.
    pub table: String,

    /// Optional SQL template; when absent a canonical SELECT is
    /// synthesized from the column list.
    #[serde(default)]
    pub sql: Option<String>,

    #[serde(default)]
    pub columns: Vec<Column>,

    /// Relations to child views.
    #[serde(default)]
    pub with: Vec<Relation>,

    #[serde(default)]
    pub selector: SelectorConfig,

    #[serde(default)]
    pub self_reference: Option<SelfReference>,

    #[serde(skip)]
    schema: Option<Arc<RecordSchema>>,

    #[serde(skip)]
    initialized: bool,
}

impl View {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            sql: None,
            columns: Vec::new(),
            with: Vec::new(),
            selector: SelectorConfig::default(),
            self_reference: None,
            schema: None,
            initialized: false,
        }
    }

    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_sql(mut self, sql: &str) -> Self {
        self.sql = Some(sql.to_string());
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.with.push(relation);
        self
    }

    /// Whitelist columns for dynamic criteria (`*` for all).
    pub fn with_filterable(mut self, names: &[&str]) -> Self {
        self.selector.filterable = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    pub fn with_default_limit(mut self, limit: u64) -> Self {
        self.selector.default_limit = Some(limit);
        self
    }

    pub fn with_self_reference(mut self, holder: &str, parent_column: &str, child_column: &str) -> Self {
        self.self_reference = Some(SelfReference {
            holder: holder.to_string(),
            parent_column: parent_column.to_string(),
            child_column: child_column.to_string(),
        });
        self
    }

    /// Resolve the view graph. Idempotent; must run before any fetch.
    ///
    /// Applies the filterable whitelist, hides excluded join columns,
    /// builds the record schema, initializes relations (which
    /// synthesize holder fields and recursively initialize child
    /// views), and validates the self-reference descriptor.
    pub fn init(&mut self) -> EngineResult<()> {
        if self.initialized {
            return Ok(());
        }
        if self.name.is_empty() {
            return Err(self.config_error("view name must be non-empty"));
        }
        if self.table.is_empty() && self.sql.is_none() {
            return Err(self.config_error("view must declare a table or a SQL template"));
        }
        if self.columns.is_empty() {
            return Err(self.config_error("view must declare at least one column"));
        }

        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(self.config_error(&format!("duplicate column '{}'", col.name)));
            }
        }

        self.apply_filterable()?;

        // Join columns excluded from output are still fetched; they
        // only disappear from rendered records.
        let hidden: Vec<String> = self
            .with
            .iter()
            .filter(|rel| !rel.include_column)
            .map(|rel| rel.column.clone())
            .collect();
        for col in &mut self.columns {
            if hidden.contains(&col.name) {
                col.hidden = true;
            }
        }

        let mut schema = RecordSchema::new();
        for col in &self.columns {
            schema.push_field(FieldDescriptor {
                name: col.name.clone(),
                data_type: col.data_type,
                nullable: col.nullable,
                hidden: col.hidden,
            })?;
        }

        for rel in &mut self.with {
            rel.init(&self.name, &self.columns, &mut schema)?;
        }

        if let Some(self_ref) = &self.self_reference {
            for col in [&self_ref.parent_column, &self_ref.child_column] {
                if !self.columns.iter().any(|c| &c.name == col) {
                    return Err(self.config_error(&format!(
                        "self-reference column '{col}' is not declared"
                    )));
                }
            }
            relation::validate_holder_name(&self_ref.holder)
                .map_err(|reason| self.config_error(&reason))?;
            match schema.field_index(&self_ref.holder) {
                Some(idx) => {
                    let field = schema.field(idx).ok_or_else(|| {
                        EngineError::Internal(format!("holder index {idx} out of range"))
                    })?;
                    if field.data_type != DataType::RecordList {
                        return Err(self.config_error(&format!(
                            "self-reference holder '{}' must be a record list",
                            self_ref.holder
                        )));
                    }
                }
                None => {
                    schema.push_field(FieldDescriptor {
                        name: self_ref.holder.clone(),
                        data_type: DataType::RecordList,
                        nullable: true,
                        hidden: false,
                    })?;
                }
            }
        }

        self.schema = Some(Arc::new(schema));
        self.initialized = true;

        // Children are initialized at this point, so the whole
        // subtree can be checked for name collisions.
        let mut names = HashSet::new();
        self.check_unique_names(&mut names)?;

        Ok(())
    }

    fn apply_filterable(&mut self) -> EngineResult<()> {
        if self.selector.filterable.iter().any(|f| f == "*") {
            for col in &mut self.columns {
                col.filterable = true;
            }
            return Ok(());
        }
        for name in &self.selector.filterable {
            match self.columns.iter_mut().find(|c| &c.name == name) {
                Some(col) => col.filterable = true,
                None => return Err(EngineError::UnknownColumn(name.clone())),
            }
        }
        Ok(())
    }

    fn check_unique_names(&self, names: &mut HashSet<String>) -> EngineResult<()> {
        if !names.insert(self.name.clone()) {
            return Err(EngineError::DuplicateView(self.name.clone()));
        }
        for rel in &self.with {
            rel.of.view.check_unique_names(names)?;
        }
        Ok(())
    }

    fn config_error(&self, reason: &str) -> EngineError {
        EngineError::Config {
            view: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    /// The resolved record schema; an error before `init`.
    pub fn schema(&self) -> EngineResult<Arc<RecordSchema>> {
        self.schema
            .clone()
            .ok_or_else(|| self.config_error("view is not initialized"))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.with.iter().find(|r| r.name == name)
    }
}
