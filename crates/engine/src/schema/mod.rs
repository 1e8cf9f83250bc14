//! Record schema and field accessors.
//!
//! A `RecordSchema` is built once at view init time from the declared
//! columns plus any synthesized relation holders. All later field
//! access goes through index-based descriptors; there is no runtime
//! reflection.

mod column;

pub use column::Column;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::value::{DataType, Value};

/// One field of a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    /// Hidden fields are carried for join-key extraction but skipped
    /// when rendering output.
    pub hidden: bool,
}

/// Ordered field list with a name index, shared by all records of one
/// view. Immutable once the owning view is initialized.
#[derive(Debug, Default, PartialEq)]
pub struct RecordSchema {
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
}

impl RecordSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field; duplicate names are a configuration error.
    pub fn push_field(&mut self, field: FieldDescriptor) -> EngineResult<usize> {
        if self.index.contains_key(&field.name) {
            return Err(EngineError::Config {
                view: String::new(),
                reason: format!("duplicate field '{}'", field.name),
            });
        }
        let idx = self.fields.len();
        self.index.insert(field.name.clone(), idx);
        self.fields.push(field);
        Ok(idx)
    }

    /// Position of a field by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn field(&self, idx: usize) -> Option<&FieldDescriptor> {
        self.fields.get(idx)
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One materialized row, including any merged relation holders.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<RecordSchema>,
    values: Vec<Value>,
}

impl Record {
    /// Allocate a record with all fields null.
    pub fn new(schema: Arc<RecordSchema>) -> Self {
        let values = vec![Value::Null; schema.len()];
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// Read a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.field_index(name).map(|idx| &self.values[idx])
    }

    /// Read a field by position.
    pub fn get_at(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Write a field by position, validating against the descriptor.
    pub fn set_at(&mut self, idx: usize, value: Value) -> EngineResult<()> {
        let field = self
            .schema
            .field(idx)
            .ok_or_else(|| EngineError::Internal(format!("field index {idx} out of range")))?;
        if let Some(actual) = value.data_type()
            && actual != field.data_type
        {
            return Err(EngineError::TypeMismatch {
                field: field.name.clone(),
                expected: field.data_type.name(),
                actual: actual.name(),
            });
        }
        self.values[idx] = value;
        Ok(())
    }

    /// Write a scanned driver value, coercing across the numeric
    /// family. Drivers routinely disagree with the declared schema on
    /// exact numeric width.
    pub fn set_scanned(&mut self, idx: usize, value: Value) -> EngineResult<()> {
        let field = self
            .schema
            .field(idx)
            .ok_or_else(|| EngineError::Internal(format!("field index {idx} out of range")))?;
        let coerced = match (&value, field.data_type) {
            (Value::Int(i), DataType::Float) => Value::Float(*i as f64),
            (Value::Float(f), DataType::Int) if f.fract() == 0.0 => Value::Int(*f as i64),
            (Value::Text(s), DataType::Uuid) => match uuid::Uuid::parse_str(s) {
                Ok(u) => Value::Uuid(u),
                Err(_) => value,
            },
            _ => value,
        };
        self.set_at(idx, coerced)
    }

    /// Append a child record to a `Many` holder, or assign a `One`
    /// holder, based on the holder's declared shape.
    pub fn attach_child(&mut self, holder_idx: usize, child: Record) -> EngineResult<()> {
        let field = self.schema.field(holder_idx).ok_or_else(|| {
            EngineError::Internal(format!("holder index {holder_idx} out of range"))
        })?;
        match field.data_type {
            DataType::Record => {
                self.values[holder_idx] = Value::Record(child);
                Ok(())
            }
            DataType::RecordList => {
                match &mut self.values[holder_idx] {
                    Value::Many(items) => items.push(child),
                    slot @ Value::Null => *slot = Value::Many(vec![child]),
                    other => {
                        return Err(EngineError::TypeMismatch {
                            field: field.name.clone(),
                            expected: DataType::RecordList.name(),
                            actual: other.type_name(),
                        });
                    }
                }
                Ok(())
            }
            other => Err(EngineError::TypeMismatch {
                field: field.name.clone(),
                expected: "record or record_list",
                actual: other.name(),
            }),
        }
    }

    /// Render as a JSON object, skipping hidden fields. A null `Many`
    /// holder renders as an empty array.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(self.values.len());
        for (field, value) in self.schema.fields().iter().zip(&self.values) {
            if field.hidden {
                continue;
            }
            let rendered = match (field.data_type, value) {
                (DataType::RecordList, Value::Null) => serde_json::Value::Array(Vec::new()),
                _ => value.to_json(),
            };
            map.insert(field.name.clone(), rendered);
        }
        serde_json::Value::Object(map)
    }
}
