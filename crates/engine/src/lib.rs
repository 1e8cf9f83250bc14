//! Raccolta View Materialization Engine
//!
//! Declarative views describe a graph of related query sources; a read
//! fetches every view in the graph, merges child rows into their
//! parents by join key, and returns nested typed records. SQL is built
//! from sanitized templates, so caller-controlled data only ever
//! reaches the database through the bind channel.

pub mod collect;
pub mod error;
pub mod reader;
pub mod schema;
pub mod selector;
pub mod source;
pub mod template;
pub mod value;
pub mod view;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{EngineError, EngineResult};
pub use reader::Reader;
pub use schema::{Column, FieldDescriptor, Record, RecordSchema};
pub use selector::{OrderBy, Selector, Session, SortDirection};
pub use source::{Codec, CodecRegistry, ColumnMeta, RowSet, RowSource, VecRowSet};
pub use value::{DataType, Value};
pub use view::{Cardinality, MatchStrategy, ReferenceView, Relation, SelfReference, View};
