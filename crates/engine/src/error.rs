//! Engine error types.

use thiserror::Error;

/// Errors raised by the materialization engine.
///
/// Configuration errors surface from `View::init` before any fetch
/// starts; sanitization errors abort a single SQL expansion; fetch and
/// merge errors abort the enclosing read, discarding partial output.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("view not found: {0}")]
    ViewNotFound(String),

    #[error("duplicate view name: {0}")]
    DuplicateView(String),

    #[error("view '{view}' is misconfigured: {reason}")]
    Config { view: String, reason: String },

    #[error("relation '{relation}' on view '{view}' is invalid: {reason}")]
    Relation {
        view: String,
        relation: String,
        reason: String,
    },

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("column '{0}' is not filterable")]
    NotFilterable(String),

    #[error("literal not supported: {0:?}")]
    UnsupportedLiteral(String),

    #[error("cannot convert {value:?} to {target}")]
    Conversion {
        value: String,
        target: &'static str,
    },

    #[error("unsupported join key type: {0}")]
    UnsupportedKeyType(&'static str),

    #[error("unsupported match strategy: {0}")]
    UnsupportedStrategy(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("cyclic self-reference involving key {0}")]
    CyclicSelfReference(String),

    #[error("no value bound for template parameter '{0}'")]
    UnboundParameter(String),

    #[error("sanitized argument cursor exhausted")]
    SanitizedArgsExhausted,

    #[error("missing placeholder value for criteria bind marker")]
    MissingPlaceholder,

    #[error("unknown codec: {0}")]
    UnknownCodec(String),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("row source error: {0}")]
    Source(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;
