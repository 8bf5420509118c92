//! Error types for the provider.
//!
//! Errors are grouped by the stage of a call that produced them: routing,
//! index administration, configuration, payload validation, criteria
//! translation, removal, the engine itself, and the cache.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// No route matched a path.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Index creation or naming errors.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid call arguments.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Criteria could not be translated into an engine query.
    #[error(transparent)]
    Criteria(#[from] CriteriaError),

    /// Remove could not establish how many documents it would delete.
    #[error(transparent)]
    Remove(#[from] RemoveError),

    /// Passthrough from the search engine client.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Cache layer failures.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Errors raised while resolving a path against the route table.
#[derive(Error, Debug)]
pub enum RouteError {
    /// No configured pattern matches the path.
    #[error("route for path {path} does not exist")]
    NotFound { path: String },
}

/// Errors raised by index administration.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The engine refused to create an index for a reason other than
    /// the index already existing.
    #[error("failed creating index {index}: {source}")]
    CreationFailed {
        index: String,
        #[source]
        source: EngineError,
    },

    /// A dynamic index name derived from a path violates the engine's
    /// naming rules.
    #[error("bad dynamic index name '{index}': {reason}")]
    BadDynamicIndexName { index: String, reason: String },
}

/// Configuration errors. These are fatal at initialization.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A dynamic route declares a field type the provider cannot map.
    #[error("unsupported field type '{field_type}' for field '{field}' in route {pattern}")]
    UnsupportedFieldType {
        pattern: String,
        field: String,
        field_type: String,
    },

    /// A route definition is malformed.
    #[error("invalid route {pattern}: {message}")]
    InvalidRoute { pattern: String, message: String },

    /// A configuration file could not be read or parsed.
    #[error("failed to load configuration: {message}")]
    Load { message: String },

    /// One or more configuration values are invalid.
    #[error("invalid configuration: {}", .problems.join("; "))]
    Invalid { problems: Vec<String> },
}

/// Errors raised while validating call arguments.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A bulk upsert carried more items than a single batch allows.
    #[error("bulk batches can only be {max} entries or less, got {count}")]
    BulkSizeExceeded { count: usize, max: usize },

    /// A dynamic path segment could not be parsed as its declared type.
    #[error("value '{value}' for field '{field}' is not a valid {field_type}")]
    InvalidFieldValue {
        field: String,
        field_type: String,
        value: String,
    },

    /// The write payload has the wrong shape.
    #[error("invalid payload: {message}")]
    InvalidPayload { message: String },
}

/// Errors raised while translating a criteria tree.
#[derive(Error, Debug)]
pub enum CriteriaError {
    /// An object was expected.
    #[error("criteria at '{at}' must be an object")]
    NotAnObject { at: String },

    /// An operator expected an array operand.
    #[error("operator {operator} at '{at}' requires an array")]
    ExpectedArray { operator: String, at: String },

    /// A combinator was given no clauses.
    #[error("operator {operator} at '{at}' requires at least one clause")]
    EmptyCombinator { operator: String, at: String },

    /// Unknown `$` operator.
    #[error("unsupported operator {operator} at '{at}'")]
    UnsupportedOperator { operator: String, at: String },

    /// An operator was given an operand of the wrong type.
    #[error("invalid operand for {operator} at '{at}': {message}")]
    InvalidOperand {
        operator: String,
        at: String,
        message: String,
    },
}

/// Errors raised by remove.
#[derive(Error, Debug)]
pub enum RemoveError {
    /// The pre-delete count failed, so the delete was never attempted.
    #[error("count operation failed for delete of {path}: {source}")]
    CountFailed {
        path: String,
        #[source]
        source: Box<ProviderError>,
    },
}

/// Errors reported by the search engine client.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The transport failed before a response arrived.
    #[error("engine transport error: {message}")]
    Transport { message: String },

    /// The engine answered with a non-success status.
    #[error("engine returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The index already exists. Absorbed as success by index creation.
    #[error("index already exists: {index}")]
    AlreadyExists { index: String },

    /// The engine response could not be decoded.
    #[error("failed to decode engine response: {message}")]
    Decode { message: String },

    /// The client was closed by `stop`.
    #[error("engine client is closed")]
    Closed,
}

impl EngineError {
    /// Returns true if this error reports an index that already exists.
    pub fn is_already_exists(&self) -> bool {
        match self {
            EngineError::AlreadyExists { .. } => true,
            EngineError::Status { body, .. } => is_already_exists_body(body),
            _ => false,
        }
    }

    /// Returns true if the engine reported a missing index or document.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Status { status: 404, .. })
    }
}

/// Recognizes both the current and the pre-6.x spelling of the engine's
/// "already exists" exception.
pub(crate) fn is_already_exists_body(body: &str) -> bool {
    body.contains("resource_already_exists_exception")
        || body.contains("index_already_exists_exception")
}

/// Errors reported by a document cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache backend failed.
    #[error("cache {operation} failed for key {key}: {message}")]
    Backend {
        operation: String,
        key: String,
        message: String,
    },
}

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result type alias for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Engine(EngineError::Decode {
            message: err.to_string(),
        })
    }
}
