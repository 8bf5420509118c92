//! Search engine seam.
//!
//! The provider talks to the engine only through [`SearchEngine`]. Requests
//! are small typed structs; responses are the engine's JSON, consumed
//! verbatim by the provider (`hits.hits[]`, `result`, `get._source`,
//! `count`, `items[]`, `errors`).

mod elasticsearch;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineResult;

pub use self::elasticsearch::ElasticsearchEngine;

/// Indexes a whole document.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRequest {
    /// Target index.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Document source.
    pub body: Value,
    /// Fail with a conflict if the id already exists.
    pub create_only: bool,
    /// Make the write visible to search before returning.
    pub refresh: bool,
}

/// Partially updates (or upserts) a document.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    /// Target index.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Update body: `doc`, and `upsert` for upserts.
    pub body: Value,
    /// Times to retry on a version conflict.
    pub retry_on_conflict: u32,
    /// Make the write visible to search before returning.
    pub refresh: bool,
}

/// A batch of index actions.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkRequest {
    /// Alternating action and source lines.
    pub operations: Vec<Value>,
    /// Make the writes visible to search before returning.
    pub refresh: bool,
}

/// Deletes one document by id.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    /// Target index.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Make the delete visible to search before returning.
    pub refresh: bool,
}

/// Deletes every document matching a query.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteByQueryRequest {
    /// Target index expression: a name, a `*` pattern or a comma-separated
    /// list of either.
    pub index: String,
    /// Query DSL, without the `query` wrapper.
    pub query: Value,
    /// Refresh the index once the deletes are done.
    pub refresh: bool,
}

/// Searches the indices an index expression names.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Target index expression, as for [`DeleteByQueryRequest::index`].
    pub index: String,
    /// Full search body (`query`, `size`, `from`, `sort`, `_source`).
    pub body: Value,
}

/// Counts documents in the indices an index expression names.
#[derive(Debug, Clone, PartialEq)]
pub struct CountRequest {
    /// Target index expression, as for [`DeleteByQueryRequest::index`].
    pub index: String,
    /// Query DSL, without the `query` wrapper. `None` counts everything.
    pub query: Option<Value>,
}

/// Creates an index.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexRequest {
    /// Index name.
    pub index: String,
    /// `settings` and `mappings`.
    pub body: Value,
}

/// The subset of a search engine client the provider needs.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Checks that the cluster answers within `timeout`.
    async fn ping(&self, timeout: Duration) -> EngineResult<()>;

    /// Indexes a document.
    async fn index(&self, request: IndexRequest) -> EngineResult<Value>;

    /// Updates or upserts a document.
    async fn update(&self, request: UpdateRequest) -> EngineResult<Value>;

    /// Runs a bulk request.
    async fn bulk(&self, request: BulkRequest) -> EngineResult<Value>;

    /// Deletes a document by id.
    async fn delete(&self, request: DeleteRequest) -> EngineResult<Value>;

    /// Deletes documents matching a query.
    async fn delete_by_query(&self, request: DeleteByQueryRequest) -> EngineResult<Value>;

    /// Searches an index.
    async fn search(&self, request: SearchRequest) -> EngineResult<Value>;

    /// Counts documents.
    async fn count(&self, request: CountRequest) -> EngineResult<Value>;

    /// Creates an index. An index that already exists is reported as
    /// [`EngineError::AlreadyExists`](crate::error::EngineError::AlreadyExists).
    async fn create_index(&self, request: CreateIndexRequest) -> EngineResult<Value>;

    /// Returns true if the index exists.
    async fn index_exists(&self, index: &str) -> EngineResult<bool>;

    /// Closes the client. Later calls fail with
    /// [`EngineError::Closed`](crate::error::EngineError::Closed).
    async fn close(&self) -> EngineResult<()>;
}
