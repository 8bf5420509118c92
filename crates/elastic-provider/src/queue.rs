//! Bounded FIFO call queue in front of the search engine.
//!
//! Every engine call the provider makes is wrapped in an [`EngineCall`] and
//! submitted here. At most `concurrency` calls are in flight; further callers
//! wait on a fair semaphore, so calls start in submission order.

use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::engine::{
    BulkRequest, CountRequest, CreateIndexRequest, DeleteByQueryRequest, DeleteRequest,
    IndexRequest, SearchEngine, SearchRequest, UpdateRequest,
};
use crate::error::{EngineError, EngineResult};

/// A call to the search engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    /// [`SearchEngine::index`].
    Index(IndexRequest),
    /// [`SearchEngine::update`].
    Update(UpdateRequest),
    /// [`SearchEngine::bulk`].
    Bulk(BulkRequest),
    /// [`SearchEngine::delete`].
    Delete(DeleteRequest),
    /// [`SearchEngine::delete_by_query`].
    DeleteByQuery(DeleteByQueryRequest),
    /// [`SearchEngine::search`].
    Search(SearchRequest),
    /// [`SearchEngine::count`].
    Count(CountRequest),
    /// [`SearchEngine::create_index`].
    CreateIndex(CreateIndexRequest),
    /// [`SearchEngine::index_exists`]; replies with a JSON boolean.
    IndexExists(String),
}

impl EngineCall {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineCall::Index(_) => "index",
            EngineCall::Update(_) => "update",
            EngineCall::Bulk(_) => "bulk",
            EngineCall::Delete(_) => "delete",
            EngineCall::DeleteByQuery(_) => "delete_by_query",
            EngineCall::Search(_) => "search",
            EngineCall::Count(_) => "count",
            EngineCall::CreateIndex(_) => "create_index",
            EngineCall::IndexExists(_) => "index_exists",
        }
    }
}

/// Bounds concurrent engine calls.
pub struct CallQueue {
    name: &'static str,
    engine: Arc<dyn SearchEngine>,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl Debug for CallQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallQueue")
            .field("name", &self.name)
            .field("concurrency", &self.concurrency)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl CallQueue {
    /// Creates a queue allowing `concurrency` calls in flight (at least one).
    pub fn new(name: &'static str, engine: Arc<dyn SearchEngine>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            name,
            engine,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    /// Waits for a slot, then runs the call.
    pub async fn submit(&self, call: EngineCall) -> EngineResult<Value> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EngineError::Closed)?;

        tracing::debug!(queue = self.name, call = call.kind(), "dispatching engine call");

        match call {
            EngineCall::Index(request) => self.engine.index(request).await,
            EngineCall::Update(request) => self.engine.update(request).await,
            EngineCall::Bulk(request) => self.engine.bulk(request).await,
            EngineCall::Delete(request) => self.engine.delete(request).await,
            EngineCall::DeleteByQuery(request) => self.engine.delete_by_query(request).await,
            EngineCall::Search(request) => self.engine.search(request).await,
            EngineCall::Count(request) => self.engine.count(request).await,
            EngineCall::CreateIndex(request) => self.engine.create_index(request).await,
            EngineCall::IndexExists(index) => {
                self.engine.index_exists(&index).await.map(Value::Bool)
            }
        }
    }

    /// Calls currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.concurrency - self.permits.available_permits()
    }

    /// Maximum calls in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Rejects every waiting and future call with [`EngineError::Closed`].
    pub fn close(&self) {
        self.permits.close();
    }

    /// The engine calls are dispatched to.
    pub fn engine(&self) -> &Arc<dyn SearchEngine> {
        &self.engine
    }
}
