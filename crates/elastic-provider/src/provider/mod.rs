//! The Elasticsearch path-store provider.
//!
//! Each call resolves its path against the route table, makes sure the
//! target index exists (dynamic routes), builds the engine request, submits
//! it through the call queue and normalizes the response.

mod read;
mod write;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{IndexConfig, ProviderConfig};
use crate::document::{RemoveResult, StoredDocument, UpsertOutcome};
use crate::engine::SearchEngine;
use crate::error::{ConfigError, ProviderResult};
use crate::index::{DynamicBinding, IndexRegistry, IndexSettings};
use crate::queue::CallQueue;
use crate::route::{Route, RouteTable};
use crate::store::{
    CountTarget, FindOptions, FindParameters, PathStore, UpsertOptions, UpsertPayload,
};

/// Where a read should go.
#[derive(Debug)]
pub(crate) enum ReadTarget {
    /// Read from `index`, a name or an index pattern, narrowed to one type
    /// when the path names one.
    Ready {
        route: Arc<Route>,
        index: String,
        doc_type: Option<String>,
    },
    /// A dynamic route naming an index that has not been created yet.
    NoIndexYet,
}

/// Document store backed by Elasticsearch.
pub struct ElasticProvider {
    config: ProviderConfig,
    engine: Arc<dyn SearchEngine>,
    calls: CallQueue,
    admin: Arc<CallQueue>,
    indexes: IndexRegistry,
    routes: RouteTable,
}

impl Debug for ElasticProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticProvider")
            .field("name", &self.config.name)
            .field("routes", &self.routes.routes().len())
            .field("calls", &self.calls)
            .field("indexes", &self.indexes)
            .finish_non_exhaustive()
    }
}

impl ElasticProvider {
    /// Creates a provider over an engine. The configuration is validated and
    /// the route table built; nothing is sent to the engine until
    /// [`PathStore::initialize`].
    pub fn new(config: ProviderConfig, engine: Arc<dyn SearchEngine>) -> ProviderResult<Self> {
        config
            .validate()
            .map_err(|problems| ConfigError::Invalid { problems })?;
        let routes = RouteTable::build(&config)?;

        let calls = CallQueue::new("elastic", Arc::clone(&engine), config.elastic_call_concurrency);
        let admin = Arc::new(CallQueue::new(
            "admin",
            Arc::clone(&engine),
            config.admin_call_concurrency,
        ));
        let indexes = IndexRegistry::new(
            Arc::clone(&admin),
            IndexSettings {
                number_of_shards: config.number_of_shards,
                number_of_replicas: config.number_of_replicas,
            },
        );

        Ok(Self {
            config,
            engine,
            calls,
            admin,
            indexes,
            routes,
        })
    }

    /// The provider configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The route table.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// The dynamic index registry.
    pub fn indexes(&self) -> &IndexRegistry {
        &self.indexes
    }

    /// Converts a stored document into the framework's `{data, _meta}` shape.
    pub fn transform(&self, doc: &StoredDocument) -> Value {
        crate::document::transform(doc)
    }

    /// Converts every document with [`ElasticProvider::transform`].
    pub fn transform_all(&self, docs: &[StoredDocument]) -> Vec<Value> {
        crate::document::transform_all(docs)
    }

    /// Indices created at initialization: the configured ones, then the
    /// default index and every static route's index not already listed.
    fn startup_indexes(&self) -> Vec<IndexConfig> {
        let mut indexes = self.config.indexes.clone();
        let mut add = |name: &str| {
            if !indexes.iter().any(|i| i.index == name) {
                indexes.push(IndexConfig::new(name));
            }
        };
        add(&self.config.default_index);
        for route in self.routes.routes().iter().filter(|r| !r.is_dynamic()) {
            add(&route.index);
        }
        indexes
    }

    /// Resolves a write path, creating the dynamic index on first use.
    pub(crate) async fn bind_for_write(
        &self,
        path: &str,
    ) -> ProviderResult<(Arc<Route>, DynamicBinding)> {
        let route = self.routes.resolve(path)?;
        let binding = DynamicBinding::derive(&route, path)?;
        if route.is_dynamic() {
            self.indexes.ensure(&binding).await?;
        }
        Ok((route, binding))
    }

    /// Resolves a read path. On a dynamic route a wildcard type segment
    /// reads every type of the named index, and a wildcard index segment
    /// reads every index its pattern matches; the path clause keeps such
    /// reads to the route's documents.
    pub(crate) async fn bind_for_read(&self, path: &str) -> ProviderResult<ReadTarget> {
        let route = self.routes.resolve(path)?;
        let binding = DynamicBinding::derive(&route, path)?;
        if !route.is_dynamic() {
            return Ok(ReadTarget::Ready {
                route,
                index: binding.index,
                doc_type: Some(binding.doc_type),
            });
        }

        let exists = if binding.concrete {
            self.indexes.exists(&binding).await?
        } else if binding.concrete_index {
            self.indexes.index_exists(&binding.index).await?
        } else {
            // patterns match nothing rather than fail; names are lowercase
            !binding.index.chars().any(|c| c.is_ascii_uppercase())
        };
        if !exists {
            tracing::debug!(path, index = %binding.index, "no index yet");
            return Ok(ReadTarget::NoIndexYet);
        }

        let doc_type = binding.concrete.then_some(binding.doc_type);
        Ok(ReadTarget::Ready {
            route,
            index: binding.index,
            doc_type,
        })
    }

    fn refresh_for(&self, options: &UpsertOptions) -> bool {
        options.refresh.unwrap_or(self.config.refresh)
    }
}

#[async_trait]
impl PathStore for ElasticProvider {
    async fn initialize(&self) -> ProviderResult<()> {
        tracing::info!(
            name = %self.config.name,
            nodes = ?self.config.nodes,
            "Initializing Elasticsearch provider"
        );

        self.engine
            .ping(Duration::from_millis(self.config.ping_timeout_ms))
            .await?;

        for index in self.startup_indexes() {
            self.indexes
                .create_index(&index.index, &index.mappings, index.settings.as_ref())
                .await?;
        }

        tracing::info!(
            routes = self.routes.routes().len(),
            dynamic_routes = self.routes.dynamic_routes().count(),
            "Elasticsearch provider initialized"
        );
        Ok(())
    }

    async fn upsert(
        &self,
        path: &str,
        payload: UpsertPayload,
        options: UpsertOptions,
    ) -> ProviderResult<UpsertOutcome> {
        self.write(path, payload, options).await
    }

    async fn find(
        &self,
        path: &str,
        parameters: FindParameters,
    ) -> ProviderResult<Vec<StoredDocument>> {
        self.search(path, parameters).await
    }

    async fn find_one(
        &self,
        criteria: Value,
        options: FindOptions,
    ) -> ProviderResult<Option<StoredDocument>> {
        self.search_one(criteria, options).await
    }

    async fn count(&self, target: CountTarget, criteria: Option<Value>) -> ProviderResult<u64> {
        self.count_documents(target, criteria).await
    }

    async fn remove(&self, path: &str) -> ProviderResult<RemoveResult> {
        self.remove_documents(path).await
    }

    async fn stop(&self) -> ProviderResult<()> {
        self.engine.close().await?;
        self.calls.close();
        self.admin.close();
        tracing::info!(name = %self.config.name, "Elasticsearch provider stopped");
        Ok(())
    }
}
