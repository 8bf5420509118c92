//! Elasticsearch path-store provider
//!
//! This crate stores JSON documents addressed by slash-delimited paths in
//! Elasticsearch. A route table decides which index and logical type a path
//! lives in; dynamic routes derive the index, the type and typed fields from
//! the path itself and create indices on first use.
//!
//! # Architecture
//!
//! - [`route`] - Route table and wildcard route matching
//! - [`index`] - Dynamic index resolution and creation
//! - [`criteria`] - Criteria tree translation into the Query DSL
//! - [`provider`] - The document operation façade
//! - [`cache`] - Read-through caching decorator
//! - [`engine`] - The search engine seam and its Elasticsearch client
//! - [`queue`] - Bounded engine call queue
//! - [`config`] - Provider configuration
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```no_run
//! use elastic_provider::{
//!     FindParameters, PathStore, ProviderConfig, RouteConfig, UpsertOptions, UpsertPayload,
//! };
//! use serde_json::json;
//!
//! # async fn run() -> elastic_provider::ProviderResult<()> {
//! let mut config = ProviderConfig::default();
//! config.data_routes = vec![
//!     RouteConfig::new("/history/*").with_index("history"),
//!     RouteConfig::dynamic("/device/{{index}}/{{type}}/{id}"),
//! ];
//!
//! let store = elastic_provider::connect(config).await?;
//! store
//!     .upsert(
//!         "/history/1",
//!         UpsertPayload::new(json!({ "event": "boot" })),
//!         UpsertOptions::default(),
//!     )
//!     .await?;
//!
//! let found = store
//!     .find("/history/*", FindParameters::with_criteria(json!({ "event": "boot" })))
//!     .await?;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Criteria
//!
//! ```
//! use elastic_provider::criteria::translate_to_json;
//! use serde_json::json;
//!
//! let query = translate_to_json(&json!({ "age": { "$gte": 21 } })).unwrap();
//! assert_eq!(query, json!({ "range": { "data.age": { "gte": 21 } } }));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod config;
pub mod criteria;
pub mod document;
pub mod engine;
pub mod error;
pub mod index;
pub mod path;
pub mod provider;
pub mod query;
pub mod queue;
pub mod route;
pub mod store;

use std::sync::Arc;

// Re-export commonly used types at crate root
pub use cache::{CachedStore, DocumentCache, LruDocumentCache};
pub use config::{CacheConfig, IndexConfig, ProviderConfig, RetryOnConflict, RouteConfig};
pub use document::{BulkWrite, DocumentWrite, Meta, RemoveResult, StoredDocument, UpsertOutcome};
pub use engine::{ElasticsearchEngine, SearchEngine};
pub use error::{ProviderError, ProviderResult};
pub use provider::ElasticProvider;
pub use store::{
    CountMessage, CountTarget, FindOptions, FindParameters, PathStore, UpsertOptions,
    UpsertPayload, UpsertType,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Connects to the configured Elasticsearch node and returns an initialized
/// store, wrapped in an [`LruDocumentCache`] when `config.cache` is set.
pub async fn connect(config: ProviderConfig) -> ProviderResult<Box<dyn PathStore>> {
    let engine = Arc::new(ElasticsearchEngine::new(&config)?);
    open(config, engine).await
}

/// Builds and initializes a store over an existing engine.
pub async fn open(
    config: ProviderConfig,
    engine: Arc<dyn SearchEngine>,
) -> ProviderResult<Box<dyn PathStore>> {
    let cache = config
        .cache
        .as_ref()
        .zip(config.cache_id())
        .map(|(settings, id)| LruDocumentCache::new(id, settings));
    let provider = ElasticProvider::new(config, engine)?;

    let store: Box<dyn PathStore> = match cache {
        Some(cache) => {
            tracing::info!(cache = cache.id(), "Document caching enabled");
            Box::new(CachedStore::new(provider, cache))
        }
        None => Box::new(provider),
    };
    store.initialize().await?;
    Ok(store)
}
