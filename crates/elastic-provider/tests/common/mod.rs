//! Test infrastructure for the provider.
//!
//! Integration tests run the provider against [`MemoryEngine`], an in-memory
//! engine that evaluates the emitted Query DSL.

#![allow(dead_code)]

pub mod memory_engine;

use std::sync::Arc;

use serde_json::Value;

use elastic_provider::{
    ElasticProvider, PathStore, ProviderConfig, RouteConfig, StoredDocument, UpsertOptions,
    UpsertPayload,
};

pub use memory_engine::MemoryEngine;

/// Static routes used by most tests.
pub fn static_config() -> ProviderConfig {
    ProviderConfig {
        data_routes: vec![
            RouteConfig::new("/history/*")
                .with_index("history")
                .with_type("event"),
            RouteConfig::new("/history2/*").with_index("history2"),
            RouteConfig::new("*").with_index("happner"),
        ],
        ..Default::default()
    }
}

/// A single dynamic route with typed fields.
pub fn dynamic_config() -> ProviderConfig {
    ProviderConfig {
        data_routes: vec![
            RouteConfig::dynamic(
                "/device/{{index}}/{{type}}/{{serial:long}}/{{reading:double}}/{id}",
            ),
            RouteConfig::new("*").with_index("happner"),
        ],
        ..Default::default()
    }
}

/// A provider over a fresh memory engine, initialized.
pub async fn create_provider(config: ProviderConfig) -> (Arc<MemoryEngine>, ElasticProvider) {
    let engine = Arc::new(MemoryEngine::new());
    let provider =
        ElasticProvider::new(config, engine.clone()).expect("Failed to create provider");
    provider
        .initialize()
        .await
        .expect("Failed to initialize provider");
    (engine, provider)
}

/// Upserts `data` at `path` with default options.
pub async fn put(store: &dyn PathStore, path: &str, data: Value) -> StoredDocument {
    store
        .upsert(path, UpsertPayload::new(data), UpsertOptions::default())
        .await
        .expect("upsert failed")
        .document()
        .expect("expected a document write")
        .stored
        .clone()
}

/// Sorted paths of a result set.
pub fn paths(documents: &[StoredDocument]) -> Vec<String> {
    let mut paths: Vec<String> = documents.iter().map(|d| d.path.clone()).collect();
    paths.sort();
    paths
}
