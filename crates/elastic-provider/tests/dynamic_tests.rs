//! Dynamic route integration tests.
//!
//! These tests verify that dynamic routes derive index, type and typed fields
//! from the path, create each index once, read nothing before it exists, and
//! read across types and indices for wildcard segments.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use elastic_provider::error::{IndexError, ProviderError, ValidationError};
use elastic_provider::{
    ElasticProvider, FindParameters, PathStore, ProviderConfig, RouteConfig, UpsertOptions,
    UpsertPayload,
};

use common::{MemoryEngine, create_provider, dynamic_config, paths, put};

fn scenario_config() -> ProviderConfig {
    ProviderConfig {
        data_routes: vec![
            RouteConfig::dynamic("/dynamic/{{index}}/{{type}}/*"),
            RouteConfig::new("*").with_index("happner"),
        ],
        ..Default::default()
    }
}

// ============================================================================
// Index Creation
// ============================================================================

#[tokio::test]
async fn test_dynamic_route_creates_index_once() {
    let (engine, provider) = create_provider(scenario_config()).await;

    put(&provider, "/dynamic/foo/bar/1", json!({ "v": 1 })).await;
    assert_eq!(engine.creations_of("foo"), 1);
    let stored = engine.source("foo", "/dynamic/foo/bar/1").unwrap();
    assert_eq!(stored["doc_type"], "bar");
    assert_eq!(stored["data"], json!({ "v": 1 }));

    let creates = engine.calls_of("create_index");
    put(&provider, "/dynamic/foo/bar/2", json!({ "v": 2 })).await;
    assert_eq!(engine.calls_of("create_index"), creates);
    assert!(provider.indexes().is_known("foo_bar"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolution_creates_once() {
    let (engine, provider) = create_provider(scenario_config()).await;
    engine.delay_creates(Duration::from_millis(50));
    let provider = Arc::new(provider);

    let writers: Vec<_> = (0..16)
        .map(|n| {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move {
                provider
                    .upsert(
                        &format!("/dynamic/foo/bar/{}", n),
                        UpsertPayload::new(json!({ "n": n })),
                        UpsertOptions::default(),
                    )
                    .await
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap().unwrap();
    }

    assert_eq!(engine.creations_of("foo"), 1);
    assert_eq!(engine.calls_of("create_index"), 2);
    assert_eq!(engine.peak_concurrent_creates(), 1);
    assert_eq!(engine.doc_count("foo"), 16);
}

#[tokio::test]
async fn test_second_provider_tolerates_existing_index() {
    let engine = Arc::new(MemoryEngine::new());
    for _ in 0..2 {
        let provider = ElasticProvider::new(scenario_config(), engine.clone()).unwrap();
        provider.initialize().await.unwrap();
        put(&provider, "/dynamic/foo/bar/1", json!({ "v": 1 })).await;
    }

    assert_eq!(engine.creations_of("foo"), 1);
    assert_eq!(engine.calls_of("create_index"), 4);
}

#[tokio::test]
async fn test_index_creation_failure_surfaces() {
    let (engine, provider) = create_provider(scenario_config()).await;
    engine.fail("create_index");

    let result = provider
        .upsert(
            "/dynamic/foo/bar/1",
            UpsertPayload::new(json!({})),
            UpsertOptions::default(),
        )
        .await;
    assert!(matches!(
        result,
        Err(ProviderError::Index(IndexError::CreationFailed { .. }))
    ));
    assert_eq!(engine.write_calls(), 0);
    assert!(!provider.indexes().is_known("foo_bar"));
}

#[tokio::test]
async fn test_bad_dynamic_index_name() {
    let (engine, provider) = create_provider(scenario_config()).await;

    let result = provider
        .upsert(
            "/dynamic/Upper/bar/1",
            UpsertPayload::new(json!({})),
            UpsertOptions::default(),
        )
        .await;
    assert!(matches!(
        result,
        Err(ProviderError::Index(IndexError::BadDynamicIndexName { .. }))
    ));
    assert_eq!(engine.creations_of("Upper"), 0);
}

// ============================================================================
// Typed Fields
// ============================================================================

#[tokio::test]
async fn test_typed_fields_are_mapped_and_stored() {
    let (engine, provider) = create_provider(dynamic_config()).await;

    let stored = put(
        &provider,
        "/device/sensors/temp/42/3.5/{id}",
        json!({ "unit": "C" }),
    )
    .await;
    assert_eq!(stored.index, "sensors");
    assert_eq!(stored.doc_type, "temp");

    let body = engine.creation_body("sensors").unwrap();
    let properties = &body["mappings"]["properties"];
    assert_eq!(properties["serial"], json!({ "type": "long" }));
    assert_eq!(properties["reading"], json!({ "type": "double" }));
    assert_eq!(properties["path"], json!({ "type": "keyword" }));

    let source = engine.source("sensors", &stored.path).unwrap();
    assert_eq!(source["serial"].as_f64(), Some(42.0));
    assert_eq!(source["reading"].as_f64(), Some(3.5));

    let found = provider
        .find(
            "/device/sensors/temp/*",
            FindParameters::with_criteria(json!({ "_meta.serial": 42 })),
        )
        .await
        .unwrap();
    assert_eq!(paths(&found), vec![stored.path.clone()]);
}

#[tokio::test]
async fn test_invalid_typed_value_is_rejected() {
    let (engine, provider) = create_provider(dynamic_config()).await;

    let result = provider
        .upsert(
            "/device/sensors/temp/not-a-number/3.5/{id}",
            UpsertPayload::new(json!({})),
            UpsertOptions::default(),
        )
        .await;
    assert!(matches!(
        result,
        Err(ProviderError::Validation(ValidationError::InvalidFieldValue { .. }))
    ));
    assert_eq!(engine.creations_of("sensors"), 0);
}

// ============================================================================
// Reads Before the Index Exists
// ============================================================================

#[tokio::test]
async fn test_reads_before_index_exists() {
    let (engine, provider) = create_provider(scenario_config()).await;

    let found = provider
        .find("/dynamic/nothing/here/*", FindParameters::default())
        .await
        .unwrap();
    assert!(found.is_empty());
    assert_eq!(
        provider
            .count("/dynamic/nothing/here/*".into(), None)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        provider
            .remove("/dynamic/nothing/here/*")
            .await
            .unwrap()
            .removed(),
        0
    );

    assert_eq!(engine.calls_of("search"), 0);
    assert_eq!(engine.calls_of("count"), 0);
    assert_eq!(engine.creations_of("nothing"), 0);
}

#[tokio::test]
async fn test_wildcard_type_on_missing_index_reads_nothing() {
    let (engine, provider) = create_provider(scenario_config()).await;

    let found = provider
        .find("/dynamic/nothing/*", FindParameters::default())
        .await
        .unwrap();
    assert!(found.is_empty());
    assert_eq!(engine.calls_of("search"), 0);
    assert_eq!(engine.creations_of("nothing"), 0);
}

// ============================================================================
// Wildcard Segments
// ============================================================================

async fn spread_provider() -> (Arc<MemoryEngine>, ElasticProvider) {
    let (engine, provider) = create_provider(scenario_config()).await;
    put(&provider, "/dynamic/foo/bar/1", json!({ "v": 1 })).await;
    put(&provider, "/dynamic/foo/baz/1", json!({ "v": 2 })).await;
    put(&provider, "/dynamic/other/bar/1", json!({ "v": 3 })).await;
    put(&provider, "/elsewhere/1", json!({ "v": 4 })).await;
    (engine, provider)
}

#[tokio::test]
async fn test_wildcard_type_segment_reads_every_type() {
    let (_engine, provider) = spread_provider().await;

    let found = provider
        .find("/dynamic/foo/*", FindParameters::default())
        .await
        .unwrap();
    assert_eq!(paths(&found), vec!["/dynamic/foo/bar/1", "/dynamic/foo/baz/1"]);
    let types: Vec<&str> = found.iter().map(|d| d.doc_type.as_str()).collect();
    assert!(types.contains(&"bar") && types.contains(&"baz"));

    let count = provider
        .count("/dynamic/foo/*".into(), None)
        .await
        .unwrap();
    assert_eq!(count, 2);

    let filtered = provider
        .find(
            "/dynamic/foo/*",
            FindParameters::with_criteria(json!({ "v": 2 })),
        )
        .await
        .unwrap();
    assert_eq!(paths(&filtered), vec!["/dynamic/foo/baz/1"]);
}

#[tokio::test]
async fn test_wildcard_index_segment_reads_every_index() {
    let (_engine, provider) = spread_provider().await;

    let found = provider
        .find("/dynamic/*", FindParameters::default())
        .await
        .unwrap();
    assert_eq!(
        paths(&found),
        vec![
            "/dynamic/foo/bar/1",
            "/dynamic/foo/baz/1",
            "/dynamic/other/bar/1"
        ]
    );
    let other = found
        .iter()
        .find(|d| d.path == "/dynamic/other/bar/1")
        .unwrap();
    assert_eq!(other.index, "other");

    let count = provider.count("/dynamic/*".into(), None).await.unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_partial_index_segment_reads_matching_indices() {
    let (_engine, provider) = spread_provider().await;

    let found = provider
        .find("/dynamic/fo*", FindParameters::default())
        .await
        .unwrap();
    assert_eq!(paths(&found), vec!["/dynamic/foo/bar/1", "/dynamic/foo/baz/1"]);

    let none = provider
        .find("/dynamic/zz*", FindParameters::default())
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_wildcard_remove_spans_types_and_indices() {
    let (engine, provider) = spread_provider().await;

    let result = provider.remove("/dynamic/foo/*").await.unwrap();
    assert_eq!(result.removed(), 2);
    assert_eq!(engine.doc_count("foo"), 0);
    assert_eq!(engine.doc_count("other"), 1);

    let result = provider.remove("/dynamic/*").await.unwrap();
    assert_eq!(result.removed(), 1);
    let left = provider
        .find("/dynamic/*", FindParameters::default())
        .await
        .unwrap();
    assert!(left.is_empty());
    assert!(engine.source("happner", "/elsewhere/1").is_some());
}

#[tokio::test]
async fn test_reads_after_restart_find_existing_index() {
    let engine = Arc::new(MemoryEngine::new());
    let writer = ElasticProvider::new(scenario_config(), engine.clone()).unwrap();
    writer.initialize().await.unwrap();
    put(&writer, "/dynamic/foo/bar/1", json!({ "v": 1 })).await;

    let reader = ElasticProvider::new(scenario_config(), engine.clone()).unwrap();
    reader.initialize().await.unwrap();
    let found = reader
        .find("/dynamic/foo/bar/*", FindParameters::default())
        .await
        .unwrap();

    assert_eq!(paths(&found), vec!["/dynamic/foo/bar/1"]);
    assert_eq!(engine.calls_of("index_exists"), 1);
    assert!(reader.indexes().is_known("foo_bar"));
}

#[tokio::test]
async fn test_dynamic_types_share_an_index() {
    let (engine, provider) = create_provider(scenario_config()).await;
    put(&provider, "/dynamic/foo/bar/1", json!({ "v": 1 })).await;
    put(&provider, "/dynamic/foo/baz/1", json!({ "v": 2 })).await;

    assert_eq!(engine.creations_of("foo"), 1);
    assert_eq!(provider.indexes().known_pairs(), 2);

    let bar = provider
        .find("/dynamic/foo/bar/*", FindParameters::default())
        .await
        .unwrap();
    assert_eq!(paths(&bar), vec!["/dynamic/foo/bar/1"]);
}
