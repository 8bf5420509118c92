//! Provider configuration.
//!
//! Configuration is plain serde data with defaults for every optional value,
//! so a minimal JSON document such as `{"nodes": ["http://localhost:9200"]}`
//! is a complete configuration. Field names are snake_case; the camelCase
//! names used by the surrounding framework (`defaultIndex`, `dataroutes`,
//! `elasticCallConcurrency`, ...) are accepted as aliases.
//!
//! # Example
//!
//! ```
//! use elastic_provider::config::{ProviderConfig, RouteConfig};
//!
//! let config = ProviderConfig {
//!     default_index: "archive".to_string(),
//!     data_routes: vec![RouteConfig::new("/custom/*").with_index("custom")],
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::index::validate_static_index_name;

/// Authentication configuration for Elasticsearch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ElasticsearchAuth {
    /// Basic username/password authentication.
    Basic {
        /// The username for basic auth.
        username: String,
        /// The password for basic auth.
        password: String,
    },
    /// Bearer token authentication.
    Bearer {
        /// The bearer token.
        token: String,
    },
}

/// A route from a path pattern to an index and type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Wildcard pattern, or for dynamic routes a pattern with `{{...}}`
    /// placeholder segments.
    pub pattern: String,

    /// Target index. Defaults to the provider's default index.
    #[serde(default)]
    pub index: Option<String>,

    /// Target type. Defaults to the provider's default type.
    #[serde(default, rename = "type")]
    pub doc_type: Option<String>,

    /// Whether index/type/fields are derived from path segments.
    #[serde(default)]
    pub dynamic: bool,
}

impl RouteConfig {
    /// Creates a static route for a pattern.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            index: None,
            doc_type: None,
            dynamic: false,
        }
    }

    /// Creates a dynamic route for a placeholder pattern.
    pub fn dynamic(pattern: impl Into<String>) -> Self {
        Self {
            dynamic: true,
            ..Self::new(pattern)
        }
    }

    /// Sets the target index.
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Sets the target type.
    pub fn with_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }
}

/// An index created at initialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index name.
    pub index: String,

    /// Additional mapped properties, merged under the base envelope mapping.
    /// Base properties win on conflict.
    #[serde(default)]
    pub mappings: Map<String, Value>,

    /// Extra index settings, merged over the provider's shard settings.
    #[serde(default)]
    pub settings: Option<Value>,
}

impl IndexConfig {
    /// Creates an index config with no extra mappings.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            ..Default::default()
        }
    }

    /// Adds a mapped property.
    pub fn with_property(mut self, name: impl Into<String>, mapping: Value) -> Self {
        self.mappings.insert(name.into(), mapping);
        self
    }
}

/// Read-through cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache identifier, defaults to the provider name.
    #[serde(default, alias = "cacheId")]
    pub cache_id: Option<String>,

    /// Maximum number of cached documents (default: 10000).
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Entry time-to-live in milliseconds; 0 disables expiry (default: 0).
    #[serde(default)]
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_id: None,
            capacity: default_cache_capacity(),
            ttl_ms: 0,
        }
    }
}

/// How `retry_on_conflict` is chosen for conditional updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetryOnConflict {
    /// Scale with the call concurrency: `elastic_call_concurrency + headroom`.
    Concurrency {
        /// Retries added on top of the concurrency ceiling.
        headroom: u32,
    },
    /// A fixed number of retries.
    Fixed {
        /// Number of retries.
        retries: u32,
    },
}

impl Default for RetryOnConflict {
    fn default() -> Self {
        RetryOnConflict::Concurrency { headroom: 20 }
    }
}

impl RetryOnConflict {
    /// Resolves the retry count for a concurrency ceiling.
    pub fn resolve(&self, concurrency: usize) -> u32 {
        match *self {
            RetryOnConflict::Concurrency { headroom } => {
                u32::try_from(concurrency).unwrap_or(u32::MAX).saturating_add(headroom)
            }
            RetryOnConflict::Fixed { retries } => retries,
        }
    }
}

/// Configuration for the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name, used as the default cache id.
    #[serde(default = "default_name")]
    pub name: String,

    /// Elasticsearch node URLs (e.g., `["http://localhost:9200"]`).
    /// Currently uses the first node (single-node connection pool).
    #[serde(default = "default_nodes", alias = "host")]
    pub nodes: Vec<String>,

    /// Optional authentication.
    #[serde(default)]
    pub auth: Option<ElasticsearchAuth>,

    /// Whether to disable certificate validation (default: false).
    /// Only use for development/testing.
    #[serde(default)]
    pub disable_certificate_validation: bool,

    /// Request timeout in milliseconds (default: 30000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout of the startup ping in milliseconds (default: 30000).
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// Index used by routes that do not name one (default: `"happner"`).
    #[serde(default = "default_index", alias = "defaultIndex")]
    pub default_index: String,

    /// Type used by routes that do not name one (default: `"happner"`).
    #[serde(default = "default_type", alias = "defaultType")]
    pub default_type: String,

    /// Ordered routes; first match wins.
    #[serde(default, alias = "dataroutes", alias = "dataRoutes")]
    pub data_routes: Vec<RouteConfig>,

    /// Indices created at initialization.
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,

    /// Number of primary shards per created index (default: 1).
    #[serde(default = "default_shards")]
    pub number_of_shards: u32,

    /// Number of replica shards per created index (default: 1).
    #[serde(default = "default_replicas")]
    pub number_of_replicas: u32,

    /// Optional read-through cache.
    #[serde(default)]
    pub cache: Option<CacheConfig>,

    /// Capacity of the compiled wildcard pattern memo (default: 1000).
    #[serde(default = "default_wildcard_cache", alias = "wildcardCache")]
    pub wildcard_cache: usize,

    /// Maximum concurrent engine calls (default: 100).
    #[serde(
        default = "default_elastic_call_concurrency",
        alias = "elasticCallConcurrency"
    )]
    pub elastic_call_concurrency: usize,

    /// Maximum concurrent index administration calls (default: 1).
    #[serde(default = "default_admin_call_concurrency")]
    pub admin_call_concurrency: usize,

    /// Conflict retry policy for upserts.
    #[serde(default)]
    pub retry_on_conflict: RetryOnConflict,

    /// Whether writes refresh the index by default (default: true).
    #[serde(default = "default_refresh")]
    pub refresh: bool,
}

fn default_name() -> String {
    "elastic".to_string()
}

fn default_nodes() -> Vec<String> {
    vec!["http://localhost:9200".to_string()]
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_ping_timeout_ms() -> u64 {
    30000
}

fn default_index() -> String {
    "happner".to_string()
}

fn default_type() -> String {
    "happner".to_string()
}

fn default_shards() -> u32 {
    1
}

fn default_replicas() -> u32 {
    1
}

fn default_cache_capacity() -> usize {
    10000
}

fn default_wildcard_cache() -> usize {
    1000
}

fn default_elastic_call_concurrency() -> usize {
    100
}

fn default_admin_call_concurrency() -> usize {
    1
}

fn default_refresh() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            nodes: default_nodes(),
            auth: None,
            disable_certificate_validation: false,
            request_timeout_ms: default_request_timeout_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            default_index: default_index(),
            default_type: default_type(),
            data_routes: Vec::new(),
            indexes: Vec::new(),
            number_of_shards: default_shards(),
            number_of_replicas: default_replicas(),
            cache: None,
            wildcard_cache: default_wildcard_cache(),
            elastic_call_concurrency: default_elastic_call_concurrency(),
            admin_call_concurrency: default_admin_call_concurrency(),
            retry_on_conflict: RetryOnConflict::default(),
            refresh: default_refresh(),
        }
    }
}

impl ProviderConfig {
    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Load {
            message: e.to_string(),
        })
    }

    /// Reads a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json(&raw)
    }

    /// Retry count used for conditional updates.
    pub fn conflict_retries(&self) -> u32 {
        self.retry_on_conflict.resolve(self.elastic_call_concurrency)
    }

    /// The id the cache should use, falling back to the provider name.
    pub fn cache_id(&self) -> Option<String> {
        self.cache
            .as_ref()
            .map(|c| c.cache_id.clone().unwrap_or_else(|| self.name.clone()))
    }

    /// Validates the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.nodes.iter().all(|n| n.trim().is_empty()) {
            problems.push("at least one node URL is required".to_string());
        }
        if let Err(e) = validate_static_index_name(&self.default_index) {
            problems.push(format!("default_index: {}", e));
        }
        if self.default_type.is_empty() {
            problems.push("default_type must not be empty".to_string());
        }
        if self.elastic_call_concurrency == 0 {
            problems.push("elastic_call_concurrency must be greater than 0".to_string());
        }
        if self.admin_call_concurrency == 0 {
            problems.push("admin_call_concurrency must be greater than 0".to_string());
        }
        if self.wildcard_cache == 0 {
            problems.push("wildcard_cache must be greater than 0".to_string());
        }
        if let Some(cache) = &self.cache {
            if cache.capacity == 0 {
                problems.push("cache.capacity must be greater than 0".to_string());
            }
        }
        for (position, route) in self.data_routes.iter().enumerate() {
            if route.pattern.is_empty() {
                problems.push(format!("route #{} has an empty pattern", position));
            }
            if route.pattern == "*" && position + 1 != self.data_routes.len() {
                problems.push(format!(
                    "catch-all route '*' at #{} shadows the routes after it",
                    position
                ));
            }
        }
        for index in &self.indexes {
            if let Err(e) = validate_static_index_name(&index.index) {
                problems.push(format!("indexes: {}", e));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}
