//! Index administration and dynamic index resolution.
//!
//! Configured indices are created once at initialization. Dynamic routes
//! derive their index, type and field values from the path of each call
//! ([`DynamicBinding::derive`]); the index behind each distinct
//! `(index, type)` pair is created at most once per [`IndexRegistry`], the
//! first time a write needs it.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::sync::OnceCell;

use crate::engine::CreateIndexRequest;
use crate::error::{IndexError, ProviderResult, ValidationError};
use crate::queue::{CallQueue, EngineCall};
use crate::route::{FieldDecl, Route, TAG_PREFIX};

/// Characters refused in index names taken from a path segment.
const FORBIDDEN_INDEX_CHARS: &[char] = &['-', '+', '_', '*', '$', '@', '#', '%', '&', '!'];

/// Characters the engine refuses anywhere in an index name.
const ENGINE_INDEX_CHARS: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|', ' ', ',', '#', ':'];

/// Checks a configured index name against the engine's own naming rules.
pub fn validate_static_index_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("index name must not be empty".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("index name '{}' is reserved", name));
    }
    if name.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(format!("index name '{}' must be lowercase", name));
    }
    if name.starts_with(['-', '_', '+']) {
        return Err(format!("index name '{}' must not start with '-', '_' or '+'", name));
    }
    if let Some(c) = name.chars().find(|c| ENGINE_INDEX_CHARS.contains(c)) {
        return Err(format!("index name '{}' contains forbidden character '{}'", name, c));
    }
    Ok(())
}

/// Checks an index name derived from a path segment. Stricter than the
/// engine: punctuation a path segment may carry is refused outright.
pub fn validate_dynamic_index_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("index name must not be empty".to_string());
    }
    if name.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(format!("index name '{}' must be lowercase", name));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_INDEX_CHARS.contains(c)) {
        return Err(format!("index name '{}' contains forbidden character '{}'", name, c));
    }
    Ok(())
}

/// Mapping of the stored envelope.
pub fn base_properties() -> Map<String, Value> {
    let properties = json!({
        "path": { "type": "keyword" },
        "data": { "type": "object" },
        "created": { "type": "date" },
        "modified": { "type": "date" },
        "timestamp": { "type": "date" },
        "createdBy": { "type": "keyword" },
        "modifiedBy": { "type": "keyword" },
        "deletedBy": { "type": "keyword" },
        "doc_type": { "type": "keyword" }
    });
    match properties {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Settings applied to every created index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSettings {
    /// Number of primary shards.
    pub number_of_shards: u32,
    /// Number of replica shards.
    pub number_of_replicas: u32,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            number_of_shards: 1,
            number_of_replicas: 1,
        }
    }
}

/// Builds an index creation body.
///
/// `extra` properties are added to the envelope mapping but never replace a
/// base property; `extra_settings` is merged over the shard settings.
pub fn creation_body(
    settings: &IndexSettings,
    extra: &Map<String, Value>,
    extra_settings: Option<&Value>,
) -> Value {
    let mut properties = base_properties();
    for (name, mapping) in extra {
        properties
            .entry(name.clone())
            .or_insert_with(|| mapping.clone());
    }

    let mut index_settings = Map::new();
    index_settings.insert("number_of_shards".to_string(), json!(settings.number_of_shards));
    index_settings.insert(
        "number_of_replicas".to_string(),
        json!(settings.number_of_replicas),
    );
    if let Some(Value::Object(extra_settings)) = extra_settings {
        for (key, value) in extra_settings {
            index_settings.insert(key.clone(), value.clone());
        }
    }

    json!({
        "settings": index_settings,
        "mappings": {
            "dynamic_templates": data_templates(),
            "properties": properties
        }
    })
}

/// Strings under `data` map to sortable keywords. The `.keyword` subfield
/// that criteria address stays in place.
fn data_templates() -> Value {
    json!([{
        "data_strings": {
            "path_match": "data.*",
            "match_mapping_type": "string",
            "mapping": {
                "type": "keyword",
                "ignore_above": 8191,
                "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
            }
        }
    }])
}

/// Index pattern covering every index a wildcard index segment can name:
/// the text before the first `*` followed by `*`.
fn index_pattern(segment: Option<&str>) -> String {
    match segment.and_then(|s| s.split_once('*')) {
        Some((prefix, _)) => format!("{}*", prefix),
        None => "*".to_string(),
    }
}

/// Index, type and field values a dynamic route derives from a path.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicBinding {
    /// Index named by the path (or the route's index when the pattern has no
    /// `{{index}}` segment).
    pub index: String,
    /// Type named by the path (or the route's type).
    pub doc_type: String,
    /// Fields the route declares.
    pub fields: Vec<FieldDecl>,
    /// Coerced values of the declared fields present in the path.
    pub values: Map<String, Value>,
    /// False when the index or type segment is missing or a wildcard.
    pub concrete: bool,
    /// False when the index segment is missing or a wildcard. `index` then
    /// holds the pattern of the indices the path can reach.
    pub concrete_index: bool,
}

impl DynamicBinding {
    /// Pairs the route's placeholders with the path's segments.
    pub fn derive(route: &Route, path: &str) -> Result<Self, ValidationError> {
        let Some(layout) = route.layout.as_ref() else {
            return Ok(Self {
                index: route.index.clone(),
                doc_type: route.doc_type.clone(),
                fields: Vec::new(),
                values: Map::new(),
                concrete: true,
                concrete_index: true,
            });
        };

        // tag paths carry the routed path after the tag prefix
        let path = path
            .strip_prefix(TAG_PREFIX)
            .filter(|rest| rest.starts_with('/'))
            .unwrap_or(path);
        let segments: Vec<&str> = path.split('/').collect();
        // a wildcard may span segments, so positions after one are unknown
        let shifted = |position: usize| segments.iter().take(position).any(|s| s.contains('*'));
        let concrete_segment = |position: usize| {
            segments
                .get(position)
                .filter(|s| !shifted(position) && !s.is_empty() && !s.contains('*'))
                .copied()
        };

        let (index, concrete_index) = match layout.index_segment {
            Some(position) => match concrete_segment(position) {
                Some(index) => (index.to_string(), true),
                None => {
                    let segment = segments.get(position).copied().filter(|_| !shifted(position));
                    (index_pattern(segment), false)
                }
            },
            None => (route.index.clone(), true),
        };
        let mut concrete = concrete_index;
        let doc_type = match layout.type_segment {
            Some(position) => concrete_segment(position).map(str::to_string).unwrap_or_else(|| {
                concrete = false;
                segments.get(position).copied().unwrap_or_default().to_string()
            }),
            None => route.doc_type.clone(),
        };

        let mut fields = Vec::new();
        let mut values = Map::new();
        for (position, decl) in layout.fields() {
            if let Some(raw) = concrete_segment(position) {
                values.insert(decl.name.clone(), decl.field_type.coerce(&decl.name, raw)?);
            }
            fields.push(decl.clone());
        }

        Ok(Self {
            index,
            doc_type,
            fields,
            values,
            concrete,
            concrete_index,
        })
    }

    /// Key of this binding in the dynamic route cache.
    pub fn key(&self) -> String {
        format!("{}_{}", self.index, self.doc_type)
    }

    /// Mappings of the declared fields.
    pub fn properties(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.field_type.mapping()))
            .collect()
    }
}

/// Creates indices through the admin queue and remembers which dynamic
/// `(index, type)` pairs, and which of their indices, are known to exist.
pub struct IndexRegistry {
    admin: Arc<CallQueue>,
    settings: IndexSettings,
    entries: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
    live: Mutex<HashSet<String>>,
}

impl Debug for IndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRegistry")
            .field("settings", &self.settings)
            .field("known_pairs", &self.known_pairs())
            .finish_non_exhaustive()
    }
}

impl IndexRegistry {
    /// Creates a registry that submits admin calls to `admin`.
    pub fn new(admin: Arc<CallQueue>, settings: IndexSettings) -> Self {
        Self {
            admin,
            settings,
            entries: Mutex::new(HashMap::new()),
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Creates an index. An index that already exists counts as created.
    pub async fn create_index(
        &self,
        index: &str,
        extra: &Map<String, Value>,
        extra_settings: Option<&Value>,
    ) -> Result<(), IndexError> {
        let body = creation_body(&self.settings, extra, extra_settings);
        let result = self
            .admin
            .submit(EngineCall::CreateIndex(CreateIndexRequest {
                index: index.to_string(),
                body,
            }))
            .await;

        match result {
            Ok(_) => {
                tracing::info!(index, "Created index");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                tracing::debug!(index, "Index already exists");
                Ok(())
            }
            Err(source) => Err(IndexError::CreationFailed {
                index: index.to_string(),
                source,
            }),
        }
    }

    /// Makes sure the index behind a dynamic binding exists, creating it on
    /// first use. Concurrent callers for one pair share a single creation.
    pub async fn ensure(&self, binding: &DynamicBinding) -> ProviderResult<()> {
        if !binding.concrete {
            return Err(IndexError::BadDynamicIndexName {
                index: binding.index.clone(),
                reason: "path does not name a concrete index and type".to_string(),
            }
            .into());
        }
        validate_dynamic_index_name(&binding.index).map_err(|reason| {
            IndexError::BadDynamicIndexName {
                index: binding.index.clone(),
                reason,
            }
        })?;

        let cell = self.entry(&binding.key());
        let properties = binding.properties();
        cell.get_or_try_init(|| self.create_index(&binding.index, &properties, None))
            .await?;
        self.live.lock().insert(binding.index.clone());
        Ok(())
    }

    /// Returns true if the binding's index is memoized or reported by the
    /// engine. A binding that is not concrete never exists.
    pub async fn exists(&self, binding: &DynamicBinding) -> ProviderResult<bool> {
        if !binding.concrete || validate_dynamic_index_name(&binding.index).is_err() {
            return Ok(false);
        }
        let key = binding.key();
        if self.is_known(&key) {
            return Ok(true);
        }

        let exists = self.index_exists(&binding.index).await?;
        if exists {
            // the cell may already be set by a concurrent writer
            let _ = self.entry(&key).set(());
        }
        Ok(exists)
    }

    /// Returns true if an index is known to exist or the engine reports it,
    /// whatever types it holds.
    pub async fn index_exists(&self, index: &str) -> ProviderResult<bool> {
        if self.live.lock().contains(index) {
            return Ok(true);
        }
        if validate_dynamic_index_name(index).is_err() {
            return Ok(false);
        }

        let reply = self
            .admin
            .submit(EngineCall::IndexExists(index.to_string()))
            .await?;
        let exists = reply.as_bool().unwrap_or(false);
        if exists {
            self.live.lock().insert(index.to_string());
        }
        Ok(exists)
    }

    /// Returns true if the pair is memoized.
    pub fn is_known(&self, key: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|cell| cell.initialized())
    }

    /// Number of memoized pairs.
    pub fn known_pairs(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    fn entry(&self, key: &str) -> Arc<OnceCell<()>> {
        let mut entries = self.entries.lock();
        Arc::clone(entries.entry(key.to_string()).or_default())
    }
}
