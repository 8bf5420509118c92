//! Stored document shapes and response normalization.
//!
//! Engine responses are normalized into [`StoredDocument`]s; writes report a
//! [`Meta`] summary. [`transform`] converts a stored document into the
//! `{data, _meta}` shape the surrounding framework hands to its clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A document as returned by reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Document id (the path).
    #[serde(rename = "_id")]
    pub id: String,
    /// Index holding the document.
    #[serde(rename = "_index")]
    pub index: String,
    /// Logical type of the document.
    #[serde(rename = "_type")]
    pub doc_type: String,
    /// Relevance score, present on search hits.
    #[serde(rename = "_score", default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Engine version of the document.
    #[serde(rename = "_version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Tag payload, for tag documents.
    #[serde(rename = "_tag", default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Value>,
    /// Document path.
    pub path: String,
    /// Creation time, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    /// Last modification time, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<i64>,
    /// Deletion time, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<i64>,
    /// Creating user.
    #[serde(rename = "createdBy", default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Last modifying user.
    #[serde(rename = "modifiedBy", default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,
    /// Deleting user.
    #[serde(rename = "deletedBy", default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    /// The stored payload.
    #[serde(default)]
    pub data: Value,
    /// Document timestamp, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl StoredDocument {
    /// Normalizes a stored envelope.
    ///
    /// `id`, `index` and `doc_type` fall back to the envelope's `path` and
    /// `doc_type` and to `default_index`.
    pub fn from_source(
        source: &Value,
        id: Option<&str>,
        default_index: &str,
        default_type: &str,
    ) -> Self {
        let path = string_field(source, "path").unwrap_or_default();
        Self {
            id: id.map(str::to_string).unwrap_or_else(|| path.clone()),
            index: default_index.to_string(),
            doc_type: string_field(source, "doc_type").unwrap_or_else(|| default_type.to_string()),
            score: None,
            version: None,
            tag: source.get("_tag").filter(|t| !t.is_null()).cloned(),
            path,
            created: millis_field(source, "created"),
            modified: millis_field(source, "modified"),
            deleted: millis_field(source, "deleted"),
            created_by: string_field(source, "createdBy"),
            modified_by: string_field(source, "modifiedBy"),
            deleted_by: string_field(source, "deletedBy"),
            data: source.get("data").cloned().unwrap_or(Value::Null),
            timestamp: millis_field(source, "timestamp"),
        }
    }

    /// Normalizes a search hit or a `get` result (`_id`, `_index`,
    /// `_score`, `_version`, `_source`).
    pub fn from_hit(hit: &Value, default_index: &str, default_type: &str) -> Self {
        let source = hit.get("_source").cloned().unwrap_or_else(|| json!({}));
        let index = hit
            .get("_index")
            .and_then(Value::as_str)
            .unwrap_or(default_index);
        let mut doc = Self::from_source(
            &source,
            hit.get("_id").and_then(Value::as_str),
            index,
            default_type,
        );
        doc.score = hit.get("_score").and_then(Value::as_f64);
        doc.version = hit.get("_version").and_then(Value::as_i64);
        doc
    }

    /// Write summary of this document.
    pub fn meta(&self) -> Meta {
        Meta {
            created: self.created,
            modified: self.modified,
            modified_by: self.modified_by.clone(),
            timestamp: self.timestamp,
            path: self.path.clone(),
            id: self.path.clone(),
        }
    }
}

/// Write summary returned alongside upserted documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Creation time, epoch milliseconds.
    pub created: Option<i64>,
    /// Modification time, epoch milliseconds.
    pub modified: Option<i64>,
    /// Last modifying user.
    #[serde(rename = "modifiedBy", default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,
    /// Document timestamp, epoch milliseconds.
    pub timestamp: Option<i64>,
    /// Document path.
    pub path: String,
    /// Document id (the path).
    #[serde(rename = "_id")]
    pub id: String,
}

/// Result of writing a single document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWrite {
    /// The document as stored.
    pub stored: StoredDocument,
    /// The document, when this write created it.
    pub created: Option<StoredDocument>,
    /// True for upserts and updates, false for inserts.
    pub was_upsert: bool,
    /// Write summary.
    pub meta: Meta,
}

/// Outcome of one item in a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    /// Item path.
    pub path: String,
    /// Index the item was written to.
    pub index: String,
    /// HTTP-style status the engine reported for the item.
    pub status: u16,
    /// Engine error for the item, if it failed.
    pub error: Option<Value>,
}

/// Result of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWrite {
    /// Per-item outcomes, in submission order.
    pub items: Vec<BulkItem>,
    /// True if any item failed.
    pub errors: bool,
    /// The engine response, verbatim.
    pub response: Value,
}

impl BulkWrite {
    /// Reads a bulk response.
    pub fn from_response(response: Value) -> Self {
        let errors = response
            .get("errors")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let items = response
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(bulk_item).collect())
            .unwrap_or_default();
        Self {
            items,
            errors,
            response,
        }
    }

    /// Paths of the items that failed.
    pub fn failed_paths(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|i| i.error.is_some())
            .map(|i| i.path.as_str())
            .collect()
    }
}

fn bulk_item(item: &Value) -> BulkItem {
    // each item is keyed by its action: {"index": {...}}
    let outcome = item
        .as_object()
        .and_then(|o| o.values().next())
        .cloned()
        .unwrap_or(Value::Null);
    BulkItem {
        path: outcome
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        index: outcome
            .get("_index")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        status: outcome
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(0),
        error: outcome.get("error").cloned(),
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// A single document was written.
    Document(DocumentWrite),
    /// A bulk batch was written.
    Bulk(BulkWrite),
}

impl UpsertOutcome {
    /// The written document, for single-document writes.
    pub fn document(&self) -> Option<&DocumentWrite> {
        match self {
            UpsertOutcome::Document(write) => Some(write),
            UpsertOutcome::Bulk(_) => None,
        }
    }

    /// The batch result, for bulk writes.
    pub fn bulk(&self) -> Option<&BulkWrite> {
        match self {
            UpsertOutcome::Bulk(write) => Some(write),
            UpsertOutcome::Document(_) => None,
        }
    }
}

/// Result of a remove: `{data: {removed}, _meta: {timestamp, path}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveResult {
    /// Removal counts.
    pub data: Removed,
    /// Removal summary.
    #[serde(rename = "_meta")]
    pub meta: RemoveMeta,
}

/// Number of removed documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Removed {
    /// Documents counted before the delete.
    pub removed: u64,
}

/// When and where a remove happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveMeta {
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// The removed path, as given.
    pub path: String,
}

impl RemoveResult {
    /// Builds a result for `removed` documents at `path`.
    pub fn new(path: &str, removed: u64, timestamp: i64) -> Self {
        Self {
            data: Removed { removed },
            meta: RemoveMeta {
                timestamp,
                path: path.to_string(),
            },
        }
    }

    /// Number of removed documents.
    pub fn removed(&self) -> u64 {
        self.data.removed
    }
}

/// Converts a stored document into `{data, _meta}`.
pub fn transform(doc: &StoredDocument) -> Value {
    let mut meta = Map::new();
    if let Some(created) = doc.created {
        meta.insert("created".to_string(), json!(created));
    }
    if let Some(modified) = doc.modified {
        meta.insert("modified".to_string(), json!(modified));
    }
    if let Some(ref modified_by) = doc.modified_by {
        meta.insert("modifiedBy".to_string(), json!(modified_by));
    }
    if let Some(ref created_by) = doc.created_by {
        meta.insert("createdBy".to_string(), json!(created_by));
    }
    let id = if doc.id.is_empty() { &doc.path } else { &doc.id };
    meta.insert("path".to_string(), json!(id));
    meta.insert("_id".to_string(), json!(id));
    if let Some(ref tag) = doc.tag {
        meta.insert("tag".to_string(), tag.clone());
    }

    json!({ "data": doc.data, "_meta": meta })
}

/// Converts every document with [`transform`].
pub fn transform_all(docs: &[StoredDocument]) -> Vec<Value> {
    docs.iter().map(transform).collect()
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn string_field(source: &Value, name: &str) -> Option<String> {
    source.get(name).and_then(Value::as_str).map(str::to_string)
}

fn millis_field(source: &Value, name: &str) -> Option<i64> {
    let value = source.get(name)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}
