//! The path-store interface and its call types.
//!
//! [`PathStore`] is what the surrounding framework calls. It is implemented
//! by [`ElasticProvider`](crate::ElasticProvider) and by the read-through
//! [`CachedStore`](crate::cache::CachedStore) decorator.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::criteria::engine_field;
use crate::document::{RemoveResult, StoredDocument, UpsertOutcome};
use crate::error::{ProviderResult, ValidationError};

/// How an upsert writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertType {
    /// Update the document, creating it when missing.
    #[default]
    Upsert,
    /// Same write as [`UpsertType::Upsert`].
    Update,
    /// Create only; fails if the path already exists.
    Insert,
    /// Write an array of items in one batch.
    Bulk,
}

/// Data written by an upsert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertPayload {
    /// The document payload. For bulk writes: an array of `{path?, data}`
    /// items, or an object whose `value` holds that array.
    pub data: Value,
    /// Tag payload, stored as `_tag`.
    #[serde(rename = "_tag", default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Value>,
}

impl UpsertPayload {
    /// Creates a payload.
    pub fn new(data: Value) -> Self {
        Self { data, tag: None }
    }

    /// Attaches a tag.
    pub fn with_tag(mut self, tag: Value) -> Self {
        self.tag = Some(tag);
        self
    }
}

/// Options of an upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertOptions {
    /// Write kind.
    pub upsert_type: UpsertType,
    /// Refresh after the write; the provider default applies when unset.
    pub refresh: Option<bool>,
    /// User recorded as `modifiedBy` (and `createdBy` on creation).
    pub modified_by: Option<String>,
    /// Conflict retries; the configured policy applies when unset.
    pub retries: Option<u32>,
}

impl UpsertOptions {
    /// Options for a write kind.
    pub fn of(upsert_type: UpsertType) -> Self {
        Self {
            upsert_type,
            ..Default::default()
        }
    }

    /// Sets the modifying user.
    pub fn modified_by(mut self, user: impl Into<String>) -> Self {
        self.modified_by = Some(user.into());
        self
    }

    /// Sets the refresh flag.
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = Some(refresh);
        self
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// Query DSL name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    /// Stored field name.
    pub field: String,
    /// Direction.
    pub order: SortOrder,
}

/// Projection, paging and sorting of a find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Fields to return besides the envelope; empty returns everything.
    pub fields: Vec<String>,
    /// Maximum number of documents (default 10000).
    pub limit: Option<usize>,
    /// Documents to skip (default 0).
    pub offset: Option<usize>,
    /// Sort keys, in priority order.
    pub sort: Vec<SortField>,
}

impl FindOptions {
    /// True when the options return the one document at an exact path as
    /// stored: no projection, no sort, and paging that keeps the first hit.
    pub fn keeps_exact_match(&self) -> bool {
        self.fields.is_empty()
            && self.sort.is_empty()
            && self.offset.unwrap_or(0) == 0
            && self.limit != Some(0)
    }

    /// Reads options in the framework's shape:
    /// `{fields: {name: 1} | [name], limit, offSet, sort: {name: 1 | -1}}`.
    ///
    /// Field names are renamed like criteria fields.
    pub fn from_value(options: &Value) -> Result<Self, ValidationError> {
        let Value::Object(map) = options else {
            return Err(ValidationError::InvalidPayload {
                message: "find options must be an object".to_string(),
            });
        };

        let fields = match map.get("fields") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(fields)) => fields
                .iter()
                .filter(|(_, include)| is_truthy(include))
                .map(|(name, _)| engine_field(name))
                .collect(),
            Some(Value::Array(fields)) => fields
                .iter()
                .filter_map(Value::as_str)
                .map(engine_field)
                .collect(),
            Some(_) => {
                return Err(ValidationError::InvalidPayload {
                    message: "fields must be an object or an array".to_string(),
                });
            }
        };

        let sort = match map.get("sort") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(sort)) => sort
                .iter()
                .map(|(name, direction)| SortField {
                    field: engine_field(name),
                    order: if direction.as_i64() == Some(-1) {
                        SortOrder::Desc
                    } else {
                        SortOrder::Asc
                    },
                })
                .collect(),
            Some(_) => {
                return Err(ValidationError::InvalidPayload {
                    message: "sort must be an object".to_string(),
                });
            }
        };

        let number = |key: &str| {
            map.get(key)
                .and_then(Value::as_u64)
                .and_then(|n| usize::try_from(n).ok())
        };

        Ok(Self {
            fields,
            limit: number("limit"),
            offset: number("offSet").or_else(|| number("offset")),
            sort,
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Null => false,
        _ => true,
    }
}

/// Criteria and options of a find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindParameters {
    /// Criteria tree, ANDed with the path.
    pub criteria: Option<Value>,
    /// Projection, paging and sorting.
    pub options: FindOptions,
}

impl FindParameters {
    /// Parameters with criteria and default options.
    pub fn with_criteria(criteria: Value) -> Self {
        Self {
            criteria: Some(criteria),
            options: FindOptions::default(),
        }
    }
}

/// A raw count against an index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountMessage {
    /// Target index.
    pub index: String,
    /// Restricts the count to a type.
    pub doc_type: Option<String>,
    /// Counts the document with this path.
    pub id: Option<String>,
    /// Raw search body whose `query` is counted.
    pub body: Option<Value>,
}

/// What to count.
#[derive(Debug, Clone, PartialEq)]
pub enum CountTarget {
    /// Documents at a (possibly wildcard) path.
    Path(String),
    /// A raw count message.
    Message(CountMessage),
}

impl From<&str> for CountTarget {
    fn from(path: &str) -> Self {
        CountTarget::Path(path.to_string())
    }
}

/// A path-keyed document store.
#[async_trait]
pub trait PathStore: Send + Sync {
    /// Connects and prepares the store.
    async fn initialize(&self) -> ProviderResult<()>;

    /// Writes a document (or a batch of documents) at `path`.
    async fn upsert(
        &self,
        path: &str,
        payload: UpsertPayload,
        options: UpsertOptions,
    ) -> ProviderResult<UpsertOutcome>;

    /// Finds documents at a (possibly wildcard) path.
    async fn find(
        &self,
        path: &str,
        parameters: FindParameters,
    ) -> ProviderResult<Vec<StoredDocument>>;

    /// Finds the first document matching `criteria`, whose `path` key (default
    /// `*`) selects the search path.
    async fn find_one(
        &self,
        criteria: Value,
        options: FindOptions,
    ) -> ProviderResult<Option<StoredDocument>>;

    /// Counts documents.
    async fn count(&self, target: CountTarget, criteria: Option<Value>) -> ProviderResult<u64>;

    /// Removes the documents at a (possibly wildcard) path.
    async fn remove(&self, path: &str) -> ProviderResult<RemoveResult>;

    /// Releases the engine client.
    async fn stop(&self) -> ProviderResult<()>;

    /// Compaction is handled by the engine; accepted and ignored.
    async fn start_compacting(&self, _interval: Duration) -> ProviderResult<()> {
        Ok(())
    }

    /// Compaction is handled by the engine; accepted and ignored.
    async fn stop_compacting(&self) -> ProviderResult<()> {
        Ok(())
    }

    /// Compaction is handled by the engine; accepted and ignored.
    async fn compact(&self) -> ProviderResult<()> {
        Ok(())
    }
}
