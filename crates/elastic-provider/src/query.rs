//! Engine request building.
//!
//! Pure functions turning provider calls into engine request bodies: the
//! stored envelope, update and bulk bodies, the path clause shared by find,
//! count and remove, and the search body.

use serde_json::{Map, Value, json};

use crate::criteria::{EngineQuery, translate};
use crate::error::CriteriaError;
use crate::path::{is_wildcard, wildcard_to_regex};
use crate::store::FindOptions;

/// Default page size of a find.
pub const DEFAULT_FIND_SIZE: usize = 10000;

/// Envelope fields always returned by a projected find.
pub const ENVELOPE_FIELDS: &[&str] = &[
    "path",
    "created",
    "modified",
    "timestamp",
    "createdBy",
    "modifiedBy",
    "deletedBy",
    "_tag",
    "doc_type",
];

/// What a single write stores.
#[derive(Debug, Clone, Copy)]
pub struct WriteContext<'a> {
    /// Rendered document path.
    pub path: &'a str,
    /// Document payload.
    pub data: &'a Value,
    /// Tag payload.
    pub tag: Option<&'a Value>,
    /// Logical type.
    pub doc_type: &'a str,
    /// Dynamic field values.
    pub values: &'a Map<String, Value>,
    /// Modifying user.
    pub modified_by: Option<&'a str>,
    /// Write time, epoch milliseconds.
    pub now: i64,
}

impl WriteContext<'_> {
    /// `data.timestamp` when numeric, else the write time.
    pub fn timestamp(&self) -> i64 {
        self.data
            .get("timestamp")
            .and_then(|t| t.as_i64().or_else(|| t.as_f64().map(|f| f as i64)))
            .unwrap_or(self.now)
    }

    fn base(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("modified".to_string(), json!(self.now));
        doc.insert("timestamp".to_string(), json!(self.timestamp()));
        doc.insert("path".to_string(), json!(self.path));
        doc.insert("data".to_string(), self.data.clone());
        doc.insert("doc_type".to_string(), json!(self.doc_type));
        if let Some(user) = self.modified_by {
            doc.insert("modifiedBy".to_string(), json!(user));
        }
        if let Some(tag) = self.tag {
            doc.insert("_tag".to_string(), tag.clone());
        }
        for (name, value) in self.values {
            doc.insert(name.clone(), value.clone());
        }
        doc
    }

    /// The full envelope of a newly created document.
    pub fn envelope(&self) -> Value {
        let mut doc = self.base();
        doc.insert("created".to_string(), json!(self.now));
        if let Some(user) = self.modified_by {
            doc.insert("createdBy".to_string(), json!(user));
        }
        Value::Object(doc)
    }

    /// Update body: `doc` merges into an existing document, `upsert` is
    /// stored when the document does not exist yet.
    pub fn update_body(&self) -> Value {
        json!({
            "doc": Value::Object(self.base()),
            "upsert": self.envelope()
        })
    }
}

/// Matches documents at a path: an anchored regexp for wildcard paths,
/// otherwise an exact term.
pub fn path_clause(path: &str) -> EngineQuery {
    if is_wildcard(path) {
        EngineQuery::Regexp {
            field: "path".to_string(),
            pattern: wildcard_to_regex(path),
        }
    } else {
        EngineQuery::Term {
            field: "path".to_string(),
            value: json!(path),
        }
    }
}

/// Restricts to one logical type.
pub fn type_clause(doc_type: &str) -> EngineQuery {
    EngineQuery::Term {
        field: "doc_type".to_string(),
        value: json!(doc_type),
    }
}

/// The query of a find, count or remove at a path, restricted to one
/// logical type when given.
pub fn read_query(
    path: &str,
    doc_type: Option<&str>,
    criteria: Option<&Value>,
) -> Result<EngineQuery, CriteriaError> {
    let mut clauses = vec![path_clause(path)];
    clauses.extend(doc_type.map(type_clause));
    if let Some(criteria) = criteria {
        clauses.push(translate(criteria)?);
    }
    Ok(EngineQuery::and(clauses))
}

/// A search body with paging, sorting and projection.
///
/// Sort keys address the stored field itself: numbers sort numerically and
/// strings under `data` are keywords through the index's dynamic template.
pub fn search_body(query: &EngineQuery, options: &FindOptions) -> Value {
    let mut body = json!({
        "query": query.to_json(),
        "size": options.limit.unwrap_or(DEFAULT_FIND_SIZE),
        "from": options.offset.unwrap_or(0),
    });

    if !options.sort.is_empty() {
        body["sort"] = options
            .sort
            .iter()
            .map(|s| json!({ s.field.as_str(): { "order": s.order.as_str() } }))
            .collect();
    }

    if !options.fields.is_empty() {
        let mut includes: Vec<String> = ENVELOPE_FIELDS.iter().map(|f| f.to_string()).collect();
        for field in &options.fields {
            if !includes.contains(field) {
                includes.push(field.clone());
            }
        }
        body["_source"] = json!(includes);
    }

    body
}

/// The action line of a bulk item.
pub fn bulk_action(index: &str, path: &str) -> Value {
    json!({ "index": { "_index": index, "_id": path } })
}
