//! In-memory [`SearchEngine`] that evaluates the Query DSL the provider emits.
//!
//! Documents live in per-index ordered maps. Every call is recorded by kind
//! so tests can assert what reached the engine, and individual call kinds can
//! be made to fail.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value, json};

use elastic_provider::engine::{
    BulkRequest, CountRequest, CreateIndexRequest, DeleteByQueryRequest, DeleteRequest,
    IndexRequest, SearchEngine, SearchRequest, UpdateRequest,
};
use elastic_provider::error::{EngineError, EngineResult};

#[derive(Debug, Clone)]
struct StoredDoc {
    source: Value,
    version: i64,
}

#[derive(Debug, Default)]
struct State {
    indices: HashMap<String, BTreeMap<String, StoredDoc>>,
    created: Vec<String>,
    bodies: HashMap<String, Value>,
    calls: Vec<&'static str>,
}

/// Search engine double backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<State>,
    failing: Mutex<HashSet<&'static str>>,
    rejected_paths: Mutex<HashSet<String>>,
    create_delay: Mutex<Duration>,
    in_flight_creates: AtomicUsize,
    peak_creates: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryEngine {
    /// An empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call of `kind` fail with a 500.
    pub fn fail(&self, kind: &'static str) {
        self.failing.lock().insert(kind);
    }

    /// Makes bulk items with this id fail.
    pub fn reject_in_bulk(&self, path: &str) {
        self.rejected_paths.lock().insert(path.to_string());
    }

    /// Delays every index creation.
    pub fn delay_creates(&self, delay: Duration) {
        *self.create_delay.lock() = delay;
    }

    /// Indices created through `create_index`, in order.
    pub fn created_indices(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }

    /// Number of successful `create_index` calls for `index`.
    pub fn creations_of(&self, index: &str) -> usize {
        self.state
            .lock()
            .created
            .iter()
            .filter(|i| *i == index)
            .count()
    }

    /// Highest number of overlapping `create_index` calls seen.
    pub fn peak_concurrent_creates(&self) -> usize {
        self.peak_creates.load(AtomicOrdering::SeqCst)
    }

    /// Creation body of an index.
    pub fn creation_body(&self, index: &str) -> Option<Value> {
        self.state.lock().bodies.get(index).cloned()
    }

    /// Stored source of a document.
    pub fn source(&self, index: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .map(|d| d.source.clone())
    }

    /// Number of documents in an index.
    pub fn doc_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .indices
            .get(index)
            .map_or(0, BTreeMap::len)
    }

    /// Kinds of every call received, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    /// Number of calls of `kind` received.
    pub fn calls_of(&self, kind: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|k| **k == kind)
            .count()
    }

    /// Number of document writes received.
    pub fn write_calls(&self) -> usize {
        ["index", "update", "bulk", "delete", "delete_by_query"]
            .iter()
            .map(|kind| self.calls_of(kind))
            .sum()
    }

    fn begin(&self, kind: &'static str) -> EngineResult<()> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return Err(EngineError::Closed);
        }
        self.state.lock().calls.push(kind);
        if self.failing.lock().contains(kind) {
            return Err(EngineError::Status {
                status: 500,
                body: format!("injected {} failure", kind),
            });
        }
        Ok(())
    }
}

fn index_not_found(index: &str) -> EngineError {
    EngineError::Status {
        status: 404,
        body: format!(
            "{{\"error\":{{\"type\":\"index_not_found_exception\",\"index\":\"{}\"}}}}",
            index
        ),
    }
}

#[async_trait]
impl SearchEngine for MemoryEngine {
    async fn ping(&self, _timeout: Duration) -> EngineResult<()> {
        self.begin("ping")
    }

    async fn index(&self, request: IndexRequest) -> EngineResult<Value> {
        self.begin("index")?;
        let mut state = self.state.lock();
        let docs = state.indices.entry(request.index.clone()).or_default();
        if request.create_only && docs.contains_key(&request.id) {
            return Err(EngineError::Status {
                status: 409,
                body: format!(
                    "{{\"error\":{{\"type\":\"version_conflict_engine_exception\",\"reason\":\"[{}]: document already exists\"}}}}",
                    request.id
                ),
            });
        }

        let version = docs.get(&request.id).map_or(1, |d| d.version + 1);
        let result = if version == 1 { "created" } else { "updated" };
        docs.insert(
            request.id.clone(),
            StoredDoc {
                source: request.body,
                version,
            },
        );
        Ok(json!({
            "_index": request.index,
            "_id": request.id,
            "_version": version,
            "result": result
        }))
    }

    async fn update(&self, request: UpdateRequest) -> EngineResult<Value> {
        self.begin("update")?;
        let mut state = self.state.lock();
        let docs = state.indices.entry(request.index.clone()).or_default();

        let (source, version, result) = match docs.get(&request.id) {
            Some(existing) => {
                let mut source = existing.source.clone();
                merge(&mut source, &request.body["doc"]);
                (source, existing.version + 1, "updated")
            }
            None => (request.body["upsert"].clone(), 1, "created"),
        };
        docs.insert(
            request.id.clone(),
            StoredDoc {
                source: source.clone(),
                version,
            },
        );

        Ok(json!({
            "_index": request.index,
            "_id": request.id,
            "_version": version,
            "result": result,
            "get": { "found": true, "_source": source }
        }))
    }

    async fn bulk(&self, request: BulkRequest) -> EngineResult<Value> {
        self.begin("bulk")?;
        let rejected = self.rejected_paths.lock().clone();
        let mut state = self.state.lock();
        let mut items = Vec::new();
        let mut errors = false;

        for pair in request.operations.chunks(2) {
            let action = &pair[0]["index"];
            let index = action["_index"].as_str().unwrap_or_default().to_string();
            let id = action["_id"].as_str().unwrap_or_default().to_string();

            if rejected.contains(&id) {
                errors = true;
                items.push(json!({ "index": {
                    "_index": index,
                    "_id": id,
                    "status": 400,
                    "error": { "type": "mapper_parsing_exception", "reason": "rejected" }
                }}));
                continue;
            }

            let docs = state.indices.entry(index.clone()).or_default();
            let version = docs.get(&id).map_or(1, |d| d.version + 1);
            docs.insert(
                id.clone(),
                StoredDoc {
                    source: pair.get(1).cloned().unwrap_or(Value::Null),
                    version,
                },
            );
            let (result, status) = if version == 1 {
                ("created", 201)
            } else {
                ("updated", 200)
            };
            items.push(json!({ "index": {
                "_index": index,
                "_id": id,
                "_version": version,
                "result": result,
                "status": status
            }}));
        }

        Ok(json!({ "took": 1, "errors": errors, "items": items }))
    }

    async fn delete(&self, request: DeleteRequest) -> EngineResult<Value> {
        self.begin("delete")?;
        let mut state = self.state.lock();
        let removed = state
            .indices
            .get_mut(&request.index)
            .and_then(|docs| docs.remove(&request.id));
        match removed {
            Some(_) => Ok(json!({ "_index": request.index, "_id": request.id, "result": "deleted" })),
            None => Err(EngineError::Status {
                status: 404,
                body: "{\"result\":\"not_found\"}".to_string(),
            }),
        }
    }

    async fn delete_by_query(&self, request: DeleteByQueryRequest) -> EngineResult<Value> {
        self.begin("delete_by_query")?;
        let mut state = self.state.lock();
        let targets = resolve_indices(&state, &request.index)?;

        let mut deleted = 0;
        for index in targets {
            let Some(docs) = state.indices.get_mut(&index) else {
                continue;
            };
            let mut doomed = Vec::new();
            for (id, doc) in docs.iter() {
                if matches(&request.query, &doc.source)? {
                    doomed.push(id.clone());
                }
            }
            for id in &doomed {
                docs.remove(id);
            }
            deleted += doomed.len();
        }
        Ok(json!({ "deleted": deleted, "failures": [] }))
    }

    async fn search(&self, request: SearchRequest) -> EngineResult<Value> {
        self.begin("search")?;
        let state = self.state.lock();
        let targets = resolve_indices(&state, &request.index)?;

        let query = request.body.get("query").cloned().unwrap_or(json!({ "match_all": {} }));
        let mut hits = Vec::new();
        for index in &targets {
            for (id, doc) in state.indices.get(index).into_iter().flatten() {
                if matches(&query, &doc.source)? {
                    hits.push((index, id, doc));
                }
            }
        }

        if let Some(Value::Array(sort)) = request.body.get("sort") {
            hits.sort_by(|a, b| compare_by(sort, &a.2.source, &b.2.source));
        }

        let total = hits.len();
        let from = request.body["from"].as_u64().unwrap_or(0) as usize;
        let size = request.body["size"].as_u64().unwrap_or(10) as usize;
        let includes = request.body.get("_source").and_then(Value::as_array);

        let hits: Vec<Value> = hits
            .into_iter()
            .skip(from)
            .take(size)
            .map(|(index, id, doc)| {
                let source = match includes {
                    Some(fields) => project(&doc.source, fields),
                    None => doc.source.clone(),
                };
                json!({
                    "_index": index,
                    "_id": id,
                    "_score": 1.0,
                    "_version": doc.version,
                    "_source": source
                })
            })
            .collect();

        Ok(json!({ "hits": { "total": { "value": total }, "hits": hits } }))
    }

    async fn count(&self, request: CountRequest) -> EngineResult<Value> {
        self.begin("count")?;
        let state = self.state.lock();
        let targets = resolve_indices(&state, &request.index)?;

        let query = request.query.unwrap_or(json!({ "match_all": {} }));
        let mut count = 0;
        for index in &targets {
            for doc in state.indices.get(index).into_iter().flat_map(BTreeMap::values) {
                if matches(&query, &doc.source)? {
                    count += 1;
                }
            }
        }
        Ok(json!({ "count": count }))
    }

    async fn create_index(&self, request: CreateIndexRequest) -> EngineResult<Value> {
        self.begin("create_index")?;

        let overlapping = self.in_flight_creates.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.peak_creates.fetch_max(overlapping, AtomicOrdering::SeqCst);
        let delay = *self.create_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight_creates.fetch_sub(1, AtomicOrdering::SeqCst);

        let mut state = self.state.lock();
        if state.indices.contains_key(&request.index) {
            return Err(EngineError::AlreadyExists {
                index: request.index,
            });
        }
        state.indices.entry(request.index.clone()).or_default();
        state.created.push(request.index.clone());
        state.bodies.insert(request.index.clone(), request.body);
        Ok(json!({ "acknowledged": true, "index": request.index }))
    }

    async fn index_exists(&self, index: &str) -> EngineResult<bool> {
        self.begin("index_exists")?;
        Ok(self.state.lock().indices.contains_key(index))
    }

    async fn close(&self) -> EngineResult<()> {
        self.closed.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }
}

/// Names of the indices an index expression addresses: a comma-separated
/// list of names and `*` patterns. A missing concrete name is an error; a
/// pattern matching nothing is not.
fn resolve_indices(state: &State, expression: &str) -> EngineResult<Vec<String>> {
    let mut names = Vec::new();
    for part in expression.split(',') {
        if part.contains('*') {
            let pattern = format!("^{}$", regex::escape(part).replace(r"\*", ".*"));
            let Ok(pattern) = Regex::new(&pattern) else {
                return Err(index_not_found(part));
            };
            let mut matched: Vec<String> = state
                .indices
                .keys()
                .filter(|name| pattern.is_match(name))
                .cloned()
                .collect();
            matched.sort();
            names.extend(matched);
        } else if state.indices.contains_key(part) {
            names.push(part.to_string());
        } else {
            return Err(index_not_found(part));
        }
    }
    names.dedup();
    Ok(names)
}

/// Recursive object merge, as the engine applies a partial `doc`.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(key).is_some_and(Value::is_object);
                match target.get_mut(key) {
                    Some(existing) if nested => merge(existing, value),
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Values stored under a dotted field. Arrays are flattened at every level,
/// and nulls count as missing.
fn values_at<'a>(source: &'a Value, field: &str) -> Vec<&'a Value> {
    fn collect<'a>(value: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
        match value {
            Value::Array(items) => {
                for item in items {
                    collect(item, parts, out);
                }
            }
            Value::Null => {}
            _ if parts.is_empty() => out.push(value),
            Value::Object(map) => {
                if let Some(child) = map.get(parts[0]) {
                    collect(child, &parts[1..], out);
                }
            }
            _ => {}
        }
    }

    let parts: Vec<&str> = field.split('.').collect();
    let mut out = Vec::new();
    collect(source, &parts, &mut out);
    out
}

/// Splits off a `.keyword` sub-field, which only holds strings.
fn keyword(field: &str) -> (&str, bool) {
    match field.strip_suffix(".keyword") {
        Some(base) => (base, true),
        None => (field, false),
    }
}

fn scalar_eq(stored: &Value, wanted: &Value, keyword_only: bool) -> bool {
    match (stored, wanted) {
        (Value::String(a), Value::String(b)) => a == b,
        _ if keyword_only => false,
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

fn scalar_cmp(stored: &Value, wanted: &Value, keyword_only: bool) -> Option<Ordering> {
    match (stored, wanted) {
        (Value::String(a), Value::String(b)) if keyword_only => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) if !keyword_only => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        _ => None,
    }
}

/// Converts an engine regexp into an anchored `regex` pattern. Escaped
/// characters are literal; `.` and `*` keep their meaning.
fn engine_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str(&regex::escape(&chars.next()?.to_string())),
            '.' | '*' => out.push(c),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

fn bad_query(query: &Value) -> EngineError {
    EngineError::Status {
        status: 400,
        body: format!("unsupported query: {}", query),
    }
}

fn single_entry(value: &Value) -> Option<(&String, &Value)> {
    value.as_object().filter(|m| m.len() == 1)?.iter().next()
}

/// Evaluates a Query DSL clause against a stored source.
pub fn matches(query: &Value, source: &Value) -> EngineResult<bool> {
    let (kind, body) = single_entry(query).ok_or_else(|| bad_query(query))?;
    match kind.as_str() {
        "match_all" => Ok(true),
        "bool" => {
            let clauses = |name: &str| -> Vec<Value> {
                match body.get(name) {
                    Some(Value::Array(items)) => items.clone(),
                    Some(other) => vec![other.clone()],
                    None => Vec::new(),
                }
            };
            let required: Vec<Value> = clauses("filter").into_iter().chain(clauses("must")).collect();
            for clause in &required {
                if !matches(clause, source)? {
                    return Ok(false);
                }
            }
            for clause in clauses("must_not") {
                if matches(&clause, source)? {
                    return Ok(false);
                }
            }
            let should = clauses("should");
            let minimum = body
                .get("minimum_should_match")
                .and_then(Value::as_u64)
                .unwrap_or(if required.is_empty() && !should.is_empty() { 1 } else { 0 });
            let mut matched = 0;
            for clause in &should {
                if matches(clause, source)? {
                    matched += 1;
                }
            }
            Ok(matched >= minimum)
        }
        "term" => {
            let (field, wanted) = single_entry(body).ok_or_else(|| bad_query(query))?;
            let wanted = wanted.get("value").unwrap_or(wanted);
            let (field, keyword_only) = keyword(field);
            Ok(values_at(source, field)
                .iter()
                .any(|v| scalar_eq(v, wanted, keyword_only)))
        }
        "terms" => {
            let (field, wanted) = single_entry(body).ok_or_else(|| bad_query(query))?;
            let wanted = wanted.as_array().ok_or_else(|| bad_query(query))?;
            let (field, keyword_only) = keyword(field);
            Ok(values_at(source, field)
                .iter()
                .any(|v| wanted.iter().any(|w| scalar_eq(v, w, keyword_only))))
        }
        "range" => {
            let (field, bounds) = single_entry(body).ok_or_else(|| bad_query(query))?;
            let bounds = bounds.as_object().ok_or_else(|| bad_query(query))?;
            let (field, keyword_only) = keyword(field);
            Ok(values_at(source, field).iter().any(|v| {
                bounds.iter().all(|(op, bound)| {
                    match (op.as_str(), scalar_cmp(v, bound, keyword_only)) {
                        ("gt", Some(o)) => o == Ordering::Greater,
                        ("gte", Some(o)) => o != Ordering::Less,
                        ("lt", Some(o)) => o == Ordering::Less,
                        ("lte", Some(o)) => o != Ordering::Greater,
                        _ => false,
                    }
                })
            }))
        }
        "exists" => {
            let field = body["field"].as_str().ok_or_else(|| bad_query(query))?;
            let (field, keyword_only) = keyword(field);
            Ok(values_at(source, field)
                .iter()
                .any(|v| !keyword_only || v.is_string()))
        }
        "regexp" => {
            let (field, spec) = single_entry(body).ok_or_else(|| bad_query(query))?;
            let pattern = spec
                .get("value")
                .and_then(Value::as_str)
                .or_else(|| spec.as_str())
                .ok_or_else(|| bad_query(query))?;
            let regex = engine_regex(pattern).ok_or_else(|| bad_query(query))?;
            let (field, _) = keyword(field);
            Ok(values_at(source, field)
                .iter()
                .any(|v| v.as_str().is_some_and(|s| regex.is_match(s))))
        }
        _ => Err(bad_query(query)),
    }
}

fn compare_by(sort: &[Value], a: &Value, b: &Value) -> Ordering {
    for key in sort {
        let Some((field, spec)) = single_entry(key) else {
            continue;
        };
        let descending = spec["order"] == "desc";
        let (field, _) = keyword(field);
        let left = values_at(a, field).first().copied();
        let right = values_at(b, field).first().copied();

        let ordering = match (left, right) {
            (None, None) => Ordering::Equal,
            // missing values sort last in both directions
            (None, Some(_)) => return Ordering::Greater,
            (Some(_), None) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let natural = scalar_cmp(l, r, false)
                    .or_else(|| scalar_cmp(l, r, true))
                    .unwrap_or(Ordering::Equal);
                if descending { natural.reverse() } else { natural }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Keeps only the included dotted fields of a source.
fn project(source: &Value, includes: &[Value]) -> Value {
    let mut projected = Map::new();
    for include in includes.iter().filter_map(Value::as_str) {
        let parts: Vec<&str> = include.split('.').collect();
        copy_path(source, &mut projected, &parts);
    }
    Value::Object(projected)
}

fn copy_path(source: &Value, target: &mut Map<String, Value>, parts: &[&str]) {
    let Some((head, rest)) = parts.split_first() else {
        return;
    };
    let Some(value) = source.get(*head) else {
        return;
    };
    if rest.is_empty() {
        target.insert(head.to_string(), value.clone());
        return;
    }
    if value.is_object() {
        let entry = target
            .entry(head.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(child) = entry {
            copy_path(value, child, rest);
        }
    }
}
