//! Finds, counts and removes.

use serde_json::{Value, json};

use super::{ElasticProvider, ReadTarget};
use crate::criteria::{EngineQuery, translate};
use crate::document::{RemoveResult, StoredDocument, now_millis};
use crate::engine::{CountRequest, DeleteByQueryRequest, DeleteRequest, SearchRequest};
use crate::error::{EngineError, ProviderError, ProviderResult, RemoveError, ValidationError};
use crate::path::{is_wildcard, prepare_path};
use crate::query::{path_clause, read_query, search_body, type_clause};
use crate::queue::EngineCall;
use crate::store::{CountMessage, CountTarget, FindOptions, FindParameters};

impl ElasticProvider {
    pub(super) async fn search(
        &self,
        path: &str,
        parameters: FindParameters,
    ) -> ProviderResult<Vec<StoredDocument>> {
        let path = prepare_path(path);
        let ReadTarget::Ready {
            route,
            index,
            doc_type,
        } = self.bind_for_read(&path).await?
        else {
            return Ok(Vec::new());
        };

        let query = read_query(&path, doc_type.as_deref(), parameters.criteria.as_ref())?;
        let body = search_body(&query, &parameters.options);
        tracing::debug!(
            path = %path,
            route = %route.pattern,
            index = %index,
            "searching"
        );

        let response = self
            .calls
            .submit(EngineCall::Search(SearchRequest {
                index: index.clone(),
                body,
            }))
            .await?;

        let default_type = doc_type.as_deref().unwrap_or(route.doc_type.as_str());
        let documents = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .map(|hit| StoredDocument::from_hit(hit, &index, default_type))
                    .collect()
            })
            .unwrap_or_default();
        Ok(documents)
    }

    pub(super) async fn search_one(
        &self,
        criteria: Value,
        mut options: FindOptions,
    ) -> ProviderResult<Option<StoredDocument>> {
        let Value::Object(mut criteria) = criteria else {
            return Err(ValidationError::InvalidPayload {
                message: "findOne criteria must be an object".to_string(),
            }
            .into());
        };

        let path = match criteria.remove("path") {
            None | Some(Value::Null) => "*".to_string(),
            Some(Value::String(path)) => path,
            Some(other) => {
                return Err(ValidationError::InvalidPayload {
                    message: format!("findOne path must be a string, got {}", other),
                }
                .into());
            }
        };
        options.limit.get_or_insert(1);

        let parameters = FindParameters {
            criteria: (!criteria.is_empty()).then_some(Value::Object(criteria)),
            options,
        };
        Ok(self.search(&path, parameters).await?.into_iter().next())
    }

    pub(super) async fn count_documents(
        &self,
        target: CountTarget,
        criteria: Option<Value>,
    ) -> ProviderResult<u64> {
        match target {
            CountTarget::Path(path) => {
                let path = prepare_path(&path);
                let ReadTarget::Ready {
                    index, doc_type, ..
                } = self.bind_for_read(&path).await?
                else {
                    return Ok(0);
                };
                let query = read_query(&path, doc_type.as_deref(), criteria.as_ref())?;
                self.count_query(&index, Some(query.to_json())).await
            }
            CountTarget::Message(message) => {
                let query = message_query(&message, criteria.as_ref())?;
                self.count_query(&message.index, query).await
            }
        }
    }

    async fn count_query(&self, index: &str, query: Option<Value>) -> ProviderResult<u64> {
        let response = self
            .calls
            .submit(EngineCall::Count(CountRequest {
                index: index.to_string(),
                query,
            }))
            .await?;

        response
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                EngineError::Decode {
                    message: format!("count of {} returned no count", index),
                }
                .into()
            })
    }

    pub(super) async fn remove_documents(&self, path: &str) -> ProviderResult<RemoveResult> {
        let prepared = prepare_path(path);
        let ReadTarget::Ready {
            index, doc_type, ..
        } = self.bind_for_read(&prepared).await?
        else {
            return Ok(RemoveResult::new(path, 0, now_millis()));
        };

        let query = read_query(&prepared, doc_type.as_deref(), None)?.to_json();
        let count = self
            .count_query(&index, Some(query.clone()))
            .await
            .map_err(|source| RemoveError::CountFailed {
                path: path.to_string(),
                source: Box::new(source),
            })?;

        // a single delete needs one concrete index
        if is_wildcard(&prepared) || index.contains('*') {
            self.calls
                .submit(EngineCall::DeleteByQuery(DeleteByQueryRequest {
                    index: index.clone(),
                    query,
                    refresh: true,
                }))
                .await?;
        } else if count > 0 {
            let deleted = self
                .calls
                .submit(EngineCall::Delete(DeleteRequest {
                    index: index.clone(),
                    id: prepared.clone(),
                    refresh: self.config.refresh,
                }))
                .await;
            match deleted {
                Err(e) if e.is_not_found() => {
                    tracing::debug!(path = %prepared, "document gone before delete");
                }
                other => {
                    other?;
                }
            }
        }

        tracing::debug!(path = %prepared, index = %index, removed = count, "removed");
        Ok(RemoveResult::new(path, count, now_millis()))
    }
}

/// The query of a raw count message: the document with `id`, else the
/// message body's query, restricted to `doc_type` and ANDed with `criteria`.
fn message_query(
    message: &CountMessage,
    criteria: Option<&Value>,
) -> Result<Option<Value>, ProviderError> {
    let mut clauses = Vec::new();
    let mut raw = None;

    if let Some(ref id) = message.id {
        clauses.push(path_clause(id));
    } else if let Some(query) = message.body.as_ref().and_then(|b| b.get("query")) {
        raw = Some(query.clone());
    }
    if let Some(ref doc_type) = message.doc_type {
        clauses.push(type_clause(doc_type));
    }
    if let Some(criteria) = criteria {
        clauses.push(translate(criteria)?);
    }

    if clauses.is_empty() {
        return Ok(raw);
    }
    let query = EngineQuery::and(clauses).to_json();
    Ok(Some(match raw {
        Some(raw) => json!({ "bool": { "filter": [raw, query] } }),
        None => query,
    }))
}
