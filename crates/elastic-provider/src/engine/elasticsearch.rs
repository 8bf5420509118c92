//! Elasticsearch client implementation of [`SearchEngine`].

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use elasticsearch::auth::Credentials;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::http::request::JsonBody;
use elasticsearch::http::response::Response;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use elasticsearch::indices::{IndicesCreateParts, IndicesExistsParts};
use elasticsearch::params::{OpType, Refresh};
use elasticsearch::{
    BulkParts, CountParts, DeleteByQueryParts, DeleteParts, Elasticsearch, IndexParts,
    SearchParts, UpdateParts,
};
use serde_json::{Value, json};

use super::{
    BulkRequest, CountRequest, CreateIndexRequest, DeleteByQueryRequest, DeleteRequest,
    IndexRequest, SearchEngine, SearchRequest, UpdateRequest,
};
use crate::config::{ElasticsearchAuth, ProviderConfig};
use crate::error::{EngineError, EngineResult, is_already_exists_body};

/// [`SearchEngine`] backed by the official Elasticsearch client.
pub struct ElasticsearchEngine {
    client: Elasticsearch,
    node: String,
    closed: AtomicBool,
}

impl Debug for ElasticsearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchEngine")
            .field("node", &self.node)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ElasticsearchEngine {
    /// Builds a client for the first configured node.
    pub fn new(config: &ProviderConfig) -> EngineResult<Self> {
        let node = config
            .nodes
            .first()
            .cloned()
            .unwrap_or_else(|| "http://localhost:9200".to_string());

        let parsed_url: elasticsearch::http::Url =
            node.parse().map_err(|e| EngineError::Transport {
                message: format!("Invalid URL {}: {}", node, e),
            })?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);

        let mut builder = TransportBuilder::new(conn_pool)
            .timeout(Duration::from_millis(config.request_timeout_ms));

        if config.disable_certificate_validation {
            builder = builder.cert_validation(CertificateValidation::None);
        }

        if let Some(ref auth) = config.auth {
            builder = match auth {
                ElasticsearchAuth::Basic { username, password } => {
                    builder.auth(Credentials::Basic(username.clone(), password.clone()))
                }
                ElasticsearchAuth::Bearer { token } => {
                    builder.auth(Credentials::Bearer(token.clone()))
                }
            };
        }

        let transport = builder.build().map_err(|e| EngineError::Transport {
            message: format!("Failed to build transport: {}", e),
        })?;

        Ok(Self {
            client: Elasticsearch::new(transport),
            node,
            closed: AtomicBool::new(false),
        })
    }

    /// The node this client talks to.
    pub fn node(&self) -> &str {
        &self.node
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

/// Splits a comma-separated index expression into path parts.
fn index_parts(expression: &str) -> Vec<&str> {
    expression.split(',').collect()
}

fn refresh_param(refresh: bool) -> Refresh {
    if refresh { Refresh::True } else { Refresh::False }
}

fn transport_error(operation: &str, e: elasticsearch::Error) -> EngineError {
    EngineError::Transport {
        message: format!("{} failed: {}", operation, e),
    }
}

/// Reads a response body, turning non-success statuses into errors.
async fn read_json(response: Response) -> EngineResult<Value> {
    let status = response.status_code();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EngineError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response.json::<Value>().await.map_err(|e| EngineError::Decode {
        message: e.to_string(),
    })
}

#[async_trait]
impl SearchEngine for ElasticsearchEngine {
    async fn ping(&self, timeout: Duration) -> EngineResult<()> {
        self.ensure_open()?;
        let response = self
            .client
            .ping()
            .request_timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error("ping", e))?;

        let status = response.status_code();
        if !status.is_success() {
            return Err(EngineError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn index(&self, request: IndexRequest) -> EngineResult<Value> {
        self.ensure_open()?;
        let mut call = self
            .client
            .index(IndexParts::IndexId(&request.index, &request.id))
            .body(request.body)
            .refresh(refresh_param(request.refresh));
        if request.create_only {
            call = call.op_type(OpType::Create);
        }
        let response = call.send().await.map_err(|e| transport_error("index", e))?;
        read_json(response).await
    }

    async fn update(&self, request: UpdateRequest) -> EngineResult<Value> {
        self.ensure_open()?;
        let response = self
            .client
            .update(UpdateParts::IndexId(&request.index, &request.id))
            .body(request.body)
            ._source(&["true"])
            .retry_on_conflict(i64::from(request.retry_on_conflict))
            .refresh(refresh_param(request.refresh))
            .send()
            .await
            .map_err(|e| transport_error("update", e))?;
        read_json(response).await
    }

    async fn bulk(&self, request: BulkRequest) -> EngineResult<Value> {
        self.ensure_open()?;
        let body: Vec<JsonBody<Value>> =
            request.operations.into_iter().map(JsonBody::new).collect();
        let response = self
            .client
            .bulk(BulkParts::None)
            .body(body)
            .refresh(refresh_param(request.refresh))
            .send()
            .await
            .map_err(|e| transport_error("bulk", e))?;
        read_json(response).await
    }

    async fn delete(&self, request: DeleteRequest) -> EngineResult<Value> {
        self.ensure_open()?;
        let response = self
            .client
            .delete(DeleteParts::IndexId(&request.index, &request.id))
            .refresh(refresh_param(request.refresh))
            .send()
            .await
            .map_err(|e| transport_error("delete", e))?;
        read_json(response).await
    }

    async fn delete_by_query(&self, request: DeleteByQueryRequest) -> EngineResult<Value> {
        self.ensure_open()?;
        let response = self
            .client
            .delete_by_query(DeleteByQueryParts::Index(&index_parts(&request.index)))
            .body(json!({ "query": request.query }))
            .refresh(request.refresh)
            .send()
            .await
            .map_err(|e| transport_error("delete_by_query", e))?;
        read_json(response).await
    }

    async fn search(&self, request: SearchRequest) -> EngineResult<Value> {
        self.ensure_open()?;
        let response = self
            .client
            .search(SearchParts::Index(&index_parts(&request.index)))
            .body(request.body)
            .send()
            .await
            .map_err(|e| transport_error("search", e))?;
        read_json(response).await
    }

    async fn count(&self, request: CountRequest) -> EngineResult<Value> {
        self.ensure_open()?;
        let indices = index_parts(&request.index);
        let call = self.client.count(CountParts::Index(&indices));
        let response = match request.query {
            Some(query) => call.body(json!({ "query": query })).send().await,
            None => call.send().await,
        }
        .map_err(|e| transport_error("count", e))?;
        read_json(response).await
    }

    async fn create_index(&self, request: CreateIndexRequest) -> EngineResult<Value> {
        self.ensure_open()?;
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(&request.index))
            .body(request.body)
            .send()
            .await
            .map_err(|e| transport_error("create index", e))?;

        match read_json(response).await {
            Err(EngineError::Status { body, .. }) if is_already_exists_body(&body) => {
                Err(EngineError::AlreadyExists {
                    index: request.index,
                })
            }
            other => other,
        }
    }

    async fn index_exists(&self, index: &str) -> EngineResult<bool> {
        self.ensure_open()?;
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| transport_error("index exists", e))?;

        match response.status_code().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(EngineError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn close(&self) -> EngineResult<()> {
        // the transport owns no long-lived resources; closing only fences
        // later calls
        self.closed.store(true, Ordering::Release);
        tracing::debug!(node = %self.node, "Elasticsearch client closed");
        Ok(())
    }
}
