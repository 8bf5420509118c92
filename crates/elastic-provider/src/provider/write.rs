//! Upserts, inserts and bulk writes.

use serde_json::Value;

use super::ElasticProvider;
use crate::document::{BulkWrite, DocumentWrite, StoredDocument, UpsertOutcome, now_millis};
use crate::engine::{BulkRequest, IndexRequest, UpdateRequest};
use crate::error::{EngineError, ProviderResult, ValidationError};
use crate::index::DynamicBinding;
use crate::path::render_path;
use crate::query::{WriteContext, bulk_action};
use crate::queue::EngineCall;
use crate::store::{UpsertOptions, UpsertPayload, UpsertType};

/// Largest accepted bulk batch.
pub const MAX_BULK_ITEMS: usize = 1000;

impl ElasticProvider {
    pub(super) async fn write(
        &self,
        path: &str,
        payload: UpsertPayload,
        options: UpsertOptions,
    ) -> ProviderResult<UpsertOutcome> {
        if options.upsert_type == UpsertType::Bulk {
            return self.bulk(path, payload, options).await.map(UpsertOutcome::Bulk);
        }

        let path = render_path(path, Some(&payload.data));
        let (_, binding) = self.bind_for_write(&path).await?;
        let context = WriteContext {
            path: &path,
            data: &payload.data,
            tag: payload.tag.as_ref(),
            doc_type: &binding.doc_type,
            values: &binding.values,
            modified_by: options.modified_by.as_deref(),
            now: now_millis(),
        };

        let write = match options.upsert_type {
            UpsertType::Insert => self.insert(&binding, &context, &options).await?,
            _ => self.update(&binding, &context, &options).await?,
        };
        Ok(UpsertOutcome::Document(write))
    }

    async fn insert(
        &self,
        binding: &DynamicBinding,
        context: &WriteContext<'_>,
        options: &UpsertOptions,
    ) -> ProviderResult<DocumentWrite> {
        let envelope = context.envelope();
        let response = self
            .calls
            .submit(EngineCall::Index(IndexRequest {
                index: binding.index.clone(),
                id: context.path.to_string(),
                body: envelope.clone(),
                create_only: true,
                refresh: self.refresh_for(options),
            }))
            .await?;

        let mut inserted = StoredDocument::from_source(
            &envelope,
            response.get("_id").and_then(Value::as_str),
            response
                .get("_index")
                .and_then(Value::as_str)
                .unwrap_or(&binding.index),
            &binding.doc_type,
        );
        inserted.version = response.get("_version").and_then(Value::as_i64);

        tracing::debug!(path = context.path, index = %inserted.index, "inserted document");
        let meta = inserted.meta();
        Ok(DocumentWrite {
            stored: inserted.clone(),
            created: Some(inserted),
            was_upsert: false,
            meta,
        })
    }

    async fn update(
        &self,
        binding: &DynamicBinding,
        context: &WriteContext<'_>,
        options: &UpsertOptions,
    ) -> ProviderResult<DocumentWrite> {
        let retries = options
            .retries
            .unwrap_or_else(|| self.config.conflict_retries());
        let response = self
            .calls
            .submit(EngineCall::Update(UpdateRequest {
                index: binding.index.clone(),
                id: context.path.to_string(),
                body: context.update_body(),
                retry_on_conflict: retries,
                refresh: self.refresh_for(options),
            }))
            .await?;

        let source = response
            .get("get")
            .and_then(|g| g.get("_source"))
            .ok_or_else(|| EngineError::Decode {
                message: format!("update of {} returned no document source", context.path),
            })?;

        let mut stored = StoredDocument::from_source(
            source,
            response.get("_id").and_then(Value::as_str),
            response
                .get("_index")
                .and_then(Value::as_str)
                .unwrap_or(&binding.index),
            &binding.doc_type,
        );
        stored.version = response.get("_version").and_then(Value::as_i64);

        let created = response.get("result").and_then(Value::as_str) == Some("created");
        tracing::debug!(path = context.path, created, "upserted document");

        let meta = stored.meta();
        Ok(DocumentWrite {
            created: created.then(|| stored.clone()),
            stored,
            was_upsert: true,
            meta,
        })
    }

    async fn bulk(
        &self,
        path: &str,
        payload: UpsertPayload,
        options: UpsertOptions,
    ) -> ProviderResult<BulkWrite> {
        let items = bulk_items(&payload.data)?;
        if items.len() > MAX_BULK_ITEMS {
            return Err(ValidationError::BulkSizeExceeded {
                count: items.len(),
                max: MAX_BULK_ITEMS,
            }
            .into());
        }

        let now = now_millis();
        let mut operations = Vec::with_capacity(items.len() * 2);

        for (position, item) in items.iter().enumerate() {
            let data = item
                .get("data")
                .ok_or_else(|| ValidationError::InvalidPayload {
                    message: format!("bulk item {} has no data", position),
                })?;
            let item_path = item.get("path").and_then(Value::as_str).unwrap_or(path);
            let item_path = render_path(item_path, Some(data));
            let (_, binding) = self.bind_for_write(&item_path).await?;

            let context = WriteContext {
                path: &item_path,
                data,
                tag: item.get("_tag"),
                doc_type: &binding.doc_type,
                values: &binding.values,
                modified_by: options.modified_by.as_deref(),
                now,
            };
            operations.push(bulk_action(&binding.index, &item_path));
            operations.push(context.envelope());
        }

        let response = self
            .calls
            .submit(EngineCall::Bulk(BulkRequest {
                operations,
                refresh: self.refresh_for(&options),
            }))
            .await?;

        let write = BulkWrite::from_response(response);
        if write.errors {
            tracing::warn!(
                failed = ?write.failed_paths(),
                "bulk write reported item errors"
            );
        } else {
            tracing::debug!(items = write.items.len(), "bulk write completed");
        }
        Ok(write)
    }
}

/// The items of a bulk payload: the array itself, or the array under
/// `value` when the framework wrapped it.
fn bulk_items(data: &Value) -> Result<&Vec<Value>, ValidationError> {
    match data {
        Value::Array(items) => Ok(items),
        Value::Object(map) => match map.get("value") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(ValidationError::InvalidPayload {
                message: "bulk data must be an array or carry one under 'value'".to_string(),
            }),
        },
        _ => Err(ValidationError::InvalidPayload {
            message: "bulk data must be an array".to_string(),
        }),
    }
}
