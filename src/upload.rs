//! Upload entry point
//!
//! Creates the `pending_upload` record and a single-use write handle, then
//! feeds the object-created signal of a completed write to the pipeline.

use crate::blob::{upload_key, validate_filename, BlobStore};
use crate::config::Settings;
use crate::error::OrchestrationError;
use crate::models::{Document, DocumentId, OperationKind, TenantId};
use crate::pipeline::{ValidationOutcome, ValidationPipeline};
use crate::state::MetadataStore;
use crate::usage::UsageMeter;
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTicket {
    pub document_id: DocumentId,
    pub upload_token: String,
    pub key: String,
    pub expires_in: i64,
}

pub struct UploadService {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    pipeline: Arc<ValidationPipeline>,
    usage: UsageMeter,
    handle_ttl: chrono::Duration,
}

impl UploadService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        pipeline: Arc<ValidationPipeline>,
        settings: &Settings,
    ) -> Self {
        Self {
            usage: UsageMeter::new(store.clone()),
            store,
            blobs,
            pipeline,
            handle_ttl: chrono::Duration::seconds(settings.upload_handle_ttl.as_secs() as i64),
        }
    }

    /// Register a new document and issue its write handle.
    pub async fn request_upload(&self, tenant_id: &TenantId, filename: &str) -> Result<UploadTicket> {
        validate_filename(filename)?;

        let document_id = DocumentId::generate();
        let key = upload_key(self.pipeline.upload_prefix(), tenant_id, &document_id, filename);

        let document = Document::pending(
            tenant_id.clone(),
            document_id.clone(),
            filename.to_string(),
            key.clone(),
        );

        if !self.store.insert_document(&document).await?.is_applied() {
            return Err(OrchestrationError::Storage(format!(
                "Document id collision for {}",
                document_id
            )));
        }

        let handle = self
            .blobs
            .issue_write_handle(key, tenant_id, &document_id, self.handle_ttl)
            .await?;

        self.usage
            .increment(tenant_id, OperationKind::UploadRequests)
            .await;

        info!(tenant_id = %tenant_id, document_id = %document_id, filename, "Upload requested");

        Ok(UploadTicket {
            document_id,
            expires_in: handle.expires_in_secs(Utc::now()),
            upload_token: handle.token,
            key: handle.key,
        })
    }

    /// Write the body through the handle and run validation on the new object.
    pub async fn complete_upload(&self, token: &str, body: Vec<u8>) -> Result<ValidationOutcome> {
        let event = self.blobs.write_with_handle(token, body).await?;
        self.pipeline.on_object_created(&event).await
    }
}
