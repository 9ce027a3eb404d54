//! Validation pipeline
//!
//! Reacts to object-created signals for uploads: checks size and format,
//! moves the document out of `pending_upload`, notifies on rejection and
//! hands validated documents to the extraction gateway, either inline or
//! through a background worker.

pub mod sniff;

pub use sniff::detect_document_type;

use crate::blob::{parse_upload_key, BlobStore, ObjectCreated};
use crate::config::{ExtractionMode, Settings};
use crate::error::{ErrorBody, OrchestrationError};
use crate::extraction::{ExtractionGateway, ExtractionOutcome};
use crate::models::{
    DocumentId, DocumentKey, DocumentPatch, DocumentStatus, OperationKind, TenantId,
};
use crate::notify::{Notification, Notifier};
use crate::state::{MetadataStore, WriteOutcome};
use crate::usage::UsageMeter;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const REASON_TOO_LARGE: &str = "too large";
pub const REASON_EMPTY: &str = "empty file";
pub const REASON_UNSUPPORTED: &str = "unsupported type";

/// What happened to extraction after a document validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExtractionState {
    Extracted { confidence: f32 },
    Skipped,
    Queued,
    Failed(ErrorBody),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// Key is not an upload.
    Ignored { key: String },
    /// The document already left `pending_upload`; nothing was written.
    Duplicate { document_id: DocumentId },
    Rejected { document_id: DocumentId, reason: String },
    Validated {
        document_id: DocumentId,
        document_type: String,
        extraction: ExtractionState,
    },
}

#[derive(Debug)]
struct ExtractionJob {
    tenant_id: TenantId,
    key: DocumentKey,
}

enum Dispatch {
    Inline,
    Queued(mpsc::UnboundedSender<ExtractionJob>),
}

pub struct ValidationPipeline {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    gateway: ExtractionGateway,
    notifier: Arc<dyn Notifier>,
    usage: UsageMeter,
    max_upload_bytes: u64,
    upload_prefix: String,
    dispatch: Dispatch,
}

impl ValidationPipeline {
    /// Queued mode spawns the extraction worker and must run inside a Tokio runtime.
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        gateway: ExtractionGateway,
        notifier: Arc<dyn Notifier>,
        settings: &Settings,
    ) -> Self {
        let dispatch = match settings.extraction_mode {
            ExtractionMode::Inline => Dispatch::Inline,
            ExtractionMode::Queued => {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_worker(rx, gateway.clone(), notifier.clone()));
                Dispatch::Queued(tx)
            }
        };

        Self {
            usage: UsageMeter::new(store.clone()),
            store,
            blobs,
            gateway,
            notifier,
            max_upload_bytes: settings.max_upload_bytes,
            upload_prefix: settings.upload_prefix.clone(),
            dispatch,
        }
    }

    pub fn upload_prefix(&self) -> &str {
        &self.upload_prefix
    }

    /// Handle one object-created signal.
    pub async fn on_object_created(&self, event: &ObjectCreated) -> Result<ValidationOutcome> {
        let Some(path) = parse_upload_key(&self.upload_prefix, &event.key) else {
            debug!(key = %event.key, "Ignoring object outside upload prefix");
            return Ok(ValidationOutcome::Ignored {
                key: event.key.clone(),
            });
        };

        let tenant_id = path.tenant_id;
        let key = DocumentKey::initial(path.document_id);

        let document = self
            .store
            .lookup_document(&tenant_id, &key)
            .await?
            .require(&tenant_id, "Document")?;

        if document.status != DocumentStatus::PendingUpload {
            debug!(document = %key, status = %document.status, "Duplicate upload signal");
            return Ok(ValidationOutcome::Duplicate {
                document_id: key.document_id,
            });
        }

        let verdict = self.check(event, &path.filename).await?;

        let (next, patch) = match &verdict {
            Ok(document_type) => (
                DocumentStatus::Validated,
                DocumentPatch {
                    document_type: Some(document_type.to_string()),
                    size_bytes: Some(event.size),
                    status_reason: None,
                },
            ),
            Err(reason) => (
                DocumentStatus::Rejected,
                DocumentPatch {
                    size_bytes: Some(event.size),
                    ..DocumentPatch::reason(*reason)
                },
            ),
        };

        let written = self
            .store
            .transition_document(
                &tenant_id,
                &key,
                &[DocumentStatus::PendingUpload],
                next,
                &patch,
            )
            .await?;

        if written == WriteOutcome::Conflict {
            debug!(document = %key, "Lost validation race");
            return Ok(ValidationOutcome::Duplicate {
                document_id: key.document_id,
            });
        }

        self.usage
            .increment(&tenant_id, OperationKind::DocumentsValidated)
            .await;

        match verdict {
            Err(reason) => {
                info!(tenant_id = %tenant_id, document = %key, reason, "Document rejected");
                self.notifier.notify(Notification {
                    tenant_id,
                    document_id: key.document_id.clone(),
                    reason: reason.to_string(),
                });
                Ok(ValidationOutcome::Rejected {
                    document_id: key.document_id,
                    reason: reason.to_string(),
                })
            }
            Ok(document_type) => {
                info!(tenant_id = %tenant_id, document = %key, document_type, "Document validated");
                let extraction = self.dispatch_extraction(tenant_id, key.clone()).await;
                Ok(ValidationOutcome::Validated {
                    document_id: key.document_id,
                    document_type: document_type.to_string(),
                    extraction,
                })
            }
        }
    }

    /// Size then format; the inner error is the rejection reason.
    async fn check(
        &self,
        event: &ObjectCreated,
        filename: &str,
    ) -> Result<std::result::Result<&'static str, &'static str>> {
        if event.size > self.max_upload_bytes {
            return Ok(Err(REASON_TOO_LARGE));
        }
        if event.size == 0 {
            return Ok(Err(REASON_EMPTY));
        }

        let head = self.blobs.read_prefix(&event.key, sniff::SNIFF_BYTES).await?;
        Ok(detect_document_type(&head, filename).ok_or(REASON_UNSUPPORTED))
    }

    async fn dispatch_extraction(&self, tenant_id: TenantId, key: DocumentKey) -> ExtractionState {
        if let Dispatch::Queued(tx) = &self.dispatch {
            match tx.send(ExtractionJob { tenant_id, key }) {
                Ok(()) => return ExtractionState::Queued,
                Err(mpsc::error::SendError(job)) => {
                    warn!(document = %job.key, "Extraction worker stopped; extracting inline");
                    return extract_and_report(&self.gateway, &self.notifier, job).await;
                }
            }
        }

        extract_and_report(&self.gateway, &self.notifier, ExtractionJob { tenant_id, key }).await
    }

    /// Move an extracted document to `ready`.
    pub async fn mark_ready(&self, tenant_id: &TenantId, document_id: &DocumentId) -> Result<WriteOutcome> {
        let key = DocumentKey::initial(document_id.clone());
        let document = self
            .store
            .lookup_document(tenant_id, &key)
            .await?
            .require(tenant_id, "Document")?;

        match document.status {
            DocumentStatus::Extracted => {}
            DocumentStatus::Ready => return Ok(WriteOutcome::Conflict),
            other => {
                return Err(OrchestrationError::Input(format!(
                    "Document {} is '{}', only extracted documents can be marked ready",
                    document_id, other
                )));
            }
        }

        let outcome = self
            .store
            .transition_document(
                tenant_id,
                &key,
                &[DocumentStatus::Extracted],
                DocumentStatus::Ready,
                &DocumentPatch::default(),
            )
            .await?;

        if outcome.is_applied() {
            info!(tenant_id = %tenant_id, document = %key, "Document ready");
        }
        Ok(outcome)
    }
}

async fn extract_and_report(
    gateway: &ExtractionGateway,
    notifier: &Arc<dyn Notifier>,
    job: ExtractionJob,
) -> ExtractionState {
    match gateway.extract(&job.tenant_id, &job.key).await {
        Ok(ExtractionOutcome::Extracted(record)) => ExtractionState::Extracted {
            confidence: record.confidence,
        },
        Ok(ExtractionOutcome::Skipped { .. }) => ExtractionState::Skipped,
        Err(e) => {
            notifier.notify(Notification {
                tenant_id: job.tenant_id,
                document_id: job.key.document_id,
                reason: e.to_string(),
            });
            ExtractionState::Failed(e.to_body())
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<ExtractionJob>,
    gateway: ExtractionGateway,
    notifier: Arc<dyn Notifier>,
) {
    info!("Extraction worker started");
    while let Some(job) = rx.recv().await {
        let document = job.key.clone();
        match extract_and_report(&gateway, &notifier, job).await {
            ExtractionState::Failed(body) => {
                error!(document = %document, error = %body.error, "Queued extraction failed")
            }
            state => debug!(document = %document, ?state, "Queued extraction finished"),
        }
    }
    info!("Extraction worker stopped");
}
