//! Extraction gateway
//!
//! Two upstream stages turn a validated upload into an `ExtractedRecord`:
//! layout analysis, then language-model reformatting. Each stage is bounded
//! by a timeout and retried on transient failures. The record and the
//! `extracting -> extracted` transition are committed together.

pub mod layout;
pub mod reformat;

pub use layout::{HttpLayoutService, LayoutAnalysis, LayoutBlock, LayoutService, MockLayoutService};

use crate::blob::BlobStore;
use crate::config::Settings;
use crate::error::{OrchestrationError, UpstreamKind};
use crate::gemini::LanguageModel;
use crate::models::{
    Document, DocumentKey, DocumentPatch, DocumentStatus, ExtractedRecord, OperationKind, TenantId,
};
use crate::state::{MetadataStore, Scoped};
use crate::usage::UsageMeter;
use crate::Result;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timeouts, retries and confidence bounds for extraction.
#[derive(Debug, Clone)]
pub struct ExtractionPolicy {
    pub stage_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub default_confidence: f32,
    pub min_confidence: f32,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ExtractionPolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            stage_timeout: settings.upstream_timeout,
            max_attempts: settings.extraction_max_attempts.max(1),
            retry_backoff: Duration::from_millis(200),
            default_confidence: settings.default_extraction_confidence,
            min_confidence: settings.min_extraction_confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Extracted(ExtractedRecord),
    /// Another worker holds or won the transition; carries the stored record if any.
    Skipped { current: Option<ExtractedRecord> },
}

impl ExtractionOutcome {
    pub fn record(&self) -> Option<&ExtractedRecord> {
        match self {
            ExtractionOutcome::Extracted(record) => Some(record),
            ExtractionOutcome::Skipped { current } => current.as_ref(),
        }
    }
}

#[derive(Clone)]
pub struct ExtractionGateway {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    layout: Arc<dyn LayoutService>,
    model: Arc<dyn LanguageModel>,
    usage: UsageMeter,
    policy: ExtractionPolicy,
}

impl ExtractionGateway {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        layout: Arc<dyn LayoutService>,
        model: Arc<dyn LanguageModel>,
        policy: ExtractionPolicy,
    ) -> Self {
        Self {
            usage: UsageMeter::new(store.clone()),
            store,
            blobs,
            layout,
            model,
            policy,
        }
    }

    /// Extract the initial version of a document owned by `tenant_id`.
    pub async fn extract(&self, tenant_id: &TenantId, key: &DocumentKey) -> Result<ExtractionOutcome> {
        let document = self
            .store
            .lookup_document(tenant_id, key)
            .await?
            .require(tenant_id, "Document")?;

        match document.status {
            DocumentStatus::Validated | DocumentStatus::Extracted => {}
            DocumentStatus::Extracting => {
                debug!(document = %key, "Extraction already in progress");
                return Ok(ExtractionOutcome::Skipped {
                    current: self.current_record(tenant_id, key).await?,
                });
            }
            other => {
                return Err(OrchestrationError::Input(format!(
                    "Document {} cannot be extracted from status '{}'",
                    key.document_id, other
                )));
            }
        }

        let claimed = self
            .store
            .transition_document(
                tenant_id,
                key,
                &[DocumentStatus::Validated, DocumentStatus::Extracted],
                DocumentStatus::Extracting,
                &DocumentPatch::default(),
            )
            .await?;

        if !claimed.is_applied() {
            debug!(document = %key, "Lost extraction claim");
            return Ok(ExtractionOutcome::Skipped {
                current: self.current_record(tenant_id, key).await?,
            });
        }

        info!(tenant_id = %tenant_id, document = %key, "Extraction started");

        match self.run_stages(&document).await {
            Ok(ExtractionOutcome::Extracted(record)) => {
                self.usage
                    .increment(tenant_id, OperationKind::DocumentsExtracted)
                    .await;
                info!(
                    document = %key,
                    payload_type = record.payload.type_name(),
                    confidence = record.confidence,
                    "Extraction committed"
                );
                Ok(ExtractionOutcome::Extracted(record))
            }
            Ok(skipped) => Ok(skipped),
            Err(e) => {
                self.reject(tenant_id, key, &e).await;
                Err(e)
            }
        }
    }

    async fn current_record(
        &self,
        tenant_id: &TenantId,
        key: &DocumentKey,
    ) -> Result<Option<ExtractedRecord>> {
        Ok(match self.store.lookup_record(tenant_id, key).await? {
            Scoped::Found(record) => Some(record),
            Scoped::Missing | Scoped::Foreign => None,
        })
    }

    async fn run_stages(&self, document: &Document) -> Result<ExtractionOutcome> {
        let key = document.key();

        let analysis = self
            .attempt("layout", || self.layout.analyze(&document.location))
            .await?;

        let confidence = analysis
            .mean_confidence()
            .unwrap_or(self.policy.default_confidence);

        if confidence < self.policy.min_confidence {
            return Err(OrchestrationError::upstream(
                UpstreamKind::LowConfidence,
                format!(
                    "Layout confidence {:.2} below minimum {:.2}",
                    confidence, self.policy.min_confidence
                ),
            ));
        }

        let source = self
            .blobs
            .put_artifact(&document.tenant_id, &key, serde_json::to_vec(&analysis)?)
            .await?;

        let prompt = reformat::build_prompt(&analysis);
        let response = self
            .attempt("reformat", || self.model.complete(&prompt, reformat::MAX_TOKENS))
            .await?;

        let record = ExtractedRecord {
            document_id: document.document_id.clone(),
            version: document.version,
            tenant_id: document.tenant_id.clone(),
            payload: reformat::parse_payload(&response),
            confidence,
            source,
            extracted_at: Utc::now(),
        };

        if self.store.commit_extraction(&record).await?.is_applied() {
            Ok(ExtractionOutcome::Extracted(record))
        } else {
            warn!(document = %key, "Extraction commit lost to a concurrent writer");
            Ok(ExtractionOutcome::Skipped {
                current: self.current_record(&document.tenant_id, &key).await?,
            })
        }
    }

    /// Run one upstream call under the stage timeout, retrying transient failures.
    async fn attempt<T, F, Fut>(&self, stage: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.policy.stage_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(OrchestrationError::upstream(
                    UpstreamKind::Timeout,
                    format!(
                        "{} stage exceeded {}s",
                        stage,
                        self.policy.stage_timeout.as_secs_f64()
                    ),
                )),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    warn!(stage, attempt, error = %e, "Retrying extraction stage");
                    tokio::time::sleep(self.policy.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn reject(&self, tenant_id: &TenantId, key: &DocumentKey, cause: &OrchestrationError) {
        error!(document = %key, error = %cause, "Extraction failed");

        match self
            .store
            .transition_document(
                tenant_id,
                key,
                &[DocumentStatus::Extracting],
                DocumentStatus::Rejected,
                &DocumentPatch::reason(cause.to_string()),
            )
            .await
        {
            Ok(outcome) if !outcome.is_applied() => {
                warn!(document = %key, "Document left extracting before rejection")
            }
            Ok(_) => {}
            Err(e) => error!(document = %key, error = %e, "Failed to record extraction rejection"),
        }
    }
}
