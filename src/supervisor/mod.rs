//! Intent router
//!
//! Classifies a request, records it as `processing`, dispatches it to the
//! compliance or query capability and persists exactly one terminal status.
//! Failures are recorded on the request rather than returned, so callers
//! always get a structured record back once the inputs are valid.

pub mod compliance;
pub mod query;

pub use compliance::ComplianceCapability;
pub use query::QueryCapability;

use crate::classifier::IntentClassifier;
use crate::error::OrchestrationError;
use crate::models::{DocumentId, OperationKind, ProcessingRequest, RequestStatus, TaskCategory, TenantId};
use crate::state::MetadataStore;
use crate::tools::{ToolDispatcher, ToolName};
use crate::usage::UsageMeter;
use crate::Result;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Extracted data for one document the caller may read.
#[derive(Debug, Clone)]
pub struct DocumentData {
    pub document_id: String,
    pub filename: String,
    pub document_type: String,
    pub data: Map<String, Value>,
}

impl DocumentData {
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.data.get(name).and_then(Value::as_object)
    }

    pub fn has_figures(&self) -> bool {
        ["financial_metrics", "compliance_data"]
            .iter()
            .any(|s| self.section(s).is_some_and(|m| !m.is_empty()))
    }
}

/// Readable extracted data for the requested documents.
///
/// Missing, foreign and unextracted documents are skipped; an empty result
/// is a `NotFound`.
pub(crate) async fn fetch_document_data(
    tools: &ToolDispatcher,
    tenant_id: &TenantId,
    document_ids: &[DocumentId],
) -> Result<Vec<DocumentData>> {
    let response = tools
        .call(
            ToolName::GetDocumentData,
            tenant_id,
            &json!({ "document_ids": document_ids }),
        )
        .await?;

    let documents: Vec<DocumentData> = response["documents"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|item| item["status"] == "ok")
                .filter_map(|item| {
                    Some(DocumentData {
                        document_id: item["document_id"].as_str()?.to_string(),
                        filename: item["filename"].as_str().unwrap_or_default().to_string(),
                        document_type: item["document_type"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                        data: item["data"].as_object()?.clone(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if documents.is_empty() {
        return Err(OrchestrationError::NotFound(
            "No valid document data found for the provided document ids".to_string(),
        ));
    }

    Ok(documents)
}

pub struct Supervisor {
    store: Arc<dyn MetadataStore>,
    classifier: Arc<dyn IntentClassifier>,
    compliance: ComplianceCapability,
    query: QueryCapability,
    usage: UsageMeter,
    request_ttl: chrono::Duration,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        classifier: Arc<dyn IntentClassifier>,
        compliance: ComplianceCapability,
        query: QueryCapability,
        usage: UsageMeter,
        request_ttl: std::time::Duration,
    ) -> Self {
        Self {
            store,
            classifier,
            compliance,
            query,
            usage,
            request_ttl: chrono::Duration::from_std(request_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    pub async fn route(
        &self,
        tenant_id: &TenantId,
        prompt: &str,
        document_ids: &[DocumentId],
    ) -> Result<ProcessingRequest> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(OrchestrationError::Input("Missing required field 'prompt'".to_string()));
        }
        if document_ids.is_empty() {
            return Err(OrchestrationError::Input(
                "Missing required field 'document_ids'".to_string(),
            ));
        }

        let now = Utc::now();
        let mut request = ProcessingRequest {
            request_id: Uuid::new_v4(),
            tenant_id: tenant_id.clone(),
            prompt: prompt.to_string(),
            document_ids: document_ids.to_vec(),
            status: RequestStatus::Processing,
            intent: None,
            result: None,
            created_at: now,
            completed_at: None,
            expires_at: now + self.request_ttl,
        };
        self.open_request(&request).await?;

        info!(
            request_id = %request.request_id,
            tenant_id = %tenant_id,
            documents = document_ids.len(),
            "Routing request"
        );

        let (status, intent, result) = match self.dispatch(tenant_id, prompt, document_ids).await {
            Ok((category, result)) => (RequestStatus::Completed, Some(category), result),
            Err((intent, e)) => {
                warn!(request_id = %request.request_id, error = %e, "Request failed");
                let body = e.to_body();
                let result = json!({
                    "error": body.error,
                    "error_kind": body.error_kind,
                    "retryable": body.retryable,
                });
                (RequestStatus::Failed, intent, result)
            }
        };

        let outcome = self
            .store
            .complete_request(tenant_id, request.request_id, status, intent, result.clone())
            .await?;

        if !outcome.is_applied() {
            warn!(request_id = %request.request_id, "Request already completed elsewhere");
            return self.status(tenant_id, request.request_id).await;
        }

        request.status = status;
        request.intent = intent;
        request.result = Some(result);
        request.completed_at = Some(Utc::now());
        Ok(request)
    }

    /// Persist a new request as processing and count it.
    async fn open_request(&self, request: &ProcessingRequest) -> Result<()> {
        if !self.store.insert_request(request).await?.is_applied() {
            warn!(request_id = %request.request_id, "Request id already recorded; not routing");
            return Err(OrchestrationError::Storage(format!(
                "Request {} already exists",
                request.request_id
            )));
        }

        self.usage
            .increment(&request.tenant_id, OperationKind::ProcessingRequests)
            .await;
        Ok(())
    }

    async fn dispatch(
        &self,
        tenant_id: &TenantId,
        prompt: &str,
        document_ids: &[DocumentId],
    ) -> std::result::Result<(TaskCategory, Value), (Option<TaskCategory>, OrchestrationError)> {
        let category = self
            .classifier
            .classify(prompt)
            .await
            .map_err(|e| (None, e))?
            .ok_or_else(|| {
                (
                    None,
                    OrchestrationError::Input("intent undetermined".to_string()),
                )
            })?;

        info!(intent = category.as_str(), "Classified request");

        let (result, operation) = match category {
            TaskCategory::Compliance => (
                self.compliance.run(tenant_id, prompt, document_ids).await,
                OperationKind::ComplianceChecks,
            ),
            TaskCategory::Query => (
                self.query.run(tenant_id, prompt, document_ids).await,
                OperationKind::QaQueries,
            ),
        };

        let result = result.map_err(|e| (Some(category), e))?;
        self.usage.increment(tenant_id, operation).await;
        Ok((category, result))
    }

    /// Current state of a request; expired requests are not found.
    pub async fn status(&self, tenant_id: &TenantId, request_id: Uuid) -> Result<ProcessingRequest> {
        let request = self
            .store
            .lookup_request(tenant_id, request_id)
            .await?
            .require(tenant_id, "Request")?;

        if request.is_expired(Utc::now()) {
            return Err(OrchestrationError::NotFound(format!("Request {}", request_id)));
        }

        Ok(request)
    }
}
