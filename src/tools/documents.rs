//! Document tools: validation lookup, extraction and data retrieval

use super::{document_id_arg, Tool, ToolName};
use crate::error::OrchestrationError;
use crate::extraction::{ExtractionGateway, ExtractionOutcome};
use crate::models::{DocumentId, DocumentKey, DocumentStatus, TenantId};
use crate::state::{deny, MetadataStore, Scoped};
use crate::Result;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const EXTRACTED_CONFIDENCE: f64 = 0.95;
const UNEXTRACTED_CONFIDENCE: f64 = 0.8;

/// Read-only check of a document's validation state.
pub struct ValidateDocumentTool {
    store: Arc<dyn MetadataStore>,
}

impl ValidateDocumentTool {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for ValidateDocumentTool {
    fn name(&self) -> ToolName {
        ToolName::ValidateDocument
    }

    fn description(&self) -> &'static str {
        "Check whether an uploaded document exists, belongs to the caller and passed validation"
    }

    fn parameters(&self) -> Value {
        json!({"document_id": "string (required)"})
    }

    async fn execute(&self, tenant_id: &TenantId, args: &Map<String, Value>) -> Result<Value> {
        let key = DocumentKey::initial(document_id_arg(args)?);

        Ok(match self.store.lookup_document(tenant_id, &key).await? {
            Scoped::Missing => json!({"valid": false, "error": "Document not found"}),
            Scoped::Foreign => json!({
                "valid": false,
                "error": deny(tenant_id, "Document").to_string(),
            }),
            Scoped::Found(document) => {
                let confidence = match document.status {
                    DocumentStatus::Extracted | DocumentStatus::Ready => EXTRACTED_CONFIDENCE,
                    _ => UNEXTRACTED_CONFIDENCE,
                };
                json!({
                    "valid": true,
                    "document_type": document.document_type,
                    "status": document.status,
                    "filename": document.filename,
                    "confidence": confidence,
                })
            }
        })
    }
}

/// Runs the extraction gateway for one document.
pub struct ExtractDataTool {
    gateway: ExtractionGateway,
}

impl ExtractDataTool {
    pub fn new(gateway: ExtractionGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait::async_trait]
impl Tool for ExtractDataTool {
    fn name(&self) -> ToolName {
        ToolName::ExtractData
    }

    fn description(&self) -> &'static str {
        "Extract structured financial data from a validated document; re-running replaces the stored record"
    }

    fn parameters(&self) -> Value {
        json!({"document_id": "string (required)"})
    }

    async fn execute(&self, tenant_id: &TenantId, args: &Map<String, Value>) -> Result<Value> {
        let document_id = document_id_arg(args)?;
        let key = DocumentKey::initial(document_id.clone());

        let outcome = self.gateway.extract(tenant_id, &key).await?;
        let state = match &outcome {
            ExtractionOutcome::Extracted(_) => "extracted",
            ExtractionOutcome::Skipped { .. } => "in_progress",
        };

        // A concurrent extraction with nothing committed yet is a no-op, not a failure.
        let Some(record) = outcome.record() else {
            return Ok(json!({
                "document_id": document_id,
                "extraction": state,
                "status": DocumentStatus::Extracting,
            }));
        };

        let mut data = record.to_tool_data();
        data["extraction"] = json!(state);
        Ok(data)
    }
}

/// Batch read of extracted records with per-item status.
pub struct GetDocumentDataTool {
    store: Arc<dyn MetadataStore>,
}

impl GetDocumentDataTool {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    async fn item(&self, tenant_id: &TenantId, raw_id: &Value) -> Result<Value> {
        let Some(document_id) = raw_id.as_str().and_then(|s| DocumentId::parse(s).ok()) else {
            return Ok(json!({"document_id": raw_id, "status": "not_found"}));
        };
        let key = DocumentKey::initial(document_id.clone());

        let document = match self.store.lookup_document(tenant_id, &key).await? {
            Scoped::Found(document) => document,
            Scoped::Missing => {
                return Ok(json!({"document_id": document_id, "status": "not_found"}))
            }
            Scoped::Foreign => {
                return Ok(json!({
                    "document_id": document_id,
                    "status": "access_denied",
                    "error": deny(tenant_id, "Document").to_string(),
                }))
            }
        };

        Ok(match self.store.lookup_record(tenant_id, &key).await? {
            Scoped::Found(record) => json!({
                "document_id": document_id,
                "status": "ok",
                "filename": document.filename,
                "document_type": document.document_type,
                "data": record.to_tool_data(),
            }),
            Scoped::Missing | Scoped::Foreign => json!({
                "document_id": document_id,
                "status": "not_ready",
                "document_status": document.status,
            }),
        })
    }
}

#[async_trait::async_trait]
impl Tool for GetDocumentDataTool {
    fn name(&self) -> ToolName {
        ToolName::GetDocumentData
    }

    fn description(&self) -> &'static str {
        "Fetch extracted data for several documents; each item reports ok, not_found, access_denied or not_ready"
    }

    fn parameters(&self) -> Value {
        json!({"document_ids": "array of strings (required, non-empty)"})
    }

    async fn execute(&self, tenant_id: &TenantId, args: &Map<String, Value>) -> Result<Value> {
        let ids = args
            .get("document_ids")
            .and_then(Value::as_array)
            .filter(|ids| !ids.is_empty())
            .ok_or_else(|| {
                OrchestrationError::Input("Missing required argument 'document_ids'".to_string())
            })?;

        let mut documents = Vec::with_capacity(ids.len());
        for raw_id in ids {
            documents.push(self.item(tenant_id, raw_id).await?);
        }

        let count = documents.iter().filter(|d| d["status"] == "ok").count();

        Ok(json!({
            "documents": documents,
            "count": count,
            "requested": ids.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Document, DocumentPatch, ExtractedPayload, ExtractedRecord, StructuredFields,
    };
    use crate::state::InMemoryMetadataStore;
    use chrono::Utc;

    async fn seeded() -> (Arc<InMemoryMetadataStore>, TenantId) {
        let store = Arc::new(InMemoryMetadataStore::new());
        let acme = TenantId::parse(Some("acme")).unwrap();

        for (id, extract) in [("extracted", true), ("validated", false)] {
            let document_id = DocumentId::parse(id).unwrap();
            let mut document = Document::pending(
                acme.clone(),
                document_id.clone(),
                format!("{}.pdf", id),
                format!("uploads/acme/{}/{}.pdf", id, id),
            );
            document.status = DocumentStatus::Validated;
            document.document_type = "pdf".into();
            store.insert_document(&document).await.unwrap();

            if extract {
                let key = DocumentKey::initial(document_id.clone());
                store
                    .transition_document(
                        &acme,
                        &key,
                        &[DocumentStatus::Validated],
                        DocumentStatus::Extracting,
                        &DocumentPatch::default(),
                    )
                    .await
                    .unwrap();
                store
                    .commit_extraction(&ExtractedRecord {
                        document_id,
                        version: 1,
                        tenant_id: acme.clone(),
                        payload: ExtractedPayload::Structured(StructuredFields::default()),
                        confidence: 0.9,
                        source: "processed/acme/extracted/v1/x.json".into(),
                        extracted_at: Utc::now(),
                    })
                    .await
                    .unwrap();
            }
        }

        (store, acme)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_validate_document_views() {
        let (store, acme) = seeded().await;
        let tool = ValidateDocumentTool::new(store);

        let found = tool
            .execute(&acme, &args(json!({"document_id": "extracted"})))
            .await
            .unwrap();
        assert_eq!(found["valid"], true);
        assert_eq!(found["confidence"], 0.95);
        assert_eq!(found["status"], "extracted");

        let pending = tool
            .execute(&acme, &args(json!({"document_id": "validated"})))
            .await
            .unwrap();
        assert_eq!(pending["confidence"], 0.8);

        let missing = tool
            .execute(&acme, &args(json!({"document_id": "nope"})))
            .await
            .unwrap();
        assert_eq!(missing, json!({"valid": false, "error": "Document not found"}));

        let globex = TenantId::parse(Some("globex")).unwrap();
        let foreign = tool
            .execute(&globex, &args(json!({"document_id": "extracted"})))
            .await
            .unwrap();
        assert_eq!(foreign, json!({"valid": false, "error": "Access denied"}));
    }

    #[tokio::test]
    async fn test_get_document_data_reports_per_item() {
        let (store, acme) = seeded().await;
        let tool = GetDocumentDataTool::new(store.clone());

        let data = tool
            .execute(
                &acme,
                &args(json!({"document_ids": ["extracted", "validated", "missing"]})),
            )
            .await
            .unwrap();

        assert_eq!(data["count"], 1);
        assert_eq!(data["requested"], 3);
        let statuses: Vec<&str> = data["documents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, vec!["ok", "not_ready", "not_found"]);

        let globex = TenantId::parse(Some("globex")).unwrap();
        let foreign = tool
            .execute(&globex, &args(json!({"document_ids": ["extracted"]})))
            .await
            .unwrap();
        assert_eq!(foreign["count"], 0);
        assert_eq!(foreign["documents"][0]["status"], "access_denied");
        assert!(foreign["documents"][0].get("data").is_none());
    }

    #[tokio::test]
    async fn test_extract_while_in_progress_is_a_no_op() {
        use crate::blob::InMemoryBlobStore;
        use crate::extraction::{ExtractionPolicy, LayoutAnalysis, MockLayoutService};
        use crate::gemini::MockLanguageModel;

        let (store, acme) = seeded().await;
        let key = DocumentKey::initial(DocumentId::parse("validated").unwrap());
        store
            .transition_document(
                &acme,
                &key,
                &[DocumentStatus::Validated],
                DocumentStatus::Extracting,
                &DocumentPatch::default(),
            )
            .await
            .unwrap();

        let layout = Arc::new(MockLayoutService::fixed(LayoutAnalysis::default()));
        let tool = ExtractDataTool::new(ExtractionGateway::new(
            store.clone(),
            Arc::new(InMemoryBlobStore::new()),
            layout.clone(),
            Arc::new(MockLanguageModel::fixed("{}")),
            ExtractionPolicy::default(),
        ));

        let data = tool
            .execute(&acme, &args(json!({"document_id": "validated"})))
            .await
            .unwrap();

        assert_eq!(
            data,
            json!({"document_id": "validated", "extraction": "in_progress", "status": "extracting"})
        );
        assert_eq!(layout.calls(), 0);
    }

    #[tokio::test]
    async fn test_get_document_data_requires_ids() {
        let (store, acme) = seeded().await;
        let tool = GetDocumentDataTool::new(store);
        assert!(tool.execute(&acme, &args(json!({"document_ids": []}))).await.is_err());
    }
}
