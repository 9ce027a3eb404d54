//! Core data models for the document orchestrator

use crate::error::OrchestrationError;
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//
// ================= Identity =================
//

/// Partitioning key threaded through every entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Absent or blank tenant identifiers are rejected, never defaulted.
    /// The id is a blob key segment, so path separators are refused too.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            Some(value) if value.contains(['/', '\\']) || value == "." || value == ".." => {
                Err(OrchestrationError::Input(format!(
                    "Invalid tenant identifier: '{}'",
                    value
                )))
            }
            Some(value) if !value.is_empty() => Ok(Self(value.to_string())),
            _ => Err(OrchestrationError::Input(
                "Missing tenant identifier".to_string(),
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.contains('/') {
            return Err(OrchestrationError::Input(format!(
                "Invalid document id: '{}'",
                raw
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First revision assigned to every upload.
pub const INITIAL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub document_id: DocumentId,
    pub version: u32,
}

impl DocumentKey {
    pub fn initial(document_id: DocumentId) -> Self {
        Self {
            document_id,
            version: INITIAL_VERSION,
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.document_id, self.version)
    }
}

//
// ================= Document =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    PendingUpload,
    Validated,
    Rejected,
    Extracting,
    Extracted,
    Ready,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::PendingUpload => "pending_upload",
            DocumentStatus::Validated => "validated",
            DocumentStatus::Rejected => "rejected",
            DocumentStatus::Extracting => "extracting",
            DocumentStatus::Extracted => "extracted",
            DocumentStatus::Ready => "ready",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending_upload" => Ok(DocumentStatus::PendingUpload),
            "validated" => Ok(DocumentStatus::Validated),
            "rejected" => Ok(DocumentStatus::Rejected),
            "extracting" => Ok(DocumentStatus::Extracting),
            "extracted" => Ok(DocumentStatus::Extracted),
            "ready" => Ok(DocumentStatus::Ready),
            other => Err(OrchestrationError::Storage(format!(
                "Unknown document status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: DocumentId,
    pub version: u32,
    pub tenant_id: TenantId,
    pub filename: String,
    /// Blob key of the raw upload
    pub location: String,
    pub status: DocumentStatus,
    pub document_type: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn pending(
        tenant_id: TenantId,
        document_id: DocumentId,
        filename: String,
        location: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            document_id,
            version: INITIAL_VERSION,
            tenant_id,
            filename,
            location,
            status: DocumentStatus::PendingUpload,
            document_type: "unknown".to_string(),
            size_bytes: None,
            status_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey {
            document_id: self.document_id.clone(),
            version: self.version,
        }
    }
}

/// Field changes applied together with a status transition.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub document_type: Option<String>,
    pub size_bytes: Option<u64>,
    pub status_reason: Option<String>,
}

impl DocumentPatch {
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            status_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn apply(&self, document: &mut Document) {
        if let Some(document_type) = &self.document_type {
            document.document_type = document_type.clone();
        }
        if let Some(size) = self.size_bytes {
            document.size_bytes = Some(size);
        }
        document.status_reason = self.status_reason.clone();
    }
}

//
// ================= Processing request =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Compliance,
    Query,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Compliance => "compliance",
            TaskCategory::Query => "query",
        }
    }
}

impl FromStr for TaskCategory {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "compliance" => Ok(TaskCategory::Compliance),
            "query" => Ok(TaskCategory::Query),
            other => Err(OrchestrationError::Input(format!(
                "Unknown task category '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "processing" => Ok(RequestStatus::Processing),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            other => Err(OrchestrationError::Storage(format!(
                "Unknown request status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRequest {
    pub request_id: Uuid,
    pub tenant_id: TenantId,
    pub prompt: String,
    pub document_ids: Vec<DocumentId>,
    pub status: RequestStatus,
    #[serde(default)]
    pub intent: Option<TaskCategory>,
    #[serde(default)]
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl ProcessingRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

//
// ================= Extraction =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructuredFields {
    #[serde(default)]
    pub document_summary: String,
    #[serde(default)]
    pub key_financial_metrics: Map<String, Value>,
    #[serde(default)]
    pub entities: Map<String, Value>,
    #[serde(default)]
    pub tables_summary: String,
    #[serde(default)]
    pub compliance_relevant_data: Map<String, Value>,
}

/// Both shapes downstream consumers must handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractedPayload {
    Structured(StructuredFields),
    TextResponse { response: String },
}

impl ExtractedPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            ExtractedPayload::Structured(_) => "structured",
            ExtractedPayload::TextResponse { .. } => "text_response",
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            ExtractedPayload::Structured(fields) => &fields.document_summary,
            ExtractedPayload::TextResponse { response } => response,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedRecord {
    pub document_id: DocumentId,
    pub version: u32,
    pub tenant_id: TenantId,
    pub payload: ExtractedPayload,
    pub confidence: f32,
    /// Blob reference of the raw layout artifact
    pub source: String,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedRecord {
    /// Flattened view handed back by the data tools.
    pub fn to_tool_data(&self) -> Value {
        let (metrics, entities, compliance) = match &self.payload {
            ExtractedPayload::Structured(fields) => (
                Value::Object(fields.key_financial_metrics.clone()),
                Value::Object(fields.entities.clone()),
                Value::Object(fields.compliance_relevant_data.clone()),
            ),
            ExtractedPayload::TextResponse { .. } => (
                Value::Object(Map::new()),
                Value::Object(Map::new()),
                Value::Object(Map::new()),
            ),
        };

        serde_json::json!({
            "document_id": self.document_id,
            "version": self.version,
            "payload_type": self.payload.type_name(),
            "document_summary": self.payload.summary(),
            "financial_metrics": metrics,
            "entities": entities,
            "compliance_data": compliance,
            "confidence": self.confidence,
            "source": self.source,
            "extracted_at": self.extracted_at.to_rfc3339(),
        })
    }
}

//
// ================= Usage =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ProcessingRequests,
    UploadRequests,
    DocumentsValidated,
    DocumentsExtracted,
    ComplianceChecks,
    QaQueries,
    ToolInvocations,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ProcessingRequests => "processing_requests",
            OperationKind::UploadRequests => "upload_requests",
            OperationKind::DocumentsValidated => "documents_validated",
            OperationKind::DocumentsExtracted => "documents_extracted",
            OperationKind::ComplianceChecks => "compliance_checks",
            OperationKind::QaQueries => "qa_queries",
            OperationKind::ToolInvocations => "tool_invocations",
        }
    }

    /// Billable cost charged per unit of this operation.
    pub fn unit_cost(&self) -> f64 {
        match self {
            OperationKind::ComplianceChecks => 0.10,
            OperationKind::QaQueries => 0.05,
            _ => 0.0,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageKey {
    pub tenant_id: TenantId,
    pub date: NaiveDate,
    pub operation: OperationKind,
}

/// Accumulated count and cost behind one usage key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub count: u64,
    pub cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_rejects_blank() {
        assert!(TenantId::parse(None).is_err());
        assert!(TenantId::parse(Some("   ")).is_err());
        assert_eq!(TenantId::parse(Some(" acme ")).unwrap().as_str(), "acme");
    }

    #[test]
    fn test_tenant_id_rejects_key_separators() {
        for bad in ["a/b", "/acme", "acme/", "a\\b", "..", "."] {
            let err = TenantId::parse(Some(bad)).unwrap_err();
            assert!(err.to_string().contains("Invalid tenant identifier"), "{:?}", bad);
        }
        assert!(TenantId::parse(Some("acme-eu.1")).is_ok());
    }

    #[test]
    fn test_payload_serialization_tags() {
        let text = ExtractedPayload::TextResponse {
            response: "free text".to_string(),
        };
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json["type"], "text_response");

        let structured = ExtractedPayload::Structured(StructuredFields::default());
        let json = serde_json::to_value(&structured).unwrap();
        assert_eq!(json["type"], "structured");
    }

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            DocumentStatus::PendingUpload,
            DocumentStatus::Validated,
            DocumentStatus::Rejected,
            DocumentStatus::Extracting,
            DocumentStatus::Extracted,
            DocumentStatus::Ready,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
    }
}
