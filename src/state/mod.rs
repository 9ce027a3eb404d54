//! Metadata persistence layer
//!
//! Durable records for documents, extracted data, processing requests and
//! usage counters. Every mutation is conditional on the prior state so that
//! concurrent duplicate triggers lose cleanly instead of overwriting.

pub mod postgres;

pub use postgres::PgMetadataStore;

use crate::error::OrchestrationError;
use crate::lifecycle::check_transition;
use crate::models::{
    Document, DocumentKey, DocumentPatch, DocumentStatus, ExtractedRecord, ProcessingRequest,
    RequestStatus, TaskCategory, TenantId, UsageKey, UsageTotals,
};
use crate::Result;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The record was not in the expected prior state; someone else won.
    Conflict,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Tenant-scoped lookup result. Foreign records never leave the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Scoped<T> {
    Found(T),
    Missing,
    Foreign,
}

impl<T> Scoped<T> {
    pub fn from_owned(value: Option<T>, owned_by: impl Fn(&T) -> bool) -> Self {
        match value {
            None => Scoped::Missing,
            Some(v) if owned_by(&v) => Scoped::Found(v),
            Some(_) => Scoped::Foreign,
        }
    }

    /// Collapse into the error taxonomy; foreign access is logged as a security event.
    pub fn require(self, tenant_id: &TenantId, what: &str) -> Result<T> {
        match self {
            Scoped::Found(v) => Ok(v),
            Scoped::Missing => Err(OrchestrationError::NotFound(what.to_string())),
            Scoped::Foreign => Err(deny(tenant_id, what)),
        }
    }
}

/// Access violations are logged on their own target.
pub fn deny(tenant_id: &TenantId, what: &str) -> OrchestrationError {
    warn!(
        target: "security",
        tenant_id = %tenant_id,
        resource = what,
        "Cross-tenant access denied"
    );
    OrchestrationError::access_denied()
}

/// Trait for metadata persistence
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create a document; conflicts if the key already exists.
    async fn insert_document(&self, document: &Document) -> Result<WriteOutcome>;

    async fn lookup_document(
        &self,
        tenant_id: &TenantId,
        key: &DocumentKey,
    ) -> Result<Scoped<Document>>;

    /// Move a document to `next` only if its status is one of `expected`.
    async fn transition_document(
        &self,
        tenant_id: &TenantId,
        key: &DocumentKey,
        expected: &[DocumentStatus],
        next: DocumentStatus,
        patch: &DocumentPatch,
    ) -> Result<WriteOutcome>;

    /// Store the record and move `extracting → extracted` as one operation.
    async fn commit_extraction(&self, record: &ExtractedRecord) -> Result<WriteOutcome>;

    async fn lookup_record(
        &self,
        tenant_id: &TenantId,
        key: &DocumentKey,
    ) -> Result<Scoped<ExtractedRecord>>;

    /// Create a request; conflicts if the id already exists.
    async fn insert_request(&self, request: &ProcessingRequest) -> Result<WriteOutcome>;

    /// Move a request out of `processing`; later attempts conflict.
    async fn complete_request(
        &self,
        tenant_id: &TenantId,
        request_id: Uuid,
        status: RequestStatus,
        intent: Option<TaskCategory>,
        result: Value,
    ) -> Result<WriteOutcome>;

    async fn lookup_request(
        &self,
        tenant_id: &TenantId,
        request_id: Uuid,
    ) -> Result<Scoped<ProcessingRequest>>;

    /// Atomically add `amount` and `cost`; returns the new totals.
    async fn increment_usage(&self, key: &UsageKey, amount: u64, cost: f64) -> Result<UsageTotals>;

    async fn usage(&self, key: &UsageKey) -> Result<UsageTotals>;
}

#[derive(Default)]
struct Tables {
    documents: HashMap<DocumentKey, Document>,
    records: HashMap<DocumentKey, ExtractedRecord>,
    requests: HashMap<Uuid, ProcessingRequest>,
    usage: HashMap<UsageKey, UsageTotals>,
}

/// In-memory metadata store for development and tests.
///
/// A single lock guards all tables so multi-record commits stay atomic.
pub struct InMemoryMetadataStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert_document(&self, document: &Document) -> Result<WriteOutcome> {
        let mut tables = self.tables.write().await;
        let key = document.key();

        if tables.documents.contains_key(&key) {
            return Ok(WriteOutcome::Conflict);
        }

        tables.documents.insert(key, document.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn lookup_document(
        &self,
        tenant_id: &TenantId,
        key: &DocumentKey,
    ) -> Result<Scoped<Document>> {
        let tables = self.tables.read().await;
        Ok(Scoped::from_owned(tables.documents.get(key).cloned(), |d| {
            &d.tenant_id == tenant_id
        }))
    }

    async fn transition_document(
        &self,
        tenant_id: &TenantId,
        key: &DocumentKey,
        expected: &[DocumentStatus],
        next: DocumentStatus,
        patch: &DocumentPatch,
    ) -> Result<WriteOutcome> {
        check_transition(expected, next)?;

        let mut tables = self.tables.write().await;
        let document = match tables.documents.get_mut(key) {
            Some(d) if &d.tenant_id == tenant_id => d,
            Some(_) => return Err(deny(tenant_id, "document")),
            None => return Err(OrchestrationError::NotFound(format!("Document {}", key))),
        };

        if !expected.contains(&document.status) {
            info!(
                document = %key,
                current = %document.status,
                next = %next,
                "Conditional transition lost; treating as no-op"
            );
            return Ok(WriteOutcome::Conflict);
        }

        document.status = next;
        document.updated_at = Utc::now();
        patch.apply(document);

        Ok(WriteOutcome::Applied)
    }

    async fn commit_extraction(&self, record: &ExtractedRecord) -> Result<WriteOutcome> {
        let key = DocumentKey {
            document_id: record.document_id.clone(),
            version: record.version,
        };

        let mut tables = self.tables.write().await;
        let document = match tables.documents.get_mut(&key) {
            Some(d) if d.tenant_id == record.tenant_id => d,
            Some(_) => return Err(deny(&record.tenant_id, "document")),
            None => return Err(OrchestrationError::NotFound(format!("Document {}", key))),
        };

        if document.status != DocumentStatus::Extracting {
            return Ok(WriteOutcome::Conflict);
        }

        document.status = DocumentStatus::Extracted;
        document.status_reason = None;
        document.updated_at = Utc::now();
        tables.records.insert(key, record.clone());

        Ok(WriteOutcome::Applied)
    }

    async fn lookup_record(
        &self,
        tenant_id: &TenantId,
        key: &DocumentKey,
    ) -> Result<Scoped<ExtractedRecord>> {
        let tables = self.tables.read().await;
        Ok(Scoped::from_owned(tables.records.get(key).cloned(), |r| {
            &r.tenant_id == tenant_id
        }))
    }

    async fn insert_request(&self, request: &ProcessingRequest) -> Result<WriteOutcome> {
        let mut tables = self.tables.write().await;

        if tables.requests.contains_key(&request.request_id) {
            return Ok(WriteOutcome::Conflict);
        }

        tables.requests.insert(request.request_id, request.clone());
        Ok(WriteOutcome::Applied)
    }

    async fn complete_request(
        &self,
        tenant_id: &TenantId,
        request_id: Uuid,
        status: RequestStatus,
        intent: Option<TaskCategory>,
        result: Value,
    ) -> Result<WriteOutcome> {
        if status == RequestStatus::Processing {
            return Err(OrchestrationError::Storage(
                "A request can only be completed or failed".to_string(),
            ));
        }

        let mut tables = self.tables.write().await;
        let request = match tables.requests.get_mut(&request_id) {
            Some(r) if &r.tenant_id == tenant_id => r,
            Some(_) => return Err(deny(tenant_id, "request")),
            None => {
                return Err(OrchestrationError::NotFound(format!(
                    "Request {}",
                    request_id
                )))
            }
        };

        if request.status != RequestStatus::Processing {
            return Ok(WriteOutcome::Conflict);
        }

        request.status = status;
        request.intent = intent.or(request.intent);
        request.result = Some(result);
        request.completed_at = Some(Utc::now());

        Ok(WriteOutcome::Applied)
    }

    async fn lookup_request(
        &self,
        tenant_id: &TenantId,
        request_id: Uuid,
    ) -> Result<Scoped<ProcessingRequest>> {
        let tables = self.tables.read().await;
        Ok(Scoped::from_owned(
            tables.requests.get(&request_id).cloned(),
            |r| &r.tenant_id == tenant_id,
        ))
    }

    async fn increment_usage(&self, key: &UsageKey, amount: u64, cost: f64) -> Result<UsageTotals> {
        let mut tables = self.tables.write().await;
        let totals = tables.usage.entry(key.clone()).or_default();
        totals.count += amount;
        totals.cost += cost;
        Ok(*totals)
    }

    async fn usage(&self, key: &UsageKey) -> Result<UsageTotals> {
        let tables = self.tables.read().await;
        Ok(tables.usage.get(key).copied().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentId, ExtractedPayload, OperationKind, StructuredFields};

    fn tenant(name: &str) -> TenantId {
        TenantId::parse(Some(name)).unwrap()
    }

    async fn seeded(store: &InMemoryMetadataStore, owner: &str) -> Document {
        let document = Document::pending(
            tenant(owner),
            DocumentId::parse("doc1").unwrap(),
            "report.pdf".to_string(),
            format!("uploads/{}/doc1/report.pdf", owner),
        );
        assert_eq!(
            store.insert_document(&document).await.unwrap(),
            WriteOutcome::Applied
        );
        document
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let store = InMemoryMetadataStore::new();
        let document = seeded(&store, "A").await;
        assert_eq!(
            store.insert_document(&document).await.unwrap(),
            WriteOutcome::Conflict
        );
    }

    #[tokio::test]
    async fn test_lookup_is_tenant_scoped() {
        let store = InMemoryMetadataStore::new();
        let document = seeded(&store, "A").await;

        let own = store.lookup_document(&tenant("A"), &document.key()).await.unwrap();
        assert!(matches!(own, Scoped::Found(_)));

        let foreign = store.lookup_document(&tenant("B"), &document.key()).await.unwrap();
        assert!(matches!(foreign, Scoped::Foreign));

        let err = foreign.require(&tenant("B"), "document").unwrap_err();
        assert_eq!(err.to_string(), "Access denied");
    }

    #[tokio::test]
    async fn test_conditional_transition() {
        let store = InMemoryMetadataStore::new();
        let document = seeded(&store, "A").await;
        let key = document.key();

        let first = store
            .transition_document(
                &tenant("A"),
                &key,
                &[DocumentStatus::PendingUpload],
                DocumentStatus::Validated,
                &DocumentPatch::default(),
            )
            .await
            .unwrap();
        let second = store
            .transition_document(
                &tenant("A"),
                &key,
                &[DocumentStatus::PendingUpload],
                DocumentStatus::Rejected,
                &DocumentPatch::reason("too large"),
            )
            .await
            .unwrap();

        assert_eq!(first, WriteOutcome::Applied);
        assert_eq!(second, WriteOutcome::Conflict);

        let Scoped::Found(current) = store.lookup_document(&tenant("A"), &key).await.unwrap() else {
            panic!("document missing");
        };
        assert_eq!(current.status, DocumentStatus::Validated);
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let store = InMemoryMetadataStore::new();
        let document = seeded(&store, "A").await;

        let result = store
            .transition_document(
                &tenant("A"),
                &document.key(),
                &[DocumentStatus::Rejected],
                DocumentStatus::Validated,
                &DocumentPatch::default(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_commit_extraction_requires_extracting() {
        let store = InMemoryMetadataStore::new();
        let document = seeded(&store, "A").await;
        let record = ExtractedRecord {
            document_id: document.document_id.clone(),
            version: 1,
            tenant_id: tenant("A"),
            payload: ExtractedPayload::Structured(StructuredFields::default()),
            confidence: 0.8,
            source: "processed/A/doc1/v1/raw.json".to_string(),
            extracted_at: Utc::now(),
        };

        assert_eq!(
            store.commit_extraction(&record).await.unwrap(),
            WriteOutcome::Conflict
        );

        for (from, to) in [
            (DocumentStatus::PendingUpload, DocumentStatus::Validated),
            (DocumentStatus::Validated, DocumentStatus::Extracting),
        ] {
            store
                .transition_document(&tenant("A"), &document.key(), &[from], to, &DocumentPatch::default())
                .await
                .unwrap();
        }

        assert_eq!(
            store.commit_extraction(&record).await.unwrap(),
            WriteOutcome::Applied
        );
        assert_eq!(
            store.commit_extraction(&record).await.unwrap(),
            WriteOutcome::Conflict
        );
    }

    #[tokio::test]
    async fn test_usage_increments() {
        let store = InMemoryMetadataStore::new();
        let key = UsageKey {
            tenant_id: tenant("A"),
            date: Utc::now().date_naive(),
            operation: OperationKind::QaQueries,
        };

        assert_eq!(store.usage(&key).await.unwrap(), UsageTotals::default());
        store.increment_usage(&key, 1, 0.05).await.unwrap();
        let totals = store.increment_usage(&key, 2, 0.10).await.unwrap();
        assert_eq!(totals.count, 3);
        assert!((totals.cost - 0.15).abs() < 1e-9);
    }
}
