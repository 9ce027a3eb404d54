//! Postgres-backed metadata store
//!
//! Conditional writes are expressed as `UPDATE ... WHERE status = ANY($n)`;
//! zero affected rows means another worker won the race.

use super::{deny, MetadataStore, Scoped, WriteOutcome};
use crate::error::OrchestrationError;
use crate::lifecycle::check_transition;
use crate::models::{
    Document, DocumentId, DocumentKey, DocumentPatch, DocumentStatus, ExtractedRecord,
    ProcessingRequest, RequestStatus, TaskCategory, TenantId, UsageKey, UsageTotals,
};
use crate::Result;
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
      document_id TEXT NOT NULL,
      version INTEGER NOT NULL,
      tenant_id TEXT NOT NULL,
      filename TEXT NOT NULL,
      location TEXT NOT NULL,
      status TEXT NOT NULL,
      document_type TEXT NOT NULL,
      size_bytes BIGINT,
      status_reason TEXT,
      created_at TIMESTAMPTZ NOT NULL,
      updated_at TIMESTAMPTZ NOT NULL,
      PRIMARY KEY (document_id, version)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS extracted_records (
      document_id TEXT NOT NULL,
      version INTEGER NOT NULL,
      tenant_id TEXT NOT NULL,
      payload TEXT NOT NULL,
      confidence REAL NOT NULL,
      source TEXT NOT NULL,
      extracted_at TIMESTAMPTZ NOT NULL,
      PRIMARY KEY (document_id, version)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS processing_requests (
      request_id UUID PRIMARY KEY,
      tenant_id TEXT NOT NULL,
      prompt TEXT NOT NULL,
      document_ids TEXT NOT NULL,
      status TEXT NOT NULL,
      intent TEXT,
      result TEXT,
      created_at TIMESTAMPTZ NOT NULL,
      completed_at TIMESTAMPTZ,
      expires_at TIMESTAMPTZ NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS usage_counters (
      tenant_id TEXT NOT NULL,
      usage_date DATE NOT NULL,
      operation TEXT NOT NULL,
      count BIGINT NOT NULL,
      cost DOUBLE PRECISION NOT NULL DEFAULT 0,
      PRIMARY KEY (tenant_id, usage_date, operation)
    );
    "#,
    "ALTER TABLE usage_counters ADD COLUMN IF NOT EXISTS cost DOUBLE PRECISION NOT NULL DEFAULT 0;",
];

pub struct PgMetadataStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgMetadataStore {
    /// Pool connects lazily; the schema is created on first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)?;

        info!("Metadata store backend: postgres");

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                for statement in SCHEMA {
                    sqlx::query(statement).execute(&self.pool).await?;
                }
                debug!("Metadata schema ready");
                Ok::<(), sqlx::Error>(())
            })
            .await?;
        Ok(())
    }

    async fn owner_of_document(&self, key: &DocumentKey) -> Result<Option<String>> {
        let row = sqlx::query("SELECT tenant_id FROM documents WHERE document_id = $1 AND version = $2")
            .bind(key.document_id.as_str())
            .bind(key.version as i32)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Some(row.try_get("tenant_id")?),
            None => None,
        })
    }

    /// Distinguish a lost race from a missing or foreign document.
    async fn explain_miss(&self, tenant_id: &TenantId, key: &DocumentKey) -> Result<WriteOutcome> {
        match self.owner_of_document(key).await? {
            None => Err(OrchestrationError::NotFound(format!("Document {}", key))),
            Some(owner) if owner != tenant_id.as_str() => Err(deny(tenant_id, "document")),
            Some(_) => Ok(WriteOutcome::Conflict),
        }
    }
}

fn tenant_from_row(row: &PgRow) -> Result<TenantId> {
    let raw: String = row.try_get("tenant_id")?;
    TenantId::parse(Some(&raw))
        .map_err(|_| OrchestrationError::Storage("Row without tenant".to_string()))
}

fn document_from_row(row: &PgRow) -> Result<Document> {
    let status: String = row.try_get("status")?;
    let document_id: String = row.try_get("document_id")?;
    let version: i32 = row.try_get("version")?;
    let size_bytes: Option<i64> = row.try_get("size_bytes")?;

    Ok(Document {
        document_id: DocumentId::parse(&document_id)?,
        version: version.max(0) as u32,
        tenant_id: tenant_from_row(row)?,
        filename: row.try_get("filename")?,
        location: row.try_get("location")?,
        status: status.parse()?,
        document_type: row.try_get("document_type")?,
        size_bytes: size_bytes.map(|s| s.max(0) as u64),
        status_reason: row.try_get("status_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn record_from_row(row: &PgRow) -> Result<ExtractedRecord> {
    let document_id: String = row.try_get("document_id")?;
    let version: i32 = row.try_get("version")?;
    let payload: String = row.try_get("payload")?;

    Ok(ExtractedRecord {
        document_id: DocumentId::parse(&document_id)?,
        version: version.max(0) as u32,
        tenant_id: tenant_from_row(row)?,
        payload: serde_json::from_str(&payload)?,
        confidence: row.try_get("confidence")?,
        source: row.try_get("source")?,
        extracted_at: row.try_get("extracted_at")?,
    })
}

fn request_from_row(row: &PgRow) -> Result<ProcessingRequest> {
    let document_ids: String = row.try_get("document_ids")?;
    let status: String = row.try_get("status")?;
    let intent: Option<String> = row.try_get("intent")?;
    let result: Option<String> = row.try_get("result")?;

    Ok(ProcessingRequest {
        request_id: row.try_get("request_id")?,
        tenant_id: tenant_from_row(row)?,
        prompt: row.try_get("prompt")?,
        document_ids: serde_json::from_str(&document_ids)?,
        status: status.parse()?,
        intent: intent.map(|i| i.parse::<TaskCategory>()).transpose()?,
        result: result.map(|r| serde_json::from_str(&r)).transpose()?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn totals_from_row(row: &PgRow) -> Result<UsageTotals> {
    let count: i64 = row.try_get("count")?;
    Ok(UsageTotals {
        count: count.max(0) as u64,
        cost: row.try_get("cost")?,
    })
}

fn status_names(statuses: &[DocumentStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait::async_trait]
impl MetadataStore for PgMetadataStore {
    async fn insert_document(&self, document: &Document) -> Result<WriteOutcome> {
        self.ensure_schema().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO documents
              (document_id, version, tenant_id, filename, location, status, document_type,
               size_bytes, status_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (document_id, version) DO NOTHING
            "#,
        )
        .bind(document.document_id.as_str())
        .bind(document.version as i32)
        .bind(document.tenant_id.as_str())
        .bind(&document.filename)
        .bind(&document.location)
        .bind(document.status.as_str())
        .bind(&document.document_type)
        .bind(document.size_bytes.map(|s| s as i64))
        .bind(&document.status_reason)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::Conflict
        })
    }

    async fn lookup_document(
        &self,
        tenant_id: &TenantId,
        key: &DocumentKey,
    ) -> Result<Scoped<Document>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT * FROM documents WHERE document_id = $1 AND version = $2")
            .bind(key.document_id.as_str())
            .bind(key.version as i32)
            .fetch_optional(&self.pool)
            .await?;

        let document = row.as_ref().map(document_from_row).transpose()?;
        Ok(Scoped::from_owned(document, |d| &d.tenant_id == tenant_id))
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
        self.ensure_schema().await?;

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = $1,
                document_type = COALESCE($2, document_type),
                size_bytes = COALESCE($3, size_bytes),
                status_reason = $4,
                updated_at = $5
            WHERE document_id = $6 AND version = $7 AND tenant_id = $8
              AND status = ANY($9)
            "#,
        )
        .bind(next.as_str())
        .bind(&patch.document_type)
        .bind(patch.size_bytes.map(|s| s as i64))
        .bind(&patch.status_reason)
        .bind(Utc::now())
        .bind(key.document_id.as_str())
        .bind(key.version as i32)
        .bind(tenant_id.as_str())
        .bind(status_names(expected))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(WriteOutcome::Applied);
        }

        let outcome = self.explain_miss(tenant_id, key).await?;
        info!(document = %key, next = %next, "Conditional transition lost; treating as no-op");
        Ok(outcome)
    }

    async fn commit_extraction(&self, record: &ExtractedRecord) -> Result<WriteOutcome> {
        self.ensure_schema().await?;

        let key = DocumentKey {
            document_id: record.document_id.clone(),
            version: record.version,
        };
        let payload = serde_json::to_string(&record.payload)?;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'extracted', status_reason = NULL, updated_at = $1
            WHERE document_id = $2 AND version = $3 AND tenant_id = $4 AND status = 'extracting'
            "#,
        )
        .bind(Utc::now())
        .bind(key.document_id.as_str())
        .bind(key.version as i32)
        .bind(record.tenant_id.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return self.explain_miss(&record.tenant_id, &key).await;
        }

        sqlx::query(
            r#"
            INSERT INTO extracted_records
              (document_id, version, tenant_id, payload, confidence, source, extracted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (document_id, version) DO UPDATE
            SET payload = EXCLUDED.payload,
                confidence = EXCLUDED.confidence,
                source = EXCLUDED.source,
                extracted_at = EXCLUDED.extracted_at
            "#,
        )
        .bind(key.document_id.as_str())
        .bind(key.version as i32)
        .bind(record.tenant_id.as_str())
        .bind(payload)
        .bind(record.confidence)
        .bind(&record.source)
        .bind(record.extracted_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(WriteOutcome::Applied)
    }

    async fn lookup_record(
        &self,
        tenant_id: &TenantId,
        key: &DocumentKey,
    ) -> Result<Scoped<ExtractedRecord>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT * FROM extracted_records WHERE document_id = $1 AND version = $2",
        )
        .bind(key.document_id.as_str())
        .bind(key.version as i32)
        .fetch_optional(&self.pool)
        .await?;

        let record = row.as_ref().map(record_from_row).transpose()?;
        Ok(Scoped::from_owned(record, |r| &r.tenant_id == tenant_id))
    }

    async fn insert_request(&self, request: &ProcessingRequest) -> Result<WriteOutcome> {
        self.ensure_schema().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO processing_requests
              (request_id, tenant_id, prompt, document_ids, status, intent, result,
               created_at, completed_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(request.request_id)
        .bind(request.tenant_id.as_str())
        .bind(&request.prompt)
        .bind(serde_json::to_string(&request.document_ids)?)
        .bind(request.status.as_str())
        .bind(request.intent.map(|i| i.as_str()))
        .bind(request.result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(request.created_at)
        .bind(request.completed_at)
        .bind(request.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::Conflict
        })
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
        self.ensure_schema().await?;

        let updated = sqlx::query(
            r#"
            UPDATE processing_requests
            SET status = $1, intent = COALESCE($2, intent), result = $3, completed_at = $4
            WHERE request_id = $5 AND tenant_id = $6 AND status = 'processing'
            "#,
        )
        .bind(status.as_str())
        .bind(intent.map(|i| i.as_str()))
        .bind(serde_json::to_string(&result)?)
        .bind(Utc::now())
        .bind(request_id)
        .bind(tenant_id.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(WriteOutcome::Applied);
        }

        match self.lookup_request(tenant_id, request_id).await? {
            Scoped::Found(_) => Ok(WriteOutcome::Conflict),
            Scoped::Foreign => Err(deny(tenant_id, "request")),
            Scoped::Missing => Err(OrchestrationError::NotFound(format!(
                "Request {}",
                request_id
            ))),
        }
    }

    async fn lookup_request(
        &self,
        tenant_id: &TenantId,
        request_id: Uuid,
    ) -> Result<Scoped<ProcessingRequest>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT * FROM processing_requests WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;

        let request = row.as_ref().map(request_from_row).transpose()?;
        Ok(Scoped::from_owned(request, |r| &r.tenant_id == tenant_id))
    }

    async fn increment_usage(&self, key: &UsageKey, amount: u64, cost: f64) -> Result<UsageTotals> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO usage_counters (tenant_id, usage_date, operation, count, cost)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, usage_date, operation) DO UPDATE
            SET count = usage_counters.count + EXCLUDED.count,
                cost = usage_counters.cost + EXCLUDED.cost
            RETURNING count, cost
            "#,
        )
        .bind(key.tenant_id.as_str())
        .bind(key.date)
        .bind(key.operation.as_str())
        .bind(amount as i64)
        .bind(cost)
        .fetch_one(&self.pool)
        .await?;

        totals_from_row(&row)
    }

    async fn usage(&self, key: &UsageKey) -> Result<UsageTotals> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT count, cost FROM usage_counters WHERE tenant_id = $1 AND usage_date = $2 AND operation = $3",
        )
        .bind(key.tenant_id.as_str())
        .bind(key.date)
        .bind(key.operation.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(totals_from_row)
            .transpose()
            .map(Option::unwrap_or_default)
    }
}
