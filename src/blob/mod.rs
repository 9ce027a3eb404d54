//! Blob storage for raw uploads and extracted artifacts
//!
//! Uploads are written through short-lived, single-use handles scoped to
//! `uploads/{tenant}/{document_id}/{filename}`. Artifacts are stored under a
//! content hash so identical extraction output lands on the same key.

use crate::error::OrchestrationError;
use crate::models::{DocumentId, DocumentKey, TenantId};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Time-limited permission to write exactly one object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteHandle {
    pub token: String,
    pub key: String,
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub expires_at: DateTime<Utc>,
}

impl WriteHandle {
    pub fn expires_in_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// Object-creation signal handed to the validation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreated {
    pub key: String,
    pub size: u64,
}

/// Components of an upload key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPath {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub filename: String,
}

pub fn upload_key(prefix: &str, tenant_id: &TenantId, document_id: &DocumentId, filename: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        prefix.trim_end_matches('/'),
        tenant_id,
        document_id,
        filename
    )
}

/// Parse `{prefix}/{tenant}/{document_id}/{filename}`; anything else is not an upload.
pub fn parse_upload_key(prefix: &str, key: &str) -> Option<UploadPath> {
    let rest = key.strip_prefix(prefix.trim_end_matches('/'))?.strip_prefix('/')?;
    let mut parts = rest.splitn(3, '/');

    let tenant_id = TenantId::parse(parts.next()).ok()?;
    let document_id = DocumentId::parse(parts.next()?).ok()?;
    let filename = parts.next()?;

    if filename.is_empty() || filename.contains('/') {
        return None;
    }

    Some(UploadPath {
        tenant_id,
        document_id,
        filename: filename.to_string(),
    })
}

pub fn validate_filename(filename: &str) -> Result<()> {
    let trimmed = filename.trim();
    if trimmed.is_empty()
        || trimmed != filename
        || filename.contains('/')
        || filename.contains('\\')
        || filename == "."
        || filename == ".."
    {
        return Err(OrchestrationError::Input(format!(
            "Invalid filename '{}'",
            filename
        )));
    }
    Ok(())
}

/// Content-addressed artifact key for a document version.
pub fn artifact_key(tenant_id: &TenantId, key: &DocumentKey, body: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(body));
    format!(
        "processed/{}/{}/v{}/{}.json",
        tenant_id, key.document_id, key.version, digest
    )
}

/// Trait for blob persistence
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn issue_write_handle(
        &self,
        key: String,
        tenant_id: &TenantId,
        document_id: &DocumentId,
        ttl: Duration,
    ) -> Result<WriteHandle>;

    /// Consume the handle and store the body; emits the object-created signal.
    async fn write_with_handle(&self, token: &str, body: Vec<u8>) -> Result<ObjectCreated>;

    /// First `len` bytes (or fewer) of an object, for format sniffing.
    async fn read_prefix(&self, key: &str, len: usize) -> Result<Vec<u8>>;

    async fn put_artifact(
        &self,
        tenant_id: &TenantId,
        key: &DocumentKey,
        body: Vec<u8>,
    ) -> Result<String>;
}

/// In-memory blob store for development and tests
pub struct InMemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
    handles: Arc<RwLock<HashMap<String, WriteHandle>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            handles: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Test hook: place an object without a handle.
    pub async fn put_object(&self, key: &str, body: Vec<u8>) {
        self.objects
            .write()
            .await
            .insert(key.to_string(), Arc::new(body));
    }

    /// Drop handles that can no longer be redeemed.
    fn purge_expired(handles: &mut HashMap<String, WriteHandle>, now: DateTime<Utc>) {
        let before = handles.len();
        handles.retain(|_, handle| handle.expires_at > now);
        let purged = before - handles.len();
        if purged > 0 {
            debug!(purged, "Evicted expired write handles");
        }
    }

    async fn object(&self, key: &str) -> Result<Arc<Vec<u8>>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| OrchestrationError::NotFound(format!("Object {}", key)))
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn issue_write_handle(
        &self,
        key: String,
        tenant_id: &TenantId,
        document_id: &DocumentId,
        ttl: Duration,
    ) -> Result<WriteHandle> {
        let handle = WriteHandle {
            token: Uuid::new_v4().simple().to_string(),
            key,
            tenant_id: tenant_id.clone(),
            document_id: document_id.clone(),
            expires_at: Utc::now() + ttl,
        };

        let mut handles = self.handles.write().await;
        Self::purge_expired(&mut handles, Utc::now());
        handles.insert(handle.token.clone(), handle.clone());
        drop(handles);

        debug!(key = %handle.key, expires_at = %handle.expires_at, "Issued write handle");
        Ok(handle)
    }

    async fn write_with_handle(&self, token: &str, body: Vec<u8>) -> Result<ObjectCreated> {
        // Removing first makes the handle single-use even if the write below fails.
        let now = Utc::now();
        let handle = {
            let mut handles = self.handles.write().await;
            let handle = handles.remove(token);
            Self::purge_expired(&mut handles, now);
            handle.ok_or_else(|| OrchestrationError::NotFound("Upload handle".to_string()))?
        };

        if now >= handle.expires_at {
            warn!(key = %handle.key, "Rejected write with expired handle");
            return Err(OrchestrationError::Input(
                "Upload handle expired".to_string(),
            ));
        }

        let size = body.len() as u64;
        self.objects
            .write()
            .await
            .insert(handle.key.clone(), Arc::new(body));

        Ok(ObjectCreated {
            key: handle.key,
            size,
        })
    }

    async fn read_prefix(&self, key: &str, len: usize) -> Result<Vec<u8>> {
        let object = self.object(key).await?;
        Ok(object[..object.len().min(len)].to_vec())
    }

    async fn put_artifact(
        &self,
        tenant_id: &TenantId,
        key: &DocumentKey,
        body: Vec<u8>,
    ) -> Result<String> {
        let artifact = artifact_key(tenant_id, key, &body);
        self.objects
            .write()
            .await
            .insert(artifact.clone(), Arc::new(body));
        Ok(artifact)
    }
}
