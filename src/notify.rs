//! Rejection notifications
//!
//! Delivery is fire-and-forget: a failed delivery is logged, never surfaced
//! to the pipeline that raised it.

use crate::models::{DocumentId, TenantId};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub reason: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log only.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        warn!(
            tenant_id = %notification.tenant_id,
            document_id = %notification.document_id,
            reason = %notification.reason,
            "Document rejected"
        );
    }
}

/// Posts notifications as JSON to a webhook on a background task.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self { client, url })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, notification: Notification) {
        let client = self.client.clone();
        let url = self.url.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&notification).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(document_id = %notification.document_id, "Rejection notification delivered");
                }
                Ok(response) => {
                    error!(
                        document_id = %notification.document_id,
                        status = %response.status(),
                        "Notification webhook refused delivery"
                    );
                }
                Err(e) => {
                    error!(
                        document_id = %notification.document_id,
                        error = %e,
                        "Notification delivery failed"
                    );
                }
            }
        });
    }
}

/// Keeps every notification in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
    }
}
