//! OCR / layout analysis stage

use crate::error::{OrchestrationError, UpstreamKind};
use crate::Result;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{error, info};

/// One element recognised on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "block_type", rename_all = "snake_case")]
pub enum LayoutBlock {
    Page {
        number: u32,
        #[serde(default)]
        confidence: Option<f32>,
    },
    Line {
        text: String,
        #[serde(default)]
        confidence: Option<f32>,
    },
    KeyValue {
        key: String,
        value: String,
        #[serde(default)]
        confidence: Option<f32>,
    },
    Table {
        rows: Vec<Vec<String>>,
        #[serde(default)]
        confidence: Option<f32>,
    },
}

impl LayoutBlock {
    pub fn confidence(&self) -> Option<f32> {
        match self {
            LayoutBlock::Page { confidence, .. }
            | LayoutBlock::Line { confidence, .. }
            | LayoutBlock::KeyValue { confidence, .. }
            | LayoutBlock::Table { confidence, .. } => *confidence,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutAnalysis {
    pub blocks: Vec<LayoutBlock>,
}

impl LayoutAnalysis {
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                LayoutBlock::Line { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn key_values(&self) -> Map<String, Value> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                LayoutBlock::KeyValue { key, value, .. } if !key.is_empty() && !value.is_empty() => {
                    Some((key.clone(), Value::String(value.clone())))
                }
                _ => None,
            })
            .collect()
    }

    pub fn table_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| matches!(b, LayoutBlock::Table { rows, .. } if !rows.is_empty()))
            .count()
    }

    pub fn page_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| matches!(b, LayoutBlock::Page { .. }))
            .count()
    }

    /// Mean of the confidences the service reported, if it reported any.
    pub fn mean_confidence(&self) -> Option<f32> {
        let scores: Vec<f32> = self
            .blocks
            .iter()
            .filter_map(LayoutBlock::confidence)
            .filter(|c| c.is_finite())
            .collect();

        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f32>() / scores.len() as f32)
        }
    }
}

/// Layout analysis over a blob reference.
#[async_trait::async_trait]
pub trait LayoutService: Send + Sync {
    async fn analyze(&self, document_ref: &str) -> Result<LayoutAnalysis>;
}

/// HTTP client for an external layout service.
pub struct HttpLayoutService {
    client: Client,
    base_url: String,
}

impl HttpLayoutService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

fn classify_status(status: StatusCode) -> UpstreamKind {
    match status {
        StatusCode::UNSUPPORTED_MEDIA_TYPE | StatusCode::UNPROCESSABLE_ENTITY => {
            UpstreamKind::UnsupportedFormat
        }
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => UpstreamKind::Timeout,
        _ => UpstreamKind::ServiceUnavailable,
    }
}

#[async_trait::async_trait]
impl LayoutService for HttpLayoutService {
    async fn analyze(&self, document_ref: &str) -> Result<LayoutAnalysis> {
        let url = format!("{}/analyze", self.base_url);
        info!(document_ref, "Requesting layout analysis");

        let response = self
            .client
            .post(url)
            .json(&json!({
                "document_ref": document_ref,
                "features": ["TABLES", "FORMS", "LAYOUT"],
            }))
            .send()
            .await
            .map_err(|e| {
                error!("Layout service request failed: {}", e);
                let kind = if e.is_timeout() {
                    UpstreamKind::Timeout
                } else {
                    UpstreamKind::ServiceUnavailable
                };
                OrchestrationError::upstream(kind, format!("Layout service unreachable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestrationError::upstream(
                classify_status(status),
                format!("Layout service returned {}", status),
            ));
        }

        response.json::<LayoutAnalysis>().await.map_err(|e| {
            OrchestrationError::upstream(
                UpstreamKind::UnsupportedFormat,
                format!("Invalid layout response: {}", e),
            )
        })
    }
}

type Analyzer = Box<dyn Fn(&str) -> Result<LayoutAnalysis> + Send + Sync>;

/// Mock layout service for development & testing
pub struct MockLayoutService {
    analyzer: Analyzer,
    calls: AtomicUsize,
    latency: Duration,
}

impl MockLayoutService {
    pub fn new<F>(analyzer: F) -> Self
    where
        F: Fn(&str) -> Result<LayoutAnalysis> + Send + Sync + 'static,
    {
        Self {
            analyzer: Box::new(analyzer),
            calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Suspend for `latency` before answering, like a slow upstream.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fixed(analysis: LayoutAnalysis) -> Self {
        Self::new(move |_| Ok(analysis.clone()))
    }

    pub fn failing(kind: UpstreamKind) -> Self {
        Self::new(move |_| Err(OrchestrationError::upstream(kind, "mock layout failure")))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LayoutService for MockLayoutService {
    async fn analyze(&self, document_ref: &str) -> Result<LayoutAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.analyzer)(document_ref)
    }
}
