//! Language model access
//!
//! The rest of the crate talks to a `LanguageModel`; `GeminiClient` is the
//! production implementation and uses a long-lived reqwest::Client for
//! connection pooling.

use crate::error::{OrchestrationError, UpstreamKind};
use crate::Result;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

/// Text-in, text-out model used for reformatting, planning and answering.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

/// Strip a markdown code fence the model may wrap around JSON.
pub fn strip_code_fence(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
        })
    }
}

#[async_trait::async_trait]
impl LanguageModel for GeminiClient {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::upstream(
                UpstreamKind::ServiceUnavailable,
                "GEMINI_API_KEY not configured",
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: max_tokens,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_PROMPT.to_string(),
                }],
            },
        };

        info!(max_tokens, "Calling Gemini API");

        let response = self.client.post(&url).json(&request).send().await.map_err(|e| {
            error!("Gemini API request failed: {}", e);
            if e.is_timeout() {
                OrchestrationError::upstream(UpstreamKind::Timeout, "Gemini request timed out")
            } else {
                OrchestrationError::upstream(
                    UpstreamKind::ServiceUnavailable,
                    format!("Gemini API error: {}", e),
                )
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            let kind = if status == StatusCode::BAD_REQUEST {
                UpstreamKind::UnsupportedFormat
            } else {
                UpstreamKind::ServiceUnavailable
            };
            return Err(OrchestrationError::upstream(
                kind,
                format!("Gemini API returned {}", status),
            ));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::upstream(
                UpstreamKind::ServiceUnavailable,
                format!("Gemini parse error: {}", e),
            )
        })?;

        let candidate = gemini_response.candidates.into_iter().next();
        let finish_reason = candidate.as_ref().and_then(|c| c.finish_reason.clone());
        let answer = candidate
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| {
                OrchestrationError::upstream(
                    UpstreamKind::ServiceUnavailable,
                    "Empty response from Gemini",
                )
            })?;

        if finish_reason.as_deref() == Some("MAX_TOKENS") {
            warn!(max_tokens, "Gemini response truncated at token limit");
        }
        info!(finish_reason = ?finish_reason, chars = answer.len(), "Gemini response received");

        Ok(answer)
    }
}

const SYSTEM_PROMPT: &str = r#"You are a financial document analysis engine.

Guidelines:
- Base every statement on the supplied document data
- Keep numbers exact and unformatted unless asked otherwise
- When JSON is requested, return only valid JSON with no commentary"#;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Mock model for development & testing; answers through a closure.
pub struct MockLanguageModel {
    responder: Responder,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same text.
    pub fn fixed(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_| Ok(reply.clone()))
    }

    /// Always fail with the given upstream kind.
    pub fn failing(kind: UpstreamKind) -> Self {
        Self::new(move |_| Err(OrchestrationError::upstream(kind, "mock model failure")))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        (self.responder)(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "Summarise the balance sheet".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_PROMPT.to_string(),
                }],
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
        assert!(json.to_string().contains("Summarise the balance sheet"));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  plain  "), "plain");
    }

    #[test]
    fn test_response_parsing() {
        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "ok"}]},
                "finishReason": "MAX_TOKENS"
            }]
        }))
        .unwrap();
        let candidate = &response.candidates[0];
        assert_eq!(candidate.content.parts[0].text, "ok");
        assert_eq!(candidate.finish_reason.as_deref(), Some("MAX_TOKENS"));

        let empty: GeminiResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(empty.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_upstream_error() {
        let client = GeminiClient::new(String::new(), Duration::from_secs(1)).unwrap();
        let err = client.complete("hi", 10).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UpstreamError);
    }

    #[tokio::test]
    async fn test_mock_records_prompts() {
        let model = MockLanguageModel::fixed("compliance");
        assert_eq!(model.complete("classify this", 5).await.unwrap(), "compliance");
        assert_eq!(model.calls(), 1);
        assert_eq!(model.prompts(), vec!["classify this".to_string()]);
    }
}
