//! Runtime settings loaded from the environment

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Where extraction runs after a document validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    Inline,
    Queued,
}

impl FromStr for ExtractionMode {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "inline" => Ok(ExtractionMode::Inline),
            "queued" => Ok(ExtractionMode::Queued),
            other => Err(OrchestrationError::Input(format!(
                "EXTRACTION_MODE must be 'inline' or 'queued', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub max_upload_bytes: u64,
    pub upload_prefix: String,
    pub upload_handle_ttl: Duration,
    pub request_ttl: Duration,
    pub upstream_timeout: Duration,
    pub extraction_max_attempts: u32,
    pub default_extraction_confidence: f32,
    pub min_extraction_confidence: f32,
    pub extraction_mode: ExtractionMode,
    pub layout_service_url: Option<String>,
    pub gemini_api_key: Option<String>,
    pub notification_webhook_url: Option<String>,
    pub database_url: Option<String>,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024,
            upload_prefix: "uploads/".to_string(),
            upload_handle_ttl: Duration::from_secs(3600),
            request_ttl: Duration::from_secs(86_400),
            upstream_timeout: Duration::from_secs(300),
            extraction_max_attempts: 3,
            default_extraction_confidence: 0.8,
            min_extraction_confidence: 0.2,
            extraction_mode: ExtractionMode::Inline,
            layout_service_url: None,
            gemini_api_key: None,
            notification_webhook_url: None,
            database_url: None,
            port: 8080,
        }
    }
}

impl Settings {
    /// Read settings from the process environment (after `.env`).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build settings from any variable source; unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let settings = Self {
            max_upload_bytes: parse_var(&get, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            upload_prefix: get("UPLOAD_PREFIX").unwrap_or(defaults.upload_prefix),
            upload_handle_ttl: Duration::from_secs(parse_var(
                &get,
                "UPLOAD_HANDLE_TTL_SECS",
                defaults.upload_handle_ttl.as_secs(),
            )?),
            request_ttl: Duration::from_secs(parse_var(
                &get,
                "REQUEST_TTL_SECS",
                defaults.request_ttl.as_secs(),
            )?),
            upstream_timeout: Duration::from_secs(parse_var(
                &get,
                "UPSTREAM_TIMEOUT_SECS",
                defaults.upstream_timeout.as_secs(),
            )?),
            extraction_max_attempts: parse_var(
                &get,
                "EXTRACTION_MAX_ATTEMPTS",
                defaults.extraction_max_attempts,
            )?
            .max(1),
            default_extraction_confidence: parse_var(
                &get,
                "DEFAULT_EXTRACTION_CONFIDENCE",
                defaults.default_extraction_confidence,
            )?,
            min_extraction_confidence: parse_var(
                &get,
                "MIN_EXTRACTION_CONFIDENCE",
                defaults.min_extraction_confidence,
            )?,
            extraction_mode: match get("EXTRACTION_MODE") {
                Some(mode) => mode.parse()?,
                None => defaults.extraction_mode,
            },
            layout_service_url: get("LAYOUT_SERVICE_URL"),
            gemini_api_key: get("GEMINI_API_KEY"),
            notification_webhook_url: get("NOTIFICATION_WEBHOOK_URL"),
            database_url: get("DATABASE_URL").or_else(|| get("POSTGRES_URL")),
            port: match get("PORT") {
                Some(_) => parse_var(&get, "PORT", defaults.port)?,
                None => parse_var(&get, "API_PORT", defaults.port)?,
            },
        };

        Ok(settings)
    }
}

fn parse_var<T, G>(get: &G, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            OrchestrationError::Input(format!("{} is not a valid number: '{}'", name, raw))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.max_upload_bytes, 52_428_800);
        assert_eq!(s.upload_prefix, "uploads/");
        assert_eq!(s.upload_handle_ttl, Duration::from_secs(3600));
        assert_eq!(s.request_ttl, Duration::from_secs(86_400));
        assert_eq!(s.extraction_max_attempts, 3);
        assert_eq!(s.extraction_mode, ExtractionMode::Inline);
        assert_eq!(s.port, 8080);
        assert!(s.database_url.is_none());
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let s = settings(&[
            ("MAX_UPLOAD_BYTES", "1024"),
            ("EXTRACTION_MODE", "Queued"),
            ("POSTGRES_URL", "postgres://localhost/docs"),
            ("API_PORT", "9000"),
        ])
        .unwrap();

        assert_eq!(s.max_upload_bytes, 1024);
        assert_eq!(s.extraction_mode, ExtractionMode::Queued);
        assert_eq!(s.database_url.as_deref(), Some("postgres://localhost/docs"));
        assert_eq!(s.port, 9000);
    }

    #[test]
    fn test_malformed_number_names_variable() {
        let err = settings(&[("UPSTREAM_TIMEOUT_SECS", "five")]).unwrap_err();
        assert!(err.to_string().contains("UPSTREAM_TIMEOUT_SECS"));

        assert!(settings(&[("EXTRACTION_MODE", "batch")]).is_err());
    }
}
