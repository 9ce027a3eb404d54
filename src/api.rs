//! REST API for the document orchestrator
//!
//! Thin axum layer over the service bundle. The caller's tenant comes from
//! the `x-tenant-id` header; error kinds map onto HTTP status codes.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::{ErrorKind, OrchestrationError, UpstreamKind};
use crate::models::{DocumentId, TenantId};
use crate::services::Services;
use crate::state::WriteOutcome;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub prompt: String,
    #[serde(default)]
    pub document_ids: Vec<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            error_kind: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(error: &OrchestrationError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type Reply = (StatusCode, Json<ApiResponse>);

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InputError => StatusCode::BAD_REQUEST,
        ErrorKind::AccessError => StatusCode::FORBIDDEN,
        ErrorKind::NotFoundError => StatusCode::NOT_FOUND,
        ErrorKind::EvaluationError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::UpstreamError => StatusCode::BAD_GATEWAY,
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(error: OrchestrationError) -> Reply {
    let status = match &error {
        OrchestrationError::Upstream {
            kind: UpstreamKind::Timeout,
            ..
        } => StatusCode::GATEWAY_TIMEOUT,
        other => status_for(other.kind()),
    };
    (status, Json(ApiResponse::error(&error)))
}

fn reply<T: Serialize>(result: crate::Result<T>) -> Reply {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => failure(e),
    }
}

fn tenant(headers: &HeaderMap) -> crate::Result<TenantId> {
    TenantId::parse(headers.get(TENANT_HEADER).and_then(|v| v.to_str().ok()))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub services: Services,
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn request_upload(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<UploadRequest>,
) -> Reply {
    reply(async {
        let tenant_id = tenant(&headers)?;
        state.services.uploads.request_upload(&tenant_id, &req.filename).await
    }
    .await)
}

async fn complete_upload(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    body: Bytes,
) -> Reply {
    info!(bytes = body.len(), "Upload body received");
    reply(state.services.uploads.complete_upload(&token, body.to_vec()).await)
}

async fn process(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<ProcessRequest>,
) -> Reply {
    reply(async {
        let tenant_id = tenant(&headers)?;
        let document_ids = req
            .document_ids
            .iter()
            .map(|id| DocumentId::parse(id))
            .collect::<crate::Result<Vec<_>>>()?;

        state
            .services
            .supervisor
            .route(&tenant_id, &req.prompt, &document_ids)
            .await
    }
    .await)
}

async fn request_status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> Reply {
    reply(async {
        let tenant_id = tenant(&headers)?;
        let request_id = Uuid::parse_str(&request_id).map_err(|_| {
            OrchestrationError::Input(format!("Malformed request id '{}'", request_id))
        })?;
        state.services.supervisor.status(&tenant_id, request_id).await
    }
    .await)
}

async fn list_tools(State(state): State<ApiState>) -> Reply {
    reply(Ok(state.services.tools.catalog()))
}

/// Returns the bare `ToolResponse`; the status code follows its error kind.
async fn invoke_tool(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(function): Path<String>,
    Json(args): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let tenant_id = match tenant(&headers) {
        Ok(t) => t,
        Err(e) => {
            let response = crate::tools::ToolResponse::failed(&function, &e);
            return (
                status_for(e.kind()),
                Json(serde_json::to_value(response).unwrap_or_default()),
            );
        }
    };

    let response = state.services.tools.invoke(&function, &tenant_id, &args).await;
    let status = response.error_kind.map(status_for).unwrap_or(StatusCode::OK);
    (status, Json(serde_json::to_value(response).unwrap_or_default()))
}

async fn mark_ready(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(document_id): Path<String>,
) -> Reply {
    reply(async {
        let tenant_id = tenant(&headers)?;
        let document_id = DocumentId::parse(&document_id)?;
        let outcome = state.services.pipeline.mark_ready(&tenant_id, &document_id).await?;

        Ok::<_, OrchestrationError>(serde_json::json!({
            "document_id": document_id,
            "status": "ready",
            "applied": outcome == WriteOutcome::Applied,
        }))
    }
    .await)
}

/// =============================
/// Router
/// =============================

/// Upload bodies up to this multiple of the size limit reach the pipeline
/// and are rejected there as "too large".
const UPLOAD_BODY_FACTOR: u64 = 4;

pub fn create_router(services: Services, max_upload_bytes: u64) -> Router {
    let body_limit = usize::try_from(max_upload_bytes.saturating_mul(UPLOAD_BODY_FACTOR))
        .unwrap_or(usize::MAX);
    let state = ApiState { services };

    Router::new()
        .route("/health", get(health))
        .route("/api/upload", post(request_upload))
        .route(
            "/api/upload/:token",
            put(complete_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/process", post(process))
        .route("/api/status/:request_id", get(request_status))
        .route("/api/tools", get(list_tools))
        .route("/api/tools/:function", post(invoke_tool))
        .route("/api/documents/:document_id/ready", post(mark_ready))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    services: Services,
    max_upload_bytes: u64,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(services, max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::InputError), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::AccessError), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::EvaluationError), StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = failure(OrchestrationError::upstream(UpstreamKind::Timeout, "layout"));
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

        let (status, Json(body)) = failure(OrchestrationError::upstream(
            UpstreamKind::ServiceUnavailable,
            "layout",
        ));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.error_kind, Some(ErrorKind::UpstreamError));
    }

    #[test]
    fn test_missing_tenant_header() {
        let err = tenant(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputError);
    }
}
