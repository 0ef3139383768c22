//! JSON HTTP surface over the source registry.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness (returns version) |
//! | `GET`  | `/sources` | Health and metadata for every source |
//! | `POST` | `/tools/search` | Cross-source search |
//! | `POST` | `/tools/runbooks` | Runbooks for an alert |
//! | `GET`  | `/documents/{source}/{id}` | Direct document lookup |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "alert_type must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `rate_limited`
//! (429), `unavailable` (503), `timeout` (504), `upstream_error` (502).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::{RegistryError, SourceError};
use crate::models::{AlertContext, HealthCheck, SearchFilters, SearchResult, SourceMetadata};
use crate::registry::SourceRegistry;
use crate::runbook::RankedRunbook;

#[derive(Clone)]
struct AppState {
    registry: Arc<SourceRegistry>,
}

/// Build the router; exposed so tests can serve it on an ephemeral port.
pub fn router(registry: Arc<SourceRegistry>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sources", get(handle_sources))
        .route("/tools/search", post(handle_search))
        .route("/tools/runbooks", post(handle_runbooks))
        .route("/documents/{source}/{*id}", get(handle_get_document))
        .layer(cors)
        .with_state(AppState { registry })
}

/// Serve until the process is stopped. `bind` overrides `[server] bind`.
pub async fn run_server(
    config: &Config,
    registry: SourceRegistry,
    bind: Option<&str>,
) -> anyhow::Result<()> {
    let bind_addr = bind.unwrap_or(&config.server.bind).to_string();
    let app = router(Arc::new(registry));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, sources = config.sources.len(), "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match &err {
            RegistryError::Invalid(_) => bad_request(message),
            RegistryError::UnknownSource(_) => not_found(message),
            RegistryError::AllSourcesFailed { .. } => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
            }
            RegistryError::Source(SourceError::RateLimited { .. }) => {
                AppError::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", message)
            }
            RegistryError::Source(SourceError::Timeout(_)) => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
            RegistryError::Source(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", message)
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /sources ============

#[derive(Serialize)]
struct SourcesResponse {
    health: Vec<HealthCheck>,
    metadata: Vec<SourceMetadata>,
}

async fn handle_sources(State(state): State<AppState>) -> Json<SourcesResponse> {
    let (health, metadata) = tokio::join!(
        state.registry.health_check_all(),
        state.registry.metadata_all()
    );
    Json(SourcesResponse { health, metadata })
}

// ============ POST /tools/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(flatten)]
    filters: SearchFilters,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let results = state.registry.search(&req.query, &req.filters).await?;
    Ok(Json(SearchResponse { results }))
}

// ============ POST /tools/runbooks ============

#[derive(Serialize)]
struct RunbooksResponse {
    runbooks: Vec<RankedRunbook>,
}

async fn handle_runbooks(
    State(state): State<AppState>,
    Json(alert): Json<AlertContext>,
) -> Result<Json<RunbooksResponse>, AppError> {
    let runbooks = state.registry.search_runbooks(&alert).await?;
    Ok(Json(RunbooksResponse { runbooks }))
}

// ============ GET /documents/{source}/{id} ============

async fn handle_get_document(
    State(state): State<AppState>,
    Path((source, id)): Path<(String, String)>,
) -> Result<Json<SearchResult>, AppError> {
    match state.registry.get_document(&source, &id).await? {
        Some(doc) => Ok(Json(doc)),
        None => Err(not_found(format!("document not found: {}/{}", source, id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status_of(err: RegistryError) -> (StatusCode, &'static str) {
        let e = AppError::from(err);
        (e.status, e.code)
    }

    #[test]
    fn test_registry_error_mapping() {
        assert_eq!(
            status_of(RegistryError::UnknownSource("x".into())),
            (StatusCode::NOT_FOUND, "not_found")
        );
        assert_eq!(
            status_of(RegistryError::Invalid(
                crate::error::ValidationError::MaxAgeDays
            )),
            (StatusCode::BAD_REQUEST, "bad_request")
        );
        assert_eq!(
            status_of(RegistryError::AllSourcesFailed {
                count: 2,
                last: SourceError::Network("refused".into()),
            }),
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        );
        assert_eq!(
            status_of(RegistryError::Source(SourceError::RateLimited {
                kind: crate::error::QuotaKind::Upstream,
                retry_after: Duration::from_secs(5),
            })),
            (StatusCode::TOO_MANY_REQUESTS, "rate_limited")
        );
        assert_eq!(
            status_of(RegistryError::Source(SourceError::Auth("401".into()))),
            (StatusCode::BAD_GATEWAY, "upstream_error")
        );
    }
}
