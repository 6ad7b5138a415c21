//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Welcome message |
//! | `GET`  | `/health` | Health check (returns version and index state) |
//! | `POST` | `/search` | Hybrid search |
//! | `POST` | `/index/rebuild` | Re-read the corpus and swap in a new lexical index |
//! | `GET`  | `/index/status` | Lexical index state |
//!
//! `POST /search` takes `{"query": "...", "top_k": 5, "semantic_weight": 0.7,
//! "explain": false}` (all but `query` optional) and returns an array of
//! `{"id", "score", "payload", "source": "hybrid"}`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500). A failed request
//! never returns partial results.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use product_search_core::models::FusedResult;
use product_search_core::SearchError;

use crate::config::Config;
use crate::index::{BuildOutcome, IndexStatus};
use crate::search::{SearchQuery, SearchService};

#[derive(Clone)]
struct AppState {
    service: Arc<SearchService>,
}

/// Start the HTTP server on `[server].bind` and run until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(SearchService::open(config).await?);

    if config.lexical.warm_on_startup {
        match service.warm_index().await {
            Ok(outcome) => info!(?outcome, "lexical index warm-up finished"),
            Err(e) => warn!(error = %e, "lexical index warm-up failed; will retry on first search"),
        }
    }

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Product search listening on http://{}", bind_addr);

    axum::serve(listener, router(service)).await?;
    Ok(())
}

/// Routes over an existing service.
pub fn router(service: Arc<SearchService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/index/rebuild", post(handle_rebuild))
        .route("/index/status", get(handle_status))
        .layer(cors)
        .with_state(AppState { service })
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
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidRequest(msg) => bad_request(msg),
            other => {
                error!(error = %other, "search failed");
                internal(other.to_string())
            }
        }
    }
}

// ============ GET / ============

#[derive(Serialize)]
struct WelcomeResponse {
    message: &'static str,
}

async fn handle_root() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to the product search API",
    })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    index_ready: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        index_ready: state.service.index_status().ready,
    })
}

// ============ POST /search ============

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<SearchQuery>, JsonRejection>,
) -> Result<Json<Vec<FusedResult>>, AppError> {
    let Json(query) = body.map_err(|e| bad_request(e.body_text()))?;
    let response = state.service.search(&query).await?;
    Ok(Json(response.results))
}

// ============ /index ============

#[derive(Serialize)]
struct RebuildResponse {
    outcome: &'static str,
    status: IndexStatus,
}

async fn handle_rebuild(State(state): State<AppState>) -> Result<Json<RebuildResponse>, AppError> {
    let outcome = state.service.rebuild_index().await.map_err(|e| {
        error!(error = %e, "index rebuild failed");
        internal(format!("index rebuild failed: {}", e))
    })?;
    let outcome = match outcome {
        BuildOutcome::Built { .. } => "rebuilt",
        BuildOutcome::AlreadyReady => "unchanged",
        BuildOutcome::EmptyCorpus => "empty_corpus",
    };
    Ok(Json(RebuildResponse {
        outcome,
        status: state.service.index_status(),
    }))
}

async fn handle_status(State(state): State<AppState>) -> Json<IndexStatus> {
    Json(state.service.index_status())
}
