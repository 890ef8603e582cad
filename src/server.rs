//! JSON HTTP API over the query pipeline.
//!
//! The Rust counterpart of a chat front end: `POST /query` runs one
//! question through the assistant and returns the full [`QueryReport`] —
//! final answer plus the anonymized query, the raw (still-anonymized)
//! model response, and the detected replacements — so clients can render
//! a "processing details" panel next to the answer.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Run a question through the pipeline |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::assistant::LegalAssistant;
use crate::models::{ConversationTurn, QueryReport};

#[derive(Clone)]
struct AppState {
    assistant: Arc<LegalAssistant>,
}

/// Request body for `POST /query`.
#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    /// Prior turns of this conversation, oldest first.
    #[serde(default)]
    history: Vec<ConversationTurn>,
}

/// Starts the query server on `bind` and serves until terminated.
pub async fn run_server(bind: &str, assistant: Arc<LegalAssistant>) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { assistant });

    println!("query server listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// JSON error response body.
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
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

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

/// Handler for `POST /query`.
///
/// Pipeline failures are reported inside the body (`status` field), not as
/// HTTP errors — only an empty question is rejected up front.
async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryReport>, AppError> {
    if request.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let report = state
        .assistant
        .process_query(&request.question, &request.history)
        .await;

    Ok(Json(report))
}
