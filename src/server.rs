//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Answer a question (`{question, session_id?}`) |
//! | `POST` | `/sync` | Rescan the vault now |
//! | `POST` | `/teach` | Explanation scaffold plus matching notes |
//! | `POST` | `/quiz` | Recall question, or feedback on an answer |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `/ask` always answers `200`; pipeline failures are already folded into
//! the answer text. The other endpoints report failures as
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "topic must not be empty" } }
//! ```
//!
//! with codes `bad_request` (400) and `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser UI can
//! call the API from its own dev server.

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
use tower_http::trace::TraceLayer;

use crate::models::{AskResponse, SyncInfo};
use crate::pipeline::Assistant;
use crate::study::{QuizResponse, TeachResponse};

/// Shared state handed to every handler.
#[derive(Clone)]
struct AppState {
    assistant: Arc<Assistant>,
}

/// Build the router. Exposed separately from [`run_server`] so tests can
/// serve it on an ephemeral port.
pub fn router(assistant: Arc<Assistant>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(handle_ask))
        .route("/sync", post(handle_sync))
        .route("/teach", post(handle_teach))
        .route("/quiz", post(handle_quiz))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { assistant })
}

/// Bind to `[server].bind` and serve until the process is stopped.
pub async fn run_server(assistant: Arc<Assistant>) -> anyhow::Result<()> {
    let bind_addr = assistant.config().server.bind.clone();
    let app = router(assistant);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", bind_addr);
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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: format!("{:#}", err),
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

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    session_id: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Json<AskResponse> {
    let response = state
        .assistant
        .ask(&req.question, req.session_id.as_deref())
        .await;
    Json(response)
}

// ============ POST /sync ============

async fn handle_sync(State(state): State<AppState>) -> Result<Json<SyncInfo>, AppError> {
    Ok(Json(state.assistant.sync().await?))
}

// ============ POST /teach ============

#[derive(Deserialize)]
struct TeachRequest {
    question: String,
}

async fn handle_teach(
    State(state): State<AppState>,
    Json(req): Json<TeachRequest>,
) -> Result<Json<TeachResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    Ok(Json(state.assistant.teach(question).await?))
}

// ============ POST /quiz ============

#[derive(Deserialize)]
struct QuizRequest {
    topic: String,
    #[serde(default)]
    answer: Option<String>,
}

async fn handle_quiz(
    State(state): State<AppState>,
    Json(req): Json<QuizRequest>,
) -> Result<Json<QuizResponse>, AppError> {
    if req.topic.trim().is_empty() {
        return Err(bad_request("topic must not be empty"));
    }
    Ok(Json(
        state
            .assistant
            .quiz(&req.topic, req.answer.as_deref())
            .await?,
    ))
}
