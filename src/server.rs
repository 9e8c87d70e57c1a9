use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, ResponseMode};
use crate::context::{CodeFile, ContextFiles, compose_user_message};
use crate::dispatch::CompletionRequest;
use crate::dispatch::http::HttpDispatch;
use crate::dispatch::stream::spawn_relay;
use crate::error::RelayError;
use crate::request::PromptRequest;
use crate::response::{ChatResponse, ContextResponse, HealthResponse};

pub const STREAM_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// State shared by every handler. Read-only after startup.
#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    pub dispatch: HttpDispatch,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, RelayError> {
        let dispatch = HttpDispatch::new(&config)?;
        Ok(Self { config, dispatch })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/context", post(context))
        // Pasted file context has no size ceiling.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

/// `POST /api/chat`. The body is taken raw so that an absent body and
/// malformed fields get the relay's own 400 messages.
async fn chat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match relay_chat(&state, &body).await {
        Ok(response) => response,
        Err(e) => e.into_http_response(state.config.environment.is_development()),
    }
}

async fn relay_chat(state: &AppState, body: &[u8]) -> Result<Response, RelayError> {
    let prompt = PromptRequest::from_body(body)?;
    let req = CompletionRequest::from_prompt(&state.config.model, prompt);

    tracing::info!(
        mode = ?state.config.response_mode,
        temperature = req.temperature,
        top_p = req.top_p,
        message_len = req.user_message.len(),
        "chat request"
    );

    match state.config.response_mode {
        ResponseMode::Streaming => {
            let deltas = state.dispatch.stream_completion(&req).await?;
            let body = Body::from_stream(spawn_relay(deltas));
            Ok(([(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)], body).into_response())
        }
        ResponseMode::Aggregating => {
            let response = state.dispatch.complete(&req).await?;
            Ok(Json(ChatResponse { response }).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContextRequest {
    #[serde(default)]
    files: Vec<CodeFile>,
    #[serde(default)]
    question: String,
}

/// `POST /api/context`: render the file context block for a set of files.
async fn context(body: Bytes) -> Result<Json<ContextResponse>, RelayError> {
    let req: ContextRequest = serde_json::from_slice(&body)
        .map_err(|e| RelayError::BadRequest(format!("invalid context request: {e}")))?;

    let mut files = ContextFiles::new();
    for file in req.files {
        files.add(file)?;
    }

    Ok(Json(ContextResponse {
        context: files.render(),
        user_message: compose_user_message(files.files(), &req.question),
    }))
}
