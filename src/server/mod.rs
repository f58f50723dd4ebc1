//! HTTP and WebSocket surface.
pub mod protocol;
pub mod ws;

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::rag::RagPipeline;
use crate::session::SessionStore;

const CREATE_SESSION_ATTEMPTS: usize = 3;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub pipeline: Arc<RagPipeline>,
}

/// Error body in the `{"detail": ...}` shape clients expect.
struct ApiError(StatusCode, &'static str);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "detail": self.1 }))).into_response()
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o.trim() == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {o}");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/session", post(create_session))
        .route("/api/sessions/:id/history", get(session_history))
        .route("/api/sessions/:id", delete(clear_session))
        .route("/api/refresh", post(manual_refresh))
        .route("/ws/:id", get(websocket_handler))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// Serves until `shutdown` fires.
pub async fn serve(
    addr: &str,
    state: AppState,
    cors_origins: &[String],
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state, cors_origins))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "active",
        "message": "News RAG Chatbot API is running",
        "initialized": state.pipeline.state().initialized,
    }))
}

async fn create_session(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    for attempt in 1..=CREATE_SESSION_ATTEMPTS {
        let session_id = Uuid::new_v4().to_string();
        if state.sessions.create(&session_id).await {
            return Ok(Json(json!({ "session_id": session_id })));
        }
        warn!("Failed to create session on attempt {attempt}, retrying...");
    }

    error!("Failed to create session after {CREATE_SESSION_ATTEMPTS} attempts");
    Err(ApiError(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to create chat session",
    ))
}

async fn session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.sessions.exists(&session_id).await {
        info!("Session {session_id} not found, creating it");
        state.sessions.create(&session_id).await;
        return Ok(Json(json!({ "history": [] })));
    }

    match state.sessions.history(&session_id).await {
        Some(history) => {
            info!(
                "Retrieved history for session {session_id} with {} messages",
                history.len()
            );
            Ok(Json(json!({ "history": history })))
        }
        None => {
            warn!("Failed to get history for session: {session_id}");
            Err(ApiError(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get session history",
            ))
        }
    }
}

async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.sessions.clear(&session_id).await {
        warn!("Attempted to clear non-existent session: {session_id}");
        return Err(ApiError(StatusCode::NOT_FOUND, "Session not found"));
    }

    info!("Cleared history for session: {session_id}");
    Ok(Json(json!({ "status": "success", "message": "Session cleared" })))
}

async fn manual_refresh(State(state): State<AppState>) -> Json<Value> {
    info!("Manual article refresh triggered");
    if state.pipeline.refresh().await {
        Json(json!({ "status": "success", "message": "Articles refreshed successfully" }))
    } else {
        Json(json!({ "status": "error", "message": "Failed to refresh articles" }))
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let (sink, stream) = socket.split();
        protocol::serve_session(
            session_id,
            state.sessions,
            state.pipeline,
            ws::WsSender(sink),
            ws::WsReceiver(stream),
        )
    })
}
