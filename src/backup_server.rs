//! Companion backup service: accepts full chat history snapshots over HTTP and
//! keeps the latest one on disk.

use crate::history::HistoryDocument;
use crate::store::{write_atomic, HISTORY_FILE_NAME};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
struct ServerState {
    history_path: Arc<PathBuf>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Routes: `GET /test` and `POST /save-chat-history`. Snapshots land in `dir/chat_history.json`.
pub fn router(dir: PathBuf) -> Router {
    let state = ServerState {
        history_path: Arc::new(dir.join(HISTORY_FILE_NAME)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/test", get(health))
        .route("/save-chat-history", post(save_chat_history))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, dir: PathBuf) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Backup server running on http://{}", addr);
    }
    info!("Writing chat history backups to {}", dir.display());
    axum::serve(listener, router(dir)).await
}

async fn health() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "Server is running",
    })
}

async fn save_chat_history(
    State(state): State<ServerState>,
    Json(doc): Json<HistoryDocument>,
) -> Result<Json<SuccessResponse>, (StatusCode, Json<ErrorResponse>)> {
    let internal = |message: String| {
        error!("Error saving chat history: {}", message);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse { error: message }),
        )
    };

    let json = doc.to_json().map_err(|e| internal(e.to_string()))?;
    write_atomic(&state.history_path, json.as_bytes())
        .await
        .map_err(|e| internal(e.to_string()))?;

    info!(num_messages = doc.messages.len(), "Chat history backup stored");
    Ok(Json(SuccessResponse { success: true }))
}
