use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use tokio_util::sync::CancellationToken;

use crate::models::{ChatCompletion, ChatRequest};
use crate::server::AppState;
use crate::server::error::ApiError;
use crate::server::sse::frame_stream;

/// POST /api/v1/chat/:kb_id
///
/// Validation errors come back as plain JSON errors; once the stream has
/// started, failures arrive as an `error` frame.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(kb_id): Path<String>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    let cancel = CancellationToken::new();

    let chat = state.chat.stream(&kb_id, request, cancel.clone()).await?;
    // The turn reports its own outcome through frames and logs.
    drop(chat.task);

    Ok(frame_stream(chat.frames, cancel))
}

/// POST /api/v1/chat/:kb_id/complete
pub async fn complete(
    State(state): State<Arc<AppState>>,
    Path(kb_id): Path<String>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatCompletion>, ApiError> {
    let Json(request) = body?;
    let message = state.chat.complete(&kb_id, request).await?;

    Ok(Json(ChatCompletion {
        response: message.content,
        sources: message.sources,
    }))
}
