use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::models::{CleanupReport, KnowledgeBase, KnowledgeBaseDetail, KnowledgeBaseSummary};
use crate::server::AppState;
use crate::server::error::ApiError;

#[derive(Debug, Serialize)]
pub struct KnowledgeBaseList {
    pub knowledge_bases: Vec<KnowledgeBaseSummary>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

/// GET /api/v1/kb
pub async fn list(State(state): State<Arc<AppState>>) -> Json<KnowledgeBaseList> {
    let knowledge_bases = state
        .kbs
        .list()
        .await
        .iter()
        .map(KnowledgeBaseSummary::from)
        .collect();
    Json(KnowledgeBaseList { knowledge_bases })
}

/// GET /api/v1/kb/:kb_id
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(kb_id): Path<String>,
) -> Result<Json<KnowledgeBaseDetail>, ApiError> {
    Ok(Json(state.kbs.detail(&kb_id).await?))
}

/// PUT /api/v1/kb/:kb_id
pub async fn rename(
    State(state): State<Arc<AppState>>,
    Path(kb_id): Path<String>,
    body: Result<Json<RenameRequest>, JsonRejection>,
) -> Result<Json<KnowledgeBase>, ApiError> {
    let Json(request) = body?;
    Ok(Json(state.kbs.rename(&kb_id, &request.name).await?))
}

/// DELETE /api/v1/kb/:kb_id
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(kb_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.kbs.delete(&kb_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/kb/cleanup
pub async fn cleanup(State(state): State<Arc<AppState>>) -> Result<Json<CleanupReport>, ApiError> {
    Ok(Json(state.kbs.cleanup_orphans().await?))
}
