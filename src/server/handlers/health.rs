use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};

use crate::server::AppState;

/// Result of probing one dependency.
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentStatus {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                status: "healthy",
                detail: None,
            },
            Err(e) => Self {
                status: "unhealthy",
                detail: Some(e.to_string()),
            },
        }
    }

    fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /health/detailed
pub async fn detailed(State(state): State<Arc<AppState>>) -> Json<Value> {
    let vector_store = ComponentStatus::from_result(match state.store.health_check().await {
        Ok(true) => Ok(()),
        Ok(false) => Err("vector store did not answer".to_string()),
        Err(e) => Err(e.to_string()),
    });
    let upload_directory = ComponentStatus::from_result(state.files.check_writable().await);
    let embedding_service = ComponentStatus::from_result(state.embedder.health_check().await);
    let language_model = ComponentStatus::from_result(state.model.health_check().await);

    let healthy = [
        &vector_store,
        &upload_directory,
        &embedding_service,
        &language_model,
    ]
    .iter()
    .all(|c| c.is_healthy());

    let config = &state.config;
    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
        "components": {
            "vector_store": vector_store,
            "upload_directory": upload_directory,
            "embedding_service": embedding_service,
            "language_model": language_model,
        },
        "configuration": {
            "embedding_model": config.embedding.model,
            "embedding_provider": config.embedding.provider.to_string(),
            "llm_model": state.model.model(),
            "vector_store_driver": state.store.driver().to_string(),
            "chunk_size": config.ingestion.chunk_size,
            "chunk_overlap": config.ingestion.chunk_overlap,
            "top_k": config.chat.top_k,
            "allowed_extensions": config.ingestion.allowed_extensions,
            "max_file_size": config.ingestion.max_file_size,
            "knowledge_bases": state.kbs.count().await,
            "uptime_secs": state.started_at.elapsed().as_secs(),
        },
    }))
}
