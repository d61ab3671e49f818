use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::error::{ChatError, KnowledgeBaseError};
use crate::models::BatchReport;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("ingestion failed: {message}")]
    IngestionFailed {
        message: String,
        report: BatchReport,
    },
    #[error("upstream error: {0}")]
    BadGateway(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::IngestionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }

        let body = match self {
            ApiError::IngestionFailed { message, report } => {
                json!({ "error": message, "per_file_status": report })
            }
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::BadGateway(msg)
            | ApiError::ServiceUnavailable(msg)
            | ApiError::Internal(msg) => json!({ "error": msg }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<KnowledgeBaseError> for ApiError {
    fn from(err: KnowledgeBaseError) -> Self {
        let message = err.to_string();
        match err {
            KnowledgeBaseError::NotFound(_) => ApiError::NotFound(message),
            KnowledgeBaseError::InvalidName(_)
            | KnowledgeBaseError::EmptyBatch
            | KnowledgeBaseError::MissingFileName
            | KnowledgeBaseError::DuplicateFileName(_) => ApiError::BadRequest(message),
            KnowledgeBaseError::FileTooLarge { .. } => ApiError::PayloadTooLarge(message),
            KnowledgeBaseError::IngestionFailed(report) => ApiError::IngestionFailed {
                message: format!("{message}: {}", report.summary()),
                report,
            },
            KnowledgeBaseError::VectorStore(_) | KnowledgeBaseError::Storage(_) => {
                ApiError::Internal(message)
            }
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let message = err.to_string();
        match err {
            ChatError::NotFound(_) => ApiError::NotFound(message),
            ChatError::InvalidRequest(_) => ApiError::BadRequest(message),
            ChatError::Embedding(_) | ChatError::Llm(_) => ApiError::BadGateway(message),
            ChatError::Cancelled => ApiError::ServiceUnavailable(message),
            ChatError::VectorStore(_) | ChatError::Failed(_) => ApiError::Internal(message),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
