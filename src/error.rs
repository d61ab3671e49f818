//! Error types for the DocuChat backend.

use thiserror::Error;

use crate::models::{BatchReport, IngestFailureKind};
use crate::utils::retry::Retryable;

/// Errors raised while extracting text from an uploaded document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to parse document: {0}")]
    ParseFailure(String),
}

/// Errors raised by the text splitter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("document contains no text")]
    EmptyInput,

    #[error("invalid splitter configuration: {0}")]
    InvalidConfig(String),
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding service: {0}")]
    ConnectionError(String),

    #[error("embedding service rejected credentials: {0}")]
    Unauthorized(String),

    #[error("embedding quota exhausted: {0}")]
    QuotaExceeded(String),

    #[error("embedding service rate limited: {0}")]
    RateLimited(String),

    #[error("embedding service error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding timeout")]
    Timeout,
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_)
            | EmbeddingError::RateLimited(_)
            | EmbeddingError::Timeout => true,
            EmbeddingError::ServerError { status, .. } => *status >= 500,
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::Unauthorized(_)
            | EmbeddingError::QuotaExceeded(_)
            | EmbeddingError::InvalidResponse(_) => false,
        }
    }
}

/// Errors related to the streaming language model.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to connect to language model: {0}")]
    ConnectionError(String),

    #[error("language model rejected credentials: {0}")]
    Unauthorized(String),

    #[error("language model quota exhausted: {0}")]
    QuotaExceeded(String),

    #[error("language model rate limited: {0}")]
    RateLimited(String),

    #[error("language model error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("language model stream failed: {0}")]
    StreamError(String),

    #[error("language model reported an error: {0}")]
    Upstream(String),

    #[error("language model stream ended before completion")]
    StreamInterrupted,

    #[error("language model timeout")]
    Timeout,
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            LlmError::ConnectionError(_) | LlmError::RateLimited(_) | LlmError::Timeout => true,
            LlmError::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("failed to write chunks: {0}")]
    StoreWriteError(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("delete error: {0}")]
    DeleteError(String),

    #[error("database error: {0}")]
    DatabaseError(String),
}

impl From<rusqlite::Error> for VectorStoreError {
    fn from(e: rusqlite::Error) -> Self {
        VectorStoreError::DatabaseError(e.to_string())
    }
}

/// Errors from the uploaded-file store and the metadata file.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path segment: {0}")]
    InvalidPath(String),

    #[error("metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A failure while ingesting one file of an upload batch.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IngestError {
    pub fn kind(&self) -> IngestFailureKind {
        match self {
            IngestError::Parse(ParseError::UnsupportedFormat(_)) => {
                IngestFailureKind::UnsupportedFormat
            }
            IngestError::Parse(ParseError::ParseFailure(_)) => IngestFailureKind::ParseFailure,
            IngestError::Split(_) => IngestFailureKind::EmptyInput,
            IngestError::Embedding(_) => IngestFailureKind::EmbeddingServiceError,
            IngestError::VectorStore(_) => IngestFailureKind::StoreWriteError,
            IngestError::Storage(_) => IngestFailureKind::StorageError,
        }
    }
}

/// Errors related to knowledge base management.
#[derive(Debug, Error)]
pub enum KnowledgeBaseError {
    #[error("knowledge base not found: {0}")]
    NotFound(String),

    #[error("invalid knowledge base name: {0}")]
    InvalidName(String),

    #[error("no files were provided")]
    EmptyBatch,

    #[error("uploaded file has no name")]
    MissingFileName,

    #[error("file '{0}' appears more than once in the upload")]
    DuplicateFileName(String),

    #[error("file '{name}' is {size} bytes, limit is {limit} bytes")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("no file in the batch could be ingested")]
    IngestionFailed(BatchReport),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl KnowledgeBaseError {
    /// The per-file report, when the error carries one.
    pub fn report(&self) -> Option<&BatchReport> {
        match self {
            KnowledgeBaseError::IngestionFailed(report) => Some(report),
            _ => None,
        }
    }
}

/// Errors related to chat requests.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("knowledge base not found: {0}")]
    NotFound(String),

    #[error("invalid chat request: {0}")]
    InvalidRequest(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("retrieval error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("{0}")]
    Llm(#[from] LlmError),

    #[error("chat failed: {0}")]
    Failed(String),

    #[error("chat cancelled")]
    Cancelled,
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_error_retry_classification() {
        assert!(EmbeddingError::Timeout.is_retryable());
        assert!(EmbeddingError::RateLimited("slow down".into()).is_retryable());
        assert!(
            EmbeddingError::ServerError {
                status: 503,
                message: "unavailable".into()
            }
            .is_retryable()
        );
        assert!(
            !EmbeddingError::ServerError {
                status: 400,
                message: "bad input".into()
            }
            .is_retryable()
        );
        assert!(!EmbeddingError::Unauthorized("bad key".into()).is_retryable());
        assert!(!EmbeddingError::QuotaExceeded("insufficient_quota".into()).is_retryable());
    }

    #[test]
    fn test_llm_error_retry_classification() {
        assert!(LlmError::ConnectionError("refused".into()).is_retryable());
        assert!(!LlmError::StreamInterrupted.is_retryable());
        assert!(!LlmError::Upstream("context length".into()).is_retryable());
    }

    #[test]
    fn test_ingest_error_kind() {
        let err: IngestError = ParseError::UnsupportedFormat("exe".into()).into();
        assert_eq!(err.kind(), IngestFailureKind::UnsupportedFormat);

        let err: IngestError = SplitError::EmptyInput.into();
        assert_eq!(err.kind(), IngestFailureKind::EmptyInput);

        let err: IngestError = VectorStoreError::DimensionMismatch {
            expected: 3,
            actual: 4,
        }
        .into();
        assert_eq!(err.kind(), IngestFailureKind::StoreWriteError);
    }
}
