mod chat;
mod config;
mod document;
mod knowledge_base;
mod upload;

pub use chat::{ChatCompletion, ChatFrame, ChatMessage, ChatPhase, ChatRequest, Role};
pub use config::{
    ChatConfig, Config, DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_OPENAI_URL, DEFAULT_QDRANT_URL, EmbeddingConfig, EmbeddingProvider, IngestionConfig,
    LlmConfig, LoggingConfig, SUPPORTED_EXTENSIONS, ServerConfig, StorageConfig, VectorDriver,
    VectorStoreConfig,
};
pub use document::{DocumentChunk, ScoredChunk, TextChunk};
pub use knowledge_base::{
    CleanupReport, KnowledgeBase, KnowledgeBaseDetail, KnowledgeBaseSummary, MAX_NAME_CHARS,
};
pub use upload::{
    BatchReport, FileOutcome, FileReport, IngestFailureKind, UploadFile, UploadOutcome,
};
