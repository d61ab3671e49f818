mod chat;
mod embedding;
mod file_store;
mod knowledge_base;
mod llm;
pub mod parser;
mod processor;
mod splitter;
pub mod vector_store;

pub use chat::{ChatService, ChatStream, NO_CONTEXT_ANSWER};
pub use embedding::{Embedder, EmbeddingClient};
pub use file_store::FileStore;
pub use knowledge_base::{KnowledgeBaseManager, validate_name};
pub use llm::{ChatModel, CompletionRequest, OpenAiChatClient, PromptMessage, TokenStream};
pub use parser::DocumentFormat;
pub use processor::DocumentProcessor;
pub use splitter::TextSplitter;
pub use vector_store::{
    CollectionInfo, QdrantBackend, SqliteBackend, VectorStore, create_backend,
};
