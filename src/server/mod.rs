//! HTTP surface: shared state, router, and the listener loop.

pub mod error;
pub mod handlers;
pub mod router;
pub mod sse;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::models::Config;
use crate::services::{
    ChatModel, ChatService, DocumentProcessor, Embedder, EmbeddingClient, FileStore,
    KnowledgeBaseManager, OpenAiChatClient, VectorStore, create_backend,
};

pub use error::ApiError;
pub use router::build_router;

/// Everything a request handler can reach.
pub struct AppState {
    pub config: Config,
    pub kbs: Arc<KnowledgeBaseManager>,
    pub chat: ChatService,
    pub embedder: Arc<dyn Embedder>,
    pub model: Arc<dyn ChatModel>,
    pub store: Arc<dyn VectorStore>,
    pub files: Arc<FileStore>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the services around the given collaborators.
    pub async fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let files = Arc::new(FileStore::new(config.storage.upload_dir.clone()));
        let processor = DocumentProcessor::new(
            Arc::clone(&embedder),
            Arc::clone(&store),
            Arc::clone(&files),
            &config.ingestion,
        )
        .context("invalid ingestion settings")?;

        let kbs = Arc::new(
            KnowledgeBaseManager::open(
                config.metadata_path(),
                processor,
                Arc::clone(&store),
                Arc::clone(&files),
            )
            .await
            .context("failed to load knowledge base metadata")?,
        );

        let chat = ChatService::new(
            Arc::clone(&kbs),
            Arc::clone(&embedder),
            Arc::clone(&store),
            Arc::clone(&model),
            config.chat.clone(),
        );

        Ok(Self {
            config,
            kbs,
            chat,
            embedder,
            model,
            store,
            files,
            started_at: Instant::now(),
        })
    }

    /// Build the configured provider clients and vector store.
    pub async fn from_config(config: Config) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(
            EmbeddingClient::new(&config.embedding).context("failed to build embedding client")?,
        );
        let model: Arc<dyn ChatModel> = Arc::new(
            OpenAiChatClient::new(&config.llm).context("failed to build language model client")?,
        );
        let store = create_backend(&config)
            .await
            .context("failed to open vector store")?;

        Self::new(config, embedder, model, store).await
    }
}

/// Bind the configured address and serve until the task is dropped.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);

    match state.kbs.cleanup_orphans().await {
        Ok(report) if !report.is_empty() => info!(?report, "removed orphaned data"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "orphan cleanup failed"),
    }

    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "docuchat listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
