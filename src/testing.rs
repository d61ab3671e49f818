//! In-process stand-ins for the embedding service and language model.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{EmbeddingError, LlmError};
use crate::models::IngestionConfig;
use crate::services::{
    ChatModel, CompletionRequest, DocumentProcessor, Embedder, FileStore, KnowledgeBaseManager,
    SqliteBackend, TokenStream,
};

pub const TEST_DIMENSION: usize = 32;

/// Bag-of-words vectors: every lower-cased word bumps one hashed bucket.
pub fn embed_text(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimension];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        vector[(hasher.finish() % dimension as u64) as usize] += 1.0;
    }
    vector
}

/// Deterministic embedder.
#[derive(Default)]
pub struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| embed_text(t, TEST_DIMENSION)).collect())
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }
}

/// Embedder whose credentials are always rejected.
pub struct RejectingEmbedder;

#[async_trait]
impl Embedder for RejectingEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Unauthorized("invalid api key".to_string()))
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        Err(EmbeddingError::Unauthorized("invalid api key".to_string()))
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }
}

/// Streams a fixed list of tokens, optionally failing after some of them.
pub struct ScriptedChatModel {
    tokens: Vec<String>,
    fail_after: Option<usize>,
    requests: Arc<std::sync::Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedChatModel {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            fail_after: None,
            requests: Arc::default(),
        }
    }

    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Every request this model has received.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn stream_chat(
        &self,
        request: CompletionRequest,
        _cancel: CancellationToken,
    ) -> Result<TokenStream, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let (tx, rx) = mpsc::channel(self.tokens.len() + 1);
        for (i, token) in self.tokens.iter().enumerate() {
            if self.fail_after == Some(i) {
                break;
            }
            let _ = tx.send(Ok(token.clone())).await;
        }
        if self.fail_after.is_some() {
            let _ = tx.send(Err(LlmError::StreamInterrupted)).await;
        }
        Ok(rx)
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        Ok(())
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Produces tokens forever at a fixed pace until cancelled, counting each
/// token it sends.
pub struct EndlessChatModel {
    pub produced: Arc<AtomicUsize>,
    interval: Duration,
}

impl EndlessChatModel {
    pub fn new(interval: Duration) -> Self {
        Self {
            produced: Arc::new(AtomicUsize::new(0)),
            interval,
        }
    }
}

#[async_trait]
impl ChatModel for EndlessChatModel {
    async fn stream_chat(
        &self,
        _request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, LlmError> {
        let (tx, rx) = mpsc::channel(1);
        let produced = Arc::clone(&self.produced);
        let interval = self.interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if tx.send(Ok("tick ".to_string())).await.is_err() {
                    break;
                }
                produced.fetch_add(1, Ordering::SeqCst);
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        Ok(())
    }

    fn model(&self) -> &str {
        "endless"
    }
}

/// A manager over an in-memory vector store, with metadata under
/// `dir/data` and uploads under `dir/uploads`.
pub async fn test_manager(dir: &Path) -> (Arc<KnowledgeBaseManager>, Arc<SqliteBackend>) {
    test_manager_with(dir, Arc::new(HashEmbedder::new())).await
}

pub async fn test_manager_with(
    dir: &Path,
    embedder: Arc<dyn Embedder>,
) -> (Arc<KnowledgeBaseManager>, Arc<SqliteBackend>) {
    let store = Arc::new(SqliteBackend::in_memory().expect("in-memory store"));
    let files = Arc::new(FileStore::new(dir.join("uploads")));
    let processor = DocumentProcessor::new(
        embedder,
        store.clone(),
        files.clone(),
        &IngestionConfig::default(),
    )
    .expect("default splitter");
    let manager = KnowledgeBaseManager::open(
        dir.join("data").join("kb_metadata.json"),
        processor,
        store.clone(),
        files,
    )
    .await
    .expect("open manager");
    (Arc::new(manager), store)
}
