//! Vector store abstraction layer.
//!
//! Each knowledge base owns one collection. Backends are selected by
//! `vector_store.driver`: an embedded SQLite file (default) or Qdrant.

mod qdrant;
mod sqlite;

pub use qdrant::QdrantBackend;
pub use sqlite::SqliteBackend;

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::VectorStoreError;
use crate::models::{Config, DocumentChunk, ScoredChunk, VectorDriver};

/// Collection information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub chunk_count: u64,
    pub dimension: usize,
}

/// Abstract trait for vector store operations.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Check if the vector store is healthy and accessible.
    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    /// Append chunks to a knowledge base's collection, creating it on first
    /// write. Every vector must match the collection's dimension.
    async fn add_chunks(
        &self,
        kb_id: &str,
        chunks: Vec<DocumentChunk>,
    ) -> Result<(), VectorStoreError>;

    /// Up to `top_k` chunks by cosine similarity, best first, ties broken by
    /// ascending chunk id.
    async fn search(
        &self,
        kb_id: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError>;

    /// Remove a knowledge base's collection. Missing collections are fine.
    async fn delete_collection(&self, kb_id: &str) -> Result<(), VectorStoreError>;

    /// Remove specific chunks. Unknown ids are ignored.
    async fn delete_chunks(&self, kb_id: &str, chunk_ids: &[String])
    -> Result<(), VectorStoreError>;

    /// None if the collection doesn't exist.
    async fn collection_info(&self, kb_id: &str)
    -> Result<Option<CollectionInfo>, VectorStoreError>;

    /// Ids of all knowledge bases that own a collection.
    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError>;

    fn driver(&self) -> VectorDriver;
}

/// Create the backend selected in the configuration.
pub async fn create_backend(config: &Config) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    match config.vector_store.driver {
        VectorDriver::Sqlite => {
            let backend = SqliteBackend::open(&config.vector_db_path()).await?;
            Ok(Arc::new(backend))
        }
        VectorDriver::Qdrant => {
            let backend = QdrantBackend::new(&config.vector_store, config.embedding.dimension)?;
            Ok(Arc::new(backend))
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON { 0.0 } else { dot / denom }
}

/// Sort best-first with the chunk-id tie break, then keep `top_k`.
pub fn rank(mut results: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    results.truncate(top_k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TextChunk;

    fn scored(id: &str, score: f32) -> ScoredChunk {
        let mut chunk = DocumentChunk::new(
            "kb",
            "a.txt",
            TextChunk {
                index: 0,
                content: id.to_string(),
                start_offset: 0,
                end_offset: id.len(),
            },
            1,
            "sum",
            Vec::new(),
        );
        chunk.id = id.to_string();
        ScoredChunk { chunk, score }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_orders_by_score_then_id() {
        let ranked = rank(
            vec![
                scored("c", 0.5),
                scored("b", 0.9),
                scored("a", 0.5),
                scored("d", 0.1),
            ],
            3,
        );
        let ids: Vec<&str> = ranked.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
