use serde::{Deserialize, Serialize};

/// A contiguous character span produced by the text splitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub content: String,
    /// Char offset of the first character.
    pub start_offset: usize,
    /// Char offset one past the last character.
    pub end_offset: usize,
}

impl TextChunk {
    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

/// An embedded chunk stored in a knowledge base's vector collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub kb_id: String,
    pub source: String,
    pub content: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub start_offset: u64,
    pub end_offset: u64,
    /// SHA-256 of the full extracted text of the source file.
    pub checksum: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub dense_vector: Vec<f32>,
}

impl DocumentChunk {
    pub fn new(
        kb_id: &str,
        source: &str,
        chunk: TextChunk,
        total_chunks: u32,
        checksum: &str,
        dense_vector: Vec<f32>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kb_id: kb_id.to_string(),
            source: source.to_string(),
            content: chunk.content,
            chunk_index: chunk.index as u32,
            total_chunks,
            start_offset: chunk.start_offset as u64,
            end_offset: chunk.end_offset as u64,
            checksum: checksum.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            dense_vector,
        }
    }
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}
