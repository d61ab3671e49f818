use serde::{Deserialize, Serialize};

use super::knowledge_base::KnowledgeBase;

/// One file of an upload batch, held in memory.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestFailureKind {
    UnsupportedFormat,
    ParseFailure,
    EmptyInput,
    EmbeddingServiceError,
    StoreWriteError,
    StorageError,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Ingested {
        chunks: usize,
    },
    Failed {
        error: IngestFailureKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    pub file_name: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

impl FileReport {
    pub fn ingested(file_name: String, chunks: usize) -> Self {
        Self {
            file_name,
            outcome: FileOutcome::Ingested { chunks },
        }
    }

    pub fn failed(file_name: String, error: IngestFailureKind, message: String) -> Self {
        Self {
            file_name,
            outcome: FileOutcome::Failed { error, message },
        }
    }

    pub fn is_ingested(&self) -> bool {
        matches!(self.outcome, FileOutcome::Ingested { .. })
    }
}

/// Per-file outcomes of one batch, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn ingested_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_ingested()).count()
    }

    pub fn ingested_names(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.is_ingested())
            .map(|f| f.file_name.clone())
            .collect()
    }

    pub fn total_chunks(&self) -> usize {
        self.files
            .iter()
            .map(|f| match f.outcome {
                FileOutcome::Ingested { chunks } => chunks,
                FileOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn summary(&self) -> String {
        let ok = self.ingested_count();
        let failed = self.files.len() - ok;
        if failed == 0 {
            format!("Processed {ok} file(s) into {} chunks", self.total_chunks())
        } else {
            format!(
                "Processed {ok} of {} file(s) into {} chunks; {failed} failed",
                self.files.len(),
                self.total_chunks()
            )
        }
    }
}

/// Result of a successful create or add-files call.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub knowledge_base: KnowledgeBase,
    pub report: BatchReport,
}
