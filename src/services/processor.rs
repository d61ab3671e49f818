//! Ingestion pipeline: store -> parse -> split -> embed -> index.
//!
//! A batch is fanned out to a bounded pool of worker tasks fed by a channel.
//! Each file succeeds or fails on its own; the report keeps upload order.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::embedding::Embedder;
use super::file_store::FileStore;
use super::parser::{self, DocumentFormat};
use super::splitter::TextSplitter;
use super::vector_store::VectorStore;
use crate::error::{
    EmbeddingError, IngestError, KnowledgeBaseError, ParseError, SplitError,
};
use crate::models::{
    BatchReport, DocumentChunk, FileReport, IngestFailureKind, IngestionConfig, UploadFile,
};
use crate::utils::{calculate_checksum, sanitize_filename};

#[derive(Clone)]
pub struct DocumentProcessor {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    files: Arc<FileStore>,
    splitter: TextSplitter,
    config: IngestionConfig,
}

impl DocumentProcessor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        files: Arc<FileStore>,
        config: &IngestionConfig,
    ) -> Result<Self, SplitError> {
        Ok(Self {
            embedder,
            store,
            files,
            splitter: TextSplitter::from_config(config)?,
            config: config.clone(),
        })
    }

    /// Reject batches that cannot be processed at all and sanitize names.
    ///
    /// Per-file problems that only show up while ingesting (format, content)
    /// are reported per file instead.
    pub fn prepare_batch(
        &self,
        files: Vec<UploadFile>,
    ) -> Result<Vec<UploadFile>, KnowledgeBaseError> {
        if files.is_empty() {
            return Err(KnowledgeBaseError::EmptyBatch);
        }

        let mut seen = HashSet::new();
        files
            .into_iter()
            .map(|mut file| {
                let name = sanitize_filename(&file.file_name);
                if name.is_empty() {
                    return Err(KnowledgeBaseError::MissingFileName);
                }
                if file.size() > self.config.max_file_size {
                    return Err(KnowledgeBaseError::FileTooLarge {
                        name,
                        size: file.size(),
                        limit: self.config.max_file_size,
                    });
                }
                if !seen.insert(name.clone()) {
                    return Err(KnowledgeBaseError::DuplicateFileName(name));
                }
                file.file_name = name;
                Ok(file)
            })
            .collect()
    }

    /// Ingest every file into `kb_id`, at most `concurrency` at a time.
    pub async fn process_batch(&self, kb_id: &str, files: Vec<UploadFile>) -> BatchReport {
        let total = files.len();
        if total == 0 {
            return BatchReport::default();
        }

        let names: Vec<String> = files.iter().map(|f| f.file_name.clone()).collect();
        let workers = self.config.concurrency.clamp(1, total);
        info!(kb_id, files = total, workers, "processing upload batch");

        let (job_tx, job_rx) = mpsc::channel::<(usize, UploadFile)>(total);
        for job in files.into_iter().enumerate() {
            if job_tx.send(job).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(usize, FileReport)>();
        let mut pool = JoinSet::new();

        for _ in 0..workers {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let processor = self.clone();
            let kb_id = kb_id.to_string();

            pool.spawn(async move {
                loop {
                    let next = job_rx.lock().await.recv().await;
                    let Some((index, file)) = next else {
                        break;
                    };
                    let report = processor.ingest(&kb_id, file).await;
                    if result_tx.send((index, report)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(kb_id, error = %e, "ingestion worker failed");
            }
        }

        let mut slots: Vec<Option<FileReport>> = vec![None; total];
        while let Some((index, report)) = result_rx.recv().await {
            slots[index] = Some(report);
        }

        let files = slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| {
                    FileReport::failed(
                        name,
                        IngestFailureKind::Internal,
                        "ingestion worker stopped unexpectedly".to_string(),
                    )
                })
            })
            .collect();

        BatchReport { files }
    }

    async fn ingest(&self, kb_id: &str, file: UploadFile) -> FileReport {
        let name = file.file_name.clone();
        match self.ingest_file(kb_id, file).await {
            Ok(chunks) => {
                info!(kb_id, file = %name, chunks, "file ingested");
                FileReport::ingested(name, chunks)
            }
            Err(e) => {
                warn!(kb_id, file = %name, error = %e, "file ingestion failed");
                FileReport::failed(name, e.kind(), e.to_string())
            }
        }
    }

    /// The upload is staged beside any stored file of the same name and only
    /// replaces it once its chunks are written, so a failed re-upload leaves
    /// the committed file alone.
    async fn ingest_file(&self, kb_id: &str, file: UploadFile) -> Result<usize, IngestError> {
        let format = self.detect_format(&file.file_name)?;
        let staged = self.files.stage(kb_id, &file.file_name, &file.bytes).await?;

        let name = file.file_name.clone();
        let ids = match self.index_file(kb_id, format, file).await {
            Ok(ids) => ids,
            Err(e) => {
                if let Err(cleanup) = self.files.discard(staged).await {
                    warn!(kb_id, file = %name, error = %cleanup, "failed to remove staged file");
                }
                return Err(e);
            }
        };

        if let Err(e) = self.files.commit(staged).await {
            self.roll_back(kb_id, &name, &ids).await;
            return Err(e.into());
        }
        Ok(ids.len())
    }

    async fn roll_back(&self, kb_id: &str, file_name: &str, ids: &[String]) {
        if let Err(e) = self.store.delete_chunks(kb_id, ids).await {
            warn!(kb_id, file = %file_name, error = %e, "failed to roll back chunks");
        }
    }

    fn detect_format(&self, file_name: &str) -> Result<DocumentFormat, ParseError> {
        let format = DocumentFormat::from_file_name(file_name)?;
        if self.config.allows(format.extension()) {
            Ok(format)
        } else {
            Err(ParseError::UnsupportedFormat(format!(".{format}")))
        }
    }

    async fn index_file(
        &self,
        kb_id: &str,
        format: DocumentFormat,
        file: UploadFile,
    ) -> Result<Vec<String>, IngestError> {
        let UploadFile { file_name, bytes } = file;

        let text = tokio::task::spawn_blocking(move || parser::parse(format, &bytes))
            .await
            .map_err(|e| ParseError::ParseFailure(format!("parser stopped: {e}")))??;

        let checksum = calculate_checksum(&text);
        let pieces = self.splitter.split(&text)?;
        let total = pieces.len() as u32;

        let texts: Vec<String> = pieces.iter().map(|p| p.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            ))
            .into());
        }

        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .zip(vectors)
            .map(|(piece, vector)| {
                DocumentChunk::new(kb_id, &file_name, piece, total, &checksum, vector)
            })
            .collect();
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        if let Err(e) = self.store.add_chunks(kb_id, chunks).await {
            self.roll_back(kb_id, &file_name, &ids).await;
            return Err(e.into());
        }

        Ok(ids)
    }
}
