//! Knowledge base lifecycle and metadata persistence.
//!
//! Metadata lives in one JSON document, rewritten atomically after every
//! mutation. A knowledge base only gets metadata once at least one of its
//! files has been ingested.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::file_store::FileStore;
use super::processor::DocumentProcessor;
use super::vector_store::VectorStore;
use crate::error::{KnowledgeBaseError, StorageError};
use crate::models::{
    CleanupReport, KnowledgeBase, KnowledgeBaseDetail, MAX_NAME_CHARS, UploadFile,
    UploadOutcome,
};

pub struct KnowledgeBaseManager {
    metadata_path: PathBuf,
    entries: RwLock<BTreeMap<String, KnowledgeBase>>,
    /// Ids of knowledge bases still being created; cleanup leaves them alone.
    pending: Mutex<HashSet<String>>,
    processor: DocumentProcessor,
    store: Arc<dyn VectorStore>,
    files: Arc<FileStore>,
}

/// Removes an id from the pending set when creation finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashSet<String>>,
    kb_id: String,
}

impl<'a> PendingGuard<'a> {
    fn new(pending: &'a Mutex<HashSet<String>>, kb_id: &str) -> Self {
        if let Ok(mut set) = pending.lock() {
            set.insert(kb_id.to_string());
        }
        Self {
            pending,
            kb_id: kb_id.to_string(),
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.pending.lock() {
            set.remove(&self.kb_id);
        }
    }
}

/// Trim a user-supplied name and enforce the length limit.
pub fn validate_name(name: &str) -> Result<String, KnowledgeBaseError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(KnowledgeBaseError::InvalidName(
            "name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(KnowledgeBaseError::InvalidName(format!(
            "name must be at most {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

async fn load_metadata(path: &Path) -> Result<BTreeMap<String, KnowledgeBase>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

async fn write_metadata(
    path: &Path,
    entries: &BTreeMap<String, KnowledgeBase>,
) -> Result<(), StorageError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_vec_pretty(entries)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

impl KnowledgeBaseManager {
    /// Load existing metadata from `metadata_path`, if any.
    pub async fn open(
        metadata_path: PathBuf,
        processor: DocumentProcessor,
        store: Arc<dyn VectorStore>,
        files: Arc<FileStore>,
    ) -> Result<Self, KnowledgeBaseError> {
        let entries = load_metadata(&metadata_path).await?;
        info!(
            path = %metadata_path.display(),
            knowledge_bases = entries.len(),
            "loaded knowledge base metadata"
        );

        Ok(Self {
            metadata_path,
            entries: RwLock::new(entries),
            pending: Mutex::new(HashSet::new()),
            processor,
            store,
            files,
        })
    }

    /// Create a knowledge base from an upload batch.
    pub async fn create(
        &self,
        name: Option<String>,
        files: Vec<UploadFile>,
    ) -> Result<UploadOutcome, KnowledgeBaseError> {
        let name = match name.as_deref().map(str::trim) {
            Some(n) if !n.is_empty() => Some(validate_name(n)?),
            _ => None,
        };
        let files = self.processor.prepare_batch(files)?;

        let kb_id = uuid::Uuid::new_v4().to_string();
        let _pending = PendingGuard::new(&self.pending, &kb_id);

        let report = self.processor.process_batch(&kb_id, files).await;
        if report.ingested_count() == 0 {
            self.discard(&kb_id).await;
            return Err(KnowledgeBaseError::IngestionFailed(report));
        }

        let mut kb = KnowledgeBase::new(kb_id.clone(), name);
        kb.add_files(report.ingested_names());

        let mut entries = self.entries.write().await;
        entries.insert(kb_id.clone(), kb.clone());
        if let Err(e) = write_metadata(&self.metadata_path, &entries).await {
            entries.remove(&kb_id);
            drop(entries);
            self.discard(&kb_id).await;
            return Err(e.into());
        }

        info!(kb_id = %kb.id, name = %kb.name, "{}", report.summary());
        Ok(UploadOutcome {
            knowledge_base: kb,
            report,
        })
    }

    /// Ingest more files into an existing knowledge base.
    ///
    /// Files that ingest are kept even when others fail. If none ingest the
    /// knowledge base is left unchanged.
    pub async fn add_files(
        &self,
        kb_id: &str,
        files: Vec<UploadFile>,
    ) -> Result<UploadOutcome, KnowledgeBaseError> {
        if !self.exists(kb_id).await {
            return Err(KnowledgeBaseError::NotFound(kb_id.to_string()));
        }
        let files = self.processor.prepare_batch(files)?;

        let report = self.processor.process_batch(kb_id, files).await;
        if report.ingested_count() == 0 {
            return Err(KnowledgeBaseError::IngestionFailed(report));
        }

        let mut entries = self.entries.write().await;
        let Some(kb) = entries.get_mut(kb_id) else {
            return Err(KnowledgeBaseError::NotFound(kb_id.to_string()));
        };
        let previous = kb.clone();
        kb.add_files(report.ingested_names());
        let updated = kb.clone();

        if let Err(e) = write_metadata(&self.metadata_path, &entries).await {
            entries.insert(kb_id.to_string(), previous);
            return Err(e.into());
        }

        info!(kb_id, "{}", report.summary());
        Ok(UploadOutcome {
            knowledge_base: updated,
            report,
        })
    }

    /// All knowledge bases, newest first.
    pub async fn list(&self) -> Vec<KnowledgeBase> {
        let entries = self.entries.read().await;
        let mut all: Vec<KnowledgeBase> = entries.values().cloned().collect();
        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    pub async fn get(&self, kb_id: &str) -> Result<KnowledgeBase, KnowledgeBaseError> {
        self.entries
            .read()
            .await
            .get(kb_id)
            .cloned()
            .ok_or_else(|| KnowledgeBaseError::NotFound(kb_id.to_string()))
    }

    /// The knowledge base plus its current chunk count.
    pub async fn detail(&self, kb_id: &str) -> Result<KnowledgeBaseDetail, KnowledgeBaseError> {
        let knowledge_base = self.get(kb_id).await?;
        let chunk_count = self
            .store
            .collection_info(kb_id)
            .await?
            .map_or(0, |info| info.chunk_count);
        Ok(KnowledgeBaseDetail {
            knowledge_base,
            chunk_count,
        })
    }

    pub async fn exists(&self, kb_id: &str) -> bool {
        self.entries.read().await.contains_key(kb_id)
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn rename(
        &self,
        kb_id: &str,
        name: &str,
    ) -> Result<KnowledgeBase, KnowledgeBaseError> {
        let mut entries = self.entries.write().await;
        let Some(kb) = entries.get_mut(kb_id) else {
            return Err(KnowledgeBaseError::NotFound(kb_id.to_string()));
        };
        let name = validate_name(name)?;

        let previous = kb.clone();
        kb.rename(name);
        let renamed = kb.clone();

        if let Err(e) = write_metadata(&self.metadata_path, &entries).await {
            entries.insert(kb_id.to_string(), previous);
            return Err(e.into());
        }
        Ok(renamed)
    }

    /// Remove the collection, then stored files, then metadata.
    ///
    /// If a step fails the metadata stays, so a later delete can finish.
    pub async fn delete(&self, kb_id: &str) -> Result<(), KnowledgeBaseError> {
        if !self.exists(kb_id).await {
            return Err(KnowledgeBaseError::NotFound(kb_id.to_string()));
        }

        self.store.delete_collection(kb_id).await?;
        self.files.delete_all(kb_id).await?;

        let mut entries = self.entries.write().await;
        let Some(removed) = entries.remove(kb_id) else {
            return Err(KnowledgeBaseError::NotFound(kb_id.to_string()));
        };
        if let Err(e) = write_metadata(&self.metadata_path, &entries).await {
            entries.insert(kb_id.to_string(), removed);
            return Err(e.into());
        }

        info!(kb_id, "knowledge base deleted");
        Ok(())
    }

    /// Remove collections and upload directories without metadata, and
    /// metadata whose collection is gone.
    pub async fn cleanup_orphans(&self) -> Result<CleanupReport, KnowledgeBaseError> {
        let pending: HashSet<String> = self
            .pending
            .lock()
            .map(|set| set.clone())
            .unwrap_or_default();
        let known: HashSet<String> = self.entries.read().await.keys().cloned().collect();
        let is_orphan = |id: &String| !known.contains(id) && !pending.contains(id);

        let mut report = CleanupReport::default();

        for kb_id in self.store.list_collections().await? {
            if is_orphan(&kb_id) {
                self.store.delete_collection(&kb_id).await?;
                report.removed_collections.push(kb_id);
            }
        }

        for kb_id in self.files.list_kb_ids().await? {
            if is_orphan(&kb_id) {
                self.files.delete_all(&kb_id).await?;
                report.removed_upload_dirs.push(kb_id);
            }
        }

        let mut stale = Vec::new();
        for kb_id in &known {
            if self.store.collection_info(kb_id).await?.is_none() {
                stale.push(kb_id.clone());
            }
        }

        if !stale.is_empty() {
            let mut entries = self.entries.write().await;
            for kb_id in &stale {
                entries.remove(kb_id);
            }
            write_metadata(&self.metadata_path, &entries).await?;
            drop(entries);

            for kb_id in stale {
                self.files.delete_all(&kb_id).await?;
                report.removed_metadata.push(kb_id);
            }
        }

        report.removed_metadata.sort();
        if !report.is_empty() {
            info!(
                collections = report.removed_collections.len(),
                upload_dirs = report.removed_upload_dirs.len(),
                metadata = report.removed_metadata.len(),
                "removed orphaned data"
            );
        }
        Ok(report)
    }

    /// Best-effort removal of everything written for a knowledge base that
    /// never got metadata.
    async fn discard(&self, kb_id: &str) {
        if let Err(e) = self.store.delete_collection(kb_id).await {
            warn!(kb_id, error = %e, "failed to remove collection of failed upload");
        }
        if let Err(e) = self.files.delete_all(kb_id).await {
            warn!(kb_id, error = %e, "failed to remove files of failed upload");
        }
    }
}
