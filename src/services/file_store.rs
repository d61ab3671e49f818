//! Uploaded source files, stored as `<root>/<kb_id>/<file name>`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StorageError;
use crate::utils::{is_kb_id, is_safe_segment};

/// Bytes written under a temporary name next to their final location.
///
/// Nothing at the final path changes until [`FileStore::commit`].
#[derive(Debug)]
pub struct StagedFile {
    staging: PathBuf,
    target: PathBuf,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.staging
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kb_dir(&self, kb_id: &str) -> Result<PathBuf, StorageError> {
        if !is_safe_segment(kb_id) {
            return Err(StorageError::InvalidPath(kb_id.to_string()));
        }
        Ok(self.root.join(kb_id))
    }

    fn file_path(&self, kb_id: &str, file_name: &str) -> Result<PathBuf, StorageError> {
        if !is_safe_segment(file_name) {
            return Err(StorageError::InvalidPath(file_name.to_string()));
        }
        Ok(self.kb_dir(kb_id)?.join(file_name))
    }

    /// Stage and commit in one step.
    #[cfg(test)]
    pub async fn save(
        &self,
        kb_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let staged = self.stage(kb_id, file_name, bytes).await?;
        self.commit(staged).await
    }

    /// Write `bytes` to a hidden staging file in the knowledge base's
    /// directory. Sanitized names never start with a dot, so the staging
    /// name cannot shadow a stored file.
    pub async fn stage(
        &self,
        kb_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StagedFile, StorageError> {
        let target = self.file_path(kb_id, file_name)?;
        let staging = self
            .kb_dir(kb_id)?
            .join(format!(".{file_name}.{}.partial", uuid::Uuid::new_v4()));
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&staging, bytes).await?;
        debug!(path = %staging.display(), bytes = bytes.len(), "staged upload");
        Ok(StagedFile { staging, target })
    }

    /// Move a staged file into place, replacing an earlier file of the same
    /// name.
    pub async fn commit(&self, staged: StagedFile) -> Result<PathBuf, StorageError> {
        tokio::fs::rename(&staged.staging, &staged.target).await?;
        debug!(path = %staged.target.display(), "stored upload");
        Ok(staged.target)
    }

    /// Drop a staged file without touching the stored one.
    pub async fn discard(&self, staged: StagedFile) -> Result<(), StorageError> {
        match tokio::fs::remove_file(&staged.staging).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove one stored file. Missing files are fine.
    pub async fn delete(&self, kb_id: &str, file_name: &str) -> Result<(), StorageError> {
        let path = self.file_path(kb_id, file_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a knowledge base's whole directory. Missing directories are fine.
    pub async fn delete_all(&self, kb_id: &str) -> Result<(), StorageError> {
        let dir = self.kb_dir(kb_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids of every knowledge base with a directory under the root. Entries
    /// whose name is not a knowledge base id are skipped.
    pub async fn list_kb_ids(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
                && is_kb_id(name)
            {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Create the root if needed and confirm it is writable.
    pub async fn check_writable(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let probe = self.root.join(".write-probe");
        tokio::fs::write(&probe, b"ok").await?;
        tokio::fs::remove_file(&probe).await?;
        Ok(())
    }
}
