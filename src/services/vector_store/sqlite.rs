//! Embedded SQLite vector store.
//!
//! Vectors are stored as little-endian f32 blobs and searched by brute-force
//! cosine similarity over one knowledge base at a time.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::{CollectionInfo, VectorStore, cosine_similarity, rank};
use crate::error::VectorStoreError;
use crate::models::{DocumentChunk, ScoredChunk, VectorDriver};
use crate::utils::is_kb_id;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    kb_id TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id TEXT PRIMARY KEY,
    kb_id TEXT NOT NULL REFERENCES collections(kb_id) ON DELETE CASCADE,
    source TEXT NOT NULL,
    content TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    start_offset INTEGER NOT NULL,
    end_offset INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    created_at TEXT NOT NULL,
    embedding BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_kb ON chunks(kb_id);
"#;

/// Idle read connections kept per database file.
const MAX_IDLE_READERS: usize = 4;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only connections to a database file, opened on demand.
///
/// WAL lets these run alongside the writer, so a long search on one
/// knowledge base never waits on ingestion into another.
struct ReaderPool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    fn acquire(&self) -> Result<Connection, VectorStoreError> {
        if let Ok(mut idle) = self.idle.lock()
            && let Some(conn) = idle.pop()
        {
            return Ok(conn);
        }

        let conn = Connection::open(&self.path)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "query_only", "ON")?;
        Ok(conn)
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock()
            && idle.len() < MAX_IDLE_READERS
        {
            idle.push(conn);
        }
    }
}

pub struct SqliteBackend {
    writer: Arc<Mutex<Connection>>,
    /// `None` for in-memory databases, which only the writer can see.
    readers: Option<Arc<ReaderPool>>,
}

impl SqliteBackend {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, VectorStoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;
        }

        let path = path.to_path_buf();
        let db_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, VectorStoreError> {
            let conn = Connection::open(&db_path)
                .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            Ok(conn)
        })
        .await
        .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))??;

        let mut backend = Self::with_connection(conn)?;
        backend.readers = Some(Arc::new(ReaderPool {
            path,
            idle: Mutex::new(Vec::new()),
        }));
        Ok(backend)
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self, VectorStoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, VectorStoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            readers: None,
        })
    }

    /// Run blocking write work on the single writer connection.
    async fn write<T, F>(&self, work: F) -> Result<T, VectorStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, VectorStoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| VectorStoreError::DatabaseError("connection lock poisoned".into()))?;
            work(&mut guard)
        })
        .await
        .map_err(|e| VectorStoreError::DatabaseError(e.to_string()))?
    }

    /// Run blocking read work on a pooled reader, or on the writer when the
    /// database lives in memory.
    async fn read<T, F>(&self, work: F) -> Result<T, VectorStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, VectorStoreError> + Send + 'static,
    {
        let Some(readers) = self.readers.as_ref().map(Arc::clone) else {
            return self.write(move |conn| work(conn)).await;
        };

        tokio::task::spawn_blocking(move || {
            let conn = readers.acquire()?;
            let result = work(&conn);
            readers.release(conn);
            result
        })
        .await
        .map_err(|e| VectorStoreError::DatabaseError(e.to_string()))?
    }

    /// Every stored `(chunk_index, content, embedding)` of a knowledge base,
    /// ordered by index then content.
    #[cfg(test)]
    pub async fn embeddings(
        &self,
        kb_id: &str,
    ) -> Result<Vec<(u32, String, Vec<f32>)>, VectorStoreError> {
        let kb_id = kb_id.to_string();
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_index, content, embedding FROM chunks
                 WHERE kb_id = ?1 ORDER BY chunk_index, content, chunk_id",
            )?;
            let rows = stmt
                .query_map(params![kb_id], |row| {
                    let embedding: Vec<u8> = row.get(2)?;
                    Ok((row.get(0)?, row.get(1)?, deserialize_embedding(&embedding)))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

fn collection_dimension(conn: &Connection, kb_id: &str) -> Result<Option<usize>, VectorStoreError> {
    let dimension = conn
        .query_row(
            "SELECT dimension FROM collections WHERE kb_id = ?1",
            params![kb_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(dimension.map(|d| d as usize))
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn write_chunks(
    conn: &mut Connection,
    kb_id: &str,
    chunks: &[DocumentChunk],
) -> Result<(), VectorStoreError> {
    let tx = conn.transaction()?;

    let dimension = match collection_dimension(&tx, kb_id)? {
        Some(dimension) => dimension,
        None => {
            let dimension = chunks[0].dense_vector.len();
            tx.execute(
                "INSERT INTO collections (kb_id, dimension, created_at) VALUES (?1, ?2, ?3)",
                params![kb_id, dimension as i64, chrono::Utc::now().to_rfc3339()],
            )?;
            dimension
        }
    };

    {
        let mut insert = tx.prepare(
            "INSERT INTO chunks (chunk_id, kb_id, source, content, chunk_index, total_chunks,
                                 start_offset, end_offset, checksum, created_at, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;

        for chunk in chunks {
            if chunk.dense_vector.len() != dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: dimension,
                    actual: chunk.dense_vector.len(),
                });
            }
            insert.execute(params![
                chunk.id,
                kb_id,
                chunk.source,
                chunk.content,
                chunk.chunk_index,
                chunk.total_chunks,
                chunk.start_offset as i64,
                chunk.end_offset as i64,
                chunk.checksum,
                chunk.created_at,
                serialize_embedding(&chunk.dense_vector),
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.read(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(true)
        })
        .await
    }

    async fn add_chunks(
        &self,
        kb_id: &str,
        chunks: Vec<DocumentChunk>,
    ) -> Result<(), VectorStoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let kb_id = kb_id.to_string();
        self.write(move |conn| {
            write_chunks(conn, &kb_id, &chunks).map_err(|e| match e {
                VectorStoreError::DimensionMismatch { .. } => e,
                other => VectorStoreError::StoreWriteError(other.to_string()),
            })
        })
        .await
    }

    async fn search(
        &self,
        kb_id: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        let kb_id = kb_id.to_string();
        let query = query_vector.to_vec();

        self.read(move |conn| {
            if collection_dimension(conn, &kb_id)?.is_none() {
                return Err(VectorStoreError::CollectionNotFound(kb_id));
            }

            let mut stmt = conn.prepare(
                "SELECT chunk_id, source, content, chunk_index, total_chunks, start_offset,
                        end_offset, checksum, created_at, embedding
                 FROM chunks WHERE kb_id = ?1",
            )?;
            let rows = stmt.query_map(params![kb_id], |row| {
                let embedding: Vec<u8> = row.get(9)?;
                let chunk = DocumentChunk {
                    id: row.get(0)?,
                    kb_id: kb_id.clone(),
                    source: row.get(1)?,
                    content: row.get(2)?,
                    chunk_index: row.get(3)?,
                    total_chunks: row.get(4)?,
                    start_offset: row.get::<_, i64>(5)? as u64,
                    end_offset: row.get::<_, i64>(6)? as u64,
                    checksum: row.get(7)?,
                    created_at: row.get(8)?,
                    dense_vector: Vec::new(),
                };
                let score = cosine_similarity(&query, &deserialize_embedding(&embedding));
                Ok(ScoredChunk { chunk, score })
            })?;

            let results = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(rank(results, top_k))
        })
        .await
    }

    async fn delete_collection(&self, kb_id: &str) -> Result<(), VectorStoreError> {
        let kb_id = kb_id.to_string();
        self.write(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM chunks WHERE kb_id = ?1", params![kb_id])?;
            tx.execute("DELETE FROM collections WHERE kb_id = ?1", params![kb_id])?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| VectorStoreError::DeleteError(e.to_string()))
    }

    async fn delete_chunks(
        &self,
        kb_id: &str,
        chunk_ids: &[String],
    ) -> Result<(), VectorStoreError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let kb_id = kb_id.to_string();
        let chunk_ids = chunk_ids.to_vec();
        self.write(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut delete =
                    tx.prepare("DELETE FROM chunks WHERE kb_id = ?1 AND chunk_id = ?2")?;
                for id in &chunk_ids {
                    delete.execute(params![kb_id, id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| VectorStoreError::DeleteError(e.to_string()))
    }

    async fn collection_info(
        &self,
        kb_id: &str,
    ) -> Result<Option<CollectionInfo>, VectorStoreError> {
        let kb_id = kb_id.to_string();
        self.read(move |conn| {
            let Some(dimension) = collection_dimension(conn, &kb_id)? else {
                return Ok(None);
            };
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE kb_id = ?1",
                params![kb_id],
                |row| row.get(0),
            )?;
            Ok(Some(CollectionInfo {
                chunk_count: count as u64,
                dimension,
            }))
        })
        .await
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT kb_id FROM collections ORDER BY kb_id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids.into_iter().filter(|id| is_kb_id(id)).collect())
        })
        .await
    }

    fn driver(&self) -> VectorDriver {
        VectorDriver::Sqlite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TextChunk;

    fn chunk(kb_id: &str, index: usize, content: &str, vector: Vec<f32>) -> DocumentChunk {
        DocumentChunk::new(
            kb_id,
            "contract.txt",
            TextChunk {
                index,
                content: content.to_string(),
                start_offset: index * 10,
                end_offset: index * 10 + content.chars().count(),
            },
            3,
            "checksum",
            vector,
        )
    }

    #[tokio::test]
    async fn test_add_and_search_ranks_by_similarity() {
        let store = SqliteBackend::in_memory().unwrap();
        store
            .add_chunks(
                "kb1",
                vec![
                    chunk("kb1", 0, "north", vec![1.0, 0.0, 0.0]),
                    chunk("kb1", 1, "east", vec![0.0, 1.0, 0.0]),
                    chunk("kb1", 2, "northeast", vec![0.7, 0.7, 0.0]),
                ],
            )
            .await
            .unwrap();

        let results = store.search("kb1", &[1.0, 0.1, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.content, "north");
        assert_eq!(results[1].chunk.content, "northeast");
        assert!(results[0].score >= results[1].score);
        assert_eq!(results[0].chunk.source, "contract.txt");
        assert!(results[0].chunk.dense_vector.is_empty());
    }

    #[tokio::test]
    async fn test_search_is_deterministic_with_ties() {
        let store = SqliteBackend::in_memory().unwrap();
        let chunks: Vec<_> = (0..5)
            .map(|i| chunk("kb", i, "same", vec![1.0, 1.0]))
            .collect();
        let mut ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        ids.sort();
        store.add_chunks("kb", chunks).await.unwrap();

        let first = store.search("kb", &[1.0, 1.0], 5).await.unwrap();
        let second = store.search("kb", &[1.0, 1.0], 5).await.unwrap();
        let first_ids: Vec<String> = first.iter().map(|r| r.chunk.id.clone()).collect();
        let second_ids: Vec<String> = second.iter().map(|r| r.chunk.id.clone()).collect();

        assert_eq!(first_ids, second_ids);
        assert_eq!(first_ids, ids);
    }

    #[tokio::test]
    async fn test_search_missing_collection() {
        let store = SqliteBackend::in_memory().unwrap();
        assert!(matches!(
            store.search("nope", &[1.0], 3).await,
            Err(VectorStoreError::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected_atomically() {
        let store = SqliteBackend::in_memory().unwrap();
        store
            .add_chunks("kb", vec![chunk("kb", 0, "a", vec![1.0, 0.0])])
            .await
            .unwrap();

        let result = store
            .add_chunks(
                "kb",
                vec![
                    chunk("kb", 1, "b", vec![0.0, 1.0]),
                    chunk("kb", 2, "c", vec![0.0, 1.0, 0.0]),
                ],
            )
            .await;
        assert!(matches!(
            result,
            Err(VectorStoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));

        let info = store.collection_info("kb").await.unwrap().unwrap();
        assert_eq!(info.chunk_count, 1);
        assert_eq!(info.dimension, 2);
    }

    #[tokio::test]
    async fn test_delete_collection_is_idempotent() {
        let store = SqliteBackend::in_memory().unwrap();
        store
            .add_chunks("kb", vec![chunk("kb", 0, "a", vec![1.0])])
            .await
            .unwrap();

        store.delete_collection("kb").await.unwrap();
        store.delete_collection("kb").await.unwrap();

        assert!(store.collection_info("kb").await.unwrap().is_none());
        assert!(store.list_collections().await.unwrap().is_empty());
        assert!(matches!(
            store.search("kb", &[1.0], 1).await,
            Err(VectorStoreError::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_chunks_only_touches_listed_ids() {
        let store = SqliteBackend::in_memory().unwrap();
        let keep = chunk("kb", 0, "keep", vec![1.0]);
        let drop = chunk("kb", 1, "drop", vec![1.0]);
        let drop_id = drop.id.clone();
        store.add_chunks("kb", vec![keep, drop]).await.unwrap();

        store
            .delete_chunks("kb", &[drop_id, "unknown".to_string()])
            .await
            .unwrap();

        let results = store.search("kb", &[1.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.content, "keep");
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = SqliteBackend::in_memory().unwrap();
        let a = "11111111-1111-4111-8111-111111111111";
        let b = "22222222-2222-4222-8222-222222222222";
        store
            .add_chunks(a, vec![chunk(a, 0, "alpha", vec![1.0])])
            .await
            .unwrap();
        store
            .add_chunks(b, vec![chunk(b, 0, "beta", vec![1.0])])
            .await
            .unwrap();

        let results = store.search(a, &[1.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.content, "alpha");
        assert_eq!(store.list_collections().await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_list_collections_skips_non_kb_ids() {
        let store = SqliteBackend::in_memory().unwrap();
        let kb = "33333333-3333-4333-8333-333333333333";
        store
            .add_chunks(kb, vec![chunk(kb, 0, "kept", vec![1.0])])
            .await
            .unwrap();
        store
            .add_chunks("scratch", vec![chunk("scratch", 0, "other", vec![1.0])])
            .await
            .unwrap();

        assert_eq!(store.list_collections().await.unwrap(), vec![kb]);
    }

    #[tokio::test]
    async fn test_search_does_not_wait_on_writer() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteBackend::open(&dir.path().join("vectors.db"))
            .await
            .unwrap();
        store
            .add_chunks("kb", vec![chunk("kb", 0, "ready", vec![1.0, 0.0])])
            .await
            .unwrap();

        let writer = Arc::clone(&store.writer);
        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let holder = std::thread::spawn(move || {
            let _guard = writer.lock().unwrap();
            held_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        held_rx.recv().unwrap();

        let results = tokio::time::timeout(
            Duration::from_secs(5),
            store.search("kb", &[1.0, 0.0], 3),
        )
        .await
        .expect("search blocked behind the writer")
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.content, "ready");

        let info = tokio::time::timeout(Duration::from_secs(5), store.collection_info("kb"))
            .await
            .expect("collection_info blocked behind the writer")
            .unwrap();
        assert_eq!(info.unwrap().chunk_count, 1);

        release_tx.send(()).unwrap();
        holder.join().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_and_reads_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteBackend::open(&dir.path().join("vectors.db"))
                .await
                .unwrap(),
        );

        let mut tasks = Vec::new();
        for n in 0..4 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let kb = format!("kb{n}");
                let chunks = (0..3)
                    .map(|i| chunk(&kb, i, "text", vec![1.0, n as f32]))
                    .collect();
                store.add_chunks(&kb, chunks).await.unwrap();
                store.search(&kb, &[1.0, 0.0], 10).await.unwrap().len()
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), 3);
        }
        for n in 0..4 {
            let info = store.collection_info(&format!("kb{n}")).await.unwrap();
            assert_eq!(info.unwrap().chunk_count, 3);
        }
    }

    #[tokio::test]
    async fn test_open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vectors.db");
        let store = SqliteBackend::open(&path).await.unwrap();
        assert!(store.health_check().await.unwrap());
        assert!(path.exists());
    }
}
