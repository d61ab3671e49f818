//! Qdrant vector store backend implementation.
//!
//! Each knowledge base maps to a collection named `kb_{id}`.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, DeletePointsBuilder, Distance, PointId, PointStruct, PointsIdsList,
    ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};

use super::{CollectionInfo, VectorStore, rank};
use crate::error::VectorStoreError;
use crate::models::{DocumentChunk, ScoredChunk, VectorDriver, VectorStoreConfig};
use crate::utils::is_kb_id;

const COLLECTION_PREFIX: &str = "kb_";

const TIE_OVERFETCH: usize = 8;

/// Qdrant vector store backend.
pub struct QdrantBackend {
    client: Qdrant,
    dimension: usize,
}

impl QdrantBackend {
    /// Create a new Qdrant backend. Collections are created with `dimension`.
    pub fn new(config: &VectorStoreConfig, dimension: usize) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self { client, dimension })
    }

    fn collection_name(kb_id: &str) -> String {
        format!("{COLLECTION_PREFIX}{kb_id}")
    }

    async fn exists(&self, collection: &str) -> Result<bool, VectorStoreError> {
        self.client
            .collection_exists(collection)
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn ensure_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        if self.exists(collection).await? {
            return Ok(());
        }

        let create = CreateCollectionBuilder::new(collection).vectors_config(
            VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
        );

        let Err(e) = self.client.create_collection(create).await else {
            return Ok(());
        };

        // Another writer may have created it between the check and the create.
        if is_already_exists(&e.to_string()) || self.exists(collection).await? {
            return Ok(());
        }
        Err(VectorStoreError::StoreWriteError(e.to_string()))
    }
}

fn is_already_exists(message: &str) -> bool {
    message.to_ascii_lowercase().contains("already exists")
}

/// Points requested per search. Extra candidates let local ranking break
/// ties at the cut-off by chunk id.
fn fetch_limit(top_k: usize) -> u64 {
    top_k.saturating_add(TIE_OVERFETCH) as u64
}

fn to_point(chunk: DocumentChunk) -> PointStruct {
    let mut payload: HashMap<String, Value> = HashMap::new();
    payload.insert("kb_id".to_string(), chunk.kb_id.into());
    payload.insert("source".to_string(), chunk.source.into());
    payload.insert("content".to_string(), chunk.content.into());
    payload.insert("chunk_index".to_string(), i64::from(chunk.chunk_index).into());
    payload.insert("total_chunks".to_string(), i64::from(chunk.total_chunks).into());
    payload.insert("start_offset".to_string(), (chunk.start_offset as i64).into());
    payload.insert("end_offset".to_string(), (chunk.end_offset as i64).into());
    payload.insert("checksum".to_string(), chunk.checksum.into());
    payload.insert("created_at".to_string(), chunk.created_at.into());

    PointStruct::new(chunk.id, chunk.dense_vector, payload)
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> String {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => s.clone(),
        _ => String::new(),
    }
}

fn payload_int(payload: &HashMap<String, Value>, key: &str) -> i64 {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(n)) => *n,
        _ => 0,
    }
}

fn point_id_string(id: Option<&PointId>) -> String {
    match id.and_then(|id| id.point_id_options.as_ref()) {
        Some(PointIdOptions::Uuid(uuid)) => uuid.clone(),
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

fn from_point(kb_id: &str, point: ScoredPoint) -> ScoredChunk {
    let payload = &point.payload;
    let chunk = DocumentChunk {
        id: point_id_string(point.id.as_ref()),
        kb_id: kb_id.to_string(),
        source: payload_str(payload, "source"),
        content: payload_str(payload, "content"),
        chunk_index: payload_int(payload, "chunk_index") as u32,
        total_chunks: payload_int(payload, "total_chunks") as u32,
        start_offset: payload_int(payload, "start_offset") as u64,
        end_offset: payload_int(payload, "end_offset") as u64,
        checksum: payload_str(payload, "checksum"),
        created_at: payload_str(payload, "created_at"),
        dense_vector: Vec::new(),
    };
    ScoredChunk {
        chunk,
        score: point.score,
    }
}

#[async_trait]
impl VectorStore for QdrantBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn add_chunks(
        &self,
        kb_id: &str,
        chunks: Vec<DocumentChunk>,
    ) -> Result<(), VectorStoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        if let Some(bad) = chunks.iter().find(|c| c.dense_vector.len() != self.dimension) {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.dense_vector.len(),
            });
        }

        let collection = Self::collection_name(kb_id);
        self.ensure_collection(&collection).await?;

        let points: Vec<PointStruct> = chunks.into_iter().map(to_point).collect();
        let upsert = UpsertPointsBuilder::new(&collection, points).wait(true);

        self.client
            .upsert_points(upsert)
            .await
            .map_err(|e| VectorStoreError::StoreWriteError(e.to_string()))?;

        Ok(())
    }

    async fn search(
        &self,
        kb_id: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        let collection = Self::collection_name(kb_id);
        if !self.exists(&collection).await? {
            return Err(VectorStoreError::CollectionNotFound(kb_id.to_string()));
        }

        let search =
            SearchPointsBuilder::new(&collection, query_vector.to_vec(), fetch_limit(top_k))
                .with_payload(true);

        let response = self
            .client
            .search_points(search)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        let results = response
            .result
            .into_iter()
            .map(|point| from_point(kb_id, point))
            .collect();

        // Qdrant does not order equal scores by id.
        Ok(rank(results, top_k))
    }

    async fn delete_collection(&self, kb_id: &str) -> Result<(), VectorStoreError> {
        let collection = Self::collection_name(kb_id);
        if !self.exists(&collection).await? {
            return Ok(());
        }

        self.client
            .delete_collection(&collection)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(())
    }

    async fn delete_chunks(
        &self,
        kb_id: &str,
        chunk_ids: &[String],
    ) -> Result<(), VectorStoreError> {
        let collection = Self::collection_name(kb_id);
        if chunk_ids.is_empty() || !self.exists(&collection).await? {
            return Ok(());
        }

        let ids: Vec<PointId> = chunk_ids.iter().map(|id| id.clone().into()).collect();
        let delete = DeletePointsBuilder::new(&collection)
            .points(PointsIdsList { ids })
            .wait(true);

        self.client
            .delete_points(delete)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(())
    }

    async fn collection_info(
        &self,
        kb_id: &str,
    ) -> Result<Option<CollectionInfo>, VectorStoreError> {
        let collection = Self::collection_name(kb_id);
        if !self.exists(&collection).await? {
            return Ok(None);
        }

        let info = self
            .client
            .collection_info(&collection)
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Some(CollectionInfo {
            chunk_count: info.result.map_or(0, |r| r.points_count.unwrap_or(0)),
            dimension: self.dimension,
        }))
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        let response = self
            .client
            .list_collections()
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        let mut ids: Vec<String> = response
            .collections
            .into_iter()
            .filter_map(|c| c.name.strip_prefix(COLLECTION_PREFIX).map(str::to_string))
            .filter(|id| is_kb_id(id))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn driver(&self) -> VectorDriver {
        VectorDriver::Qdrant
    }
}
