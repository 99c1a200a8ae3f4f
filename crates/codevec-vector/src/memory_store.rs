//! In-memory vector store
//!
//! Evaluates the same collection lifecycle, filters and distance ranking
//! as the server, without any network. Used for tests and dry runs.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use codevec_core::{CodevecError, DistanceFunction, Result};
use tokio::sync::RwLock;

use crate::{
    CollectionInfo, CollectionSettings, GetRequest, QueryHit, QueryRequest, StoredRecord,
    VectorRecord, VectorStore,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct MemoryCollection {
    info: CollectionInfo,
    distance: DistanceFunction,
    /// Insertion order is preserved; upserts replace in place
    records: Vec<VectorRecord>,
}

impl MemoryCollection {
    fn new(name: &str, settings: &CollectionSettings) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            info: CollectionInfo {
                id: format!("memory-{id}"),
                name: name.to_string(),
                metadata: Some(settings.to_metadata()),
            },
            distance: settings.distance,
            records: Vec::new(),
        }
    }
}

/// Vector store held entirely in process memory
pub struct MemoryStore {
    name: String,
    collection: RwLock<Option<MemoryCollection>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: RwLock::new(None),
        }
    }

    fn not_found(&self) -> CodevecError {
        CodevecError::CollectionNotFound(self.name.clone())
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn collection_name(&self) -> &str {
        &self.name
    }

    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }

    async fn get_collection(&self) -> Result<CollectionInfo> {
        self.collection
            .read()
            .await
            .as_ref()
            .map(|c| c.info.clone())
            .ok_or_else(|| self.not_found())
    }

    async fn create_collection(&self, settings: &CollectionSettings) -> Result<CollectionInfo> {
        let mut guard = self.collection.write().await;
        if guard.is_some() {
            return Err(CodevecError::DatabaseError(format!(
                "Collection {} already exists",
                self.name
            )));
        }

        let collection = MemoryCollection::new(&self.name, settings);
        let info = collection.info.clone();
        *guard = Some(collection);
        Ok(info)
    }

    async fn get_or_create_collection(
        &self,
        settings: &CollectionSettings,
    ) -> Result<CollectionInfo> {
        let mut guard = self.collection.write().await;
        let collection = guard.get_or_insert_with(|| MemoryCollection::new(&self.name, settings));
        Ok(collection.info.clone())
    }

    async fn delete_collection(&self) -> Result<bool> {
        Ok(self.collection.write().await.take().is_some())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut guard = self.collection.write().await;
        let collection = guard.as_mut().ok_or_else(|| self.not_found())?;

        for record in records {
            match collection.records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => collection.records.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let guard = self.collection.read().await;
        let collection = guard.as_ref().ok_or_else(|| self.not_found())?;
        Ok(collection.records.len())
    }

    async fn get(&self, request: &GetRequest) -> Result<Vec<StoredRecord>> {
        let guard = self.collection.read().await;
        let collection = guard.as_ref().ok_or_else(|| self.not_found())?;

        let records = collection
            .records
            .iter()
            .filter(|r| {
                request
                    .ids
                    .as_ref()
                    .map_or(true, |ids| ids.iter().any(|id| *id == r.id))
            })
            .skip(request.offset)
            .take(request.limit.unwrap_or(usize::MAX))
            .map(|r| StoredRecord {
                id: r.id.clone(),
                document: Some(r.document.clone()),
                metadata: r.metadata.clone(),
                embedding: request.include_embeddings.then(|| r.embedding.clone()),
            })
            .collect();

        Ok(records)
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryHit>> {
        let guard = self.collection.read().await;
        let collection = guard.as_ref().ok_or_else(|| self.not_found())?;

        let mut hits: Vec<QueryHit> = collection
            .records
            .iter()
            .filter(|r| {
                request
                    .metadata_filter
                    .as_ref()
                    .map_or(true, |f| f.matches(&r.metadata))
            })
            .filter(|r| {
                request
                    .document_filter
                    .as_ref()
                    .map_or(true, |f| f.matches(&r.document))
            })
            .map(|r| QueryHit {
                id: r.id.clone(),
                document: Some(r.document.clone()),
                metadata: r.metadata.clone(),
                distance: collection.distance.distance(&request.embedding, &r.embedding),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(request.n_results);
        Ok(hits)
    }
}
