//! codevec Vector - Vector database abstraction
//!
//! Provides abstraction over a Chroma-compatible vector database for
//! storing, listing and searching code chunks, plus the embedding clients
//! that turn chunk text into vectors.

use async_trait::async_trait;
use codevec_core::{DistanceFunction, Metadata, MetadataValue, Result};
use serde::{Deserialize, Serialize};

pub mod chroma_store;
pub mod embedding;
pub mod filter;
pub mod memory_store;

pub use chroma_store::ChromaStore;
pub use embedding::{create_embedding_client, EmbeddingClient, OllamaEmbedding, OpenAiEmbedding};
pub use filter::{DocumentFilter, MetadataFilter};
pub use memory_store::MemoryStore;

/// A record ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// A record read back from a collection
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub document: Option<String>,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
}

/// A ranked query result
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: String,
    pub document: Option<String>,
    pub metadata: Metadata,
    /// Distance to the query vector (smaller is closer)
    pub distance: f32,
}

/// Settings applied when a collection is created
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSettings {
    /// HNSW `search_ef`
    pub search_ef: u32,
    /// Similarity space of the index
    pub distance: DistanceFunction,
    /// Name of the model whose vectors populate the collection
    pub embedding_model: Option<String>,
}

impl CollectionSettings {
    pub fn new(search_ef: u32, distance: DistanceFunction) -> Self {
        Self {
            search_ef,
            distance,
            embedding_model: None,
        }
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Collection metadata carrying these settings
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(
            "hnsw:search_ef".to_string(),
            MetadataValue::Int(i64::from(self.search_ef)),
        );
        metadata.insert(
            "hnsw:space".to_string(),
            MetadataValue::from(self.distance.as_str()),
        );
        if let Some(model) = &self.embedding_model {
            metadata.insert("embedding_model".to_string(), MetadataValue::from(model.as_str()));
        }
        metadata
    }
}

/// A server-side collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl CollectionInfo {
    /// Embedding model recorded when the collection was created
    pub fn embedding_model(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("embedding_model"))
            .and_then(MetadataValue::as_str)
    }

    /// Similarity space recorded when the collection was created
    pub fn distance(&self) -> DistanceFunction {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("hnsw:space"))
            .and_then(MetadataValue::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

/// Parameters of a `get` call
#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    /// Restrict to these ids
    pub ids: Option<Vec<String>>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Also return stored embeddings
    pub include_embeddings: bool,
}

/// Parameters of a similarity query
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub embedding: Vec<f32>,
    pub n_results: usize,
    pub metadata_filter: Option<MetadataFilter>,
    pub document_filter: Option<DocumentFilter>,
}

impl QueryRequest {
    pub fn new(embedding: Vec<f32>, n_results: usize) -> Self {
        Self {
            embedding,
            n_results,
            metadata_filter: None,
            document_filter: None,
        }
    }

    pub fn with_metadata_filter(mut self, filter: MetadataFilter) -> Self {
        self.metadata_filter = Some(filter);
        self
    }

    pub fn with_document_filter(mut self, filter: DocumentFilter) -> Self {
        self.document_filter = Some(filter);
        self
    }
}

/// Trait for vector database operations on a single named collection
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name of the collection this store operates on
    fn collection_name(&self) -> &str;

    /// Check that the server is reachable
    async fn heartbeat(&self) -> Result<()>;

    /// Fetch the collection, failing with `CollectionNotFound` if absent
    async fn get_collection(&self) -> Result<CollectionInfo>;

    /// Create the collection; fails if it already exists
    async fn create_collection(&self, settings: &CollectionSettings) -> Result<CollectionInfo>;

    /// Fetch the collection, creating it with `settings` if absent
    async fn get_or_create_collection(
        &self,
        settings: &CollectionSettings,
    ) -> Result<CollectionInfo>;

    /// Drop the collection. Returns whether it existed.
    async fn delete_collection(&self) -> Result<bool>;

    /// Guarantee the collection exists and is empty
    async fn create_or_reset(&self, settings: &CollectionSettings) -> Result<CollectionInfo> {
        if self.delete_collection().await? {
            tracing::info!(collection = self.collection_name(), "Deleted existing collection");
        }
        self.create_collection(settings).await
    }

    /// Insert records, overwriting any with the same id
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Number of records in the collection
    async fn count(&self) -> Result<usize>;

    /// Read records without ranking
    async fn get(&self, request: &GetRequest) -> Result<Vec<StoredRecord>>;

    /// Read every record, `page_size` at a time
    async fn get_all(&self, page_size: usize, include_embeddings: bool) -> Result<Vec<StoredRecord>> {
        let page_size = page_size.max(1);
        let mut records = Vec::new();

        loop {
            let page = self
                .get(&GetRequest {
                    ids: None,
                    limit: Some(page_size),
                    offset: records.len(),
                    include_embeddings,
                })
                .await?;

            let done = page.len() < page_size;
            records.extend(page);
            if done {
                break;
            }
        }

        Ok(records)
    }

    /// Nearest records to the request's embedding, closest first
    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryHit>>;
}
