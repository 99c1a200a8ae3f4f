//! Chroma implementation for vector storage
//!
//! Talks to a Chroma-compatible server over its v2 HTTP API. Collection
//! ids are resolved by name and cached for the operations that address a
//! collection by id.
//!
//! Author: hephaex@gmail.com

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use codevec_core::{normalize_metadata, CodevecError, DatabaseConfig, Metadata, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    CollectionInfo, CollectionSettings, GetRequest, QueryHit, QueryRequest, StoredRecord,
    VectorRecord, VectorStore,
};

/// Chroma vector store implementation
pub struct ChromaStore {
    client: Client,
    base_url: String,
    tenant: String,
    database: String,
    collection: String,
    collection_id: Mutex<Option<String>>,
}

impl ChromaStore {
    /// Create a store for the configured server and collection
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CodevecError::ConnectionError(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            tenant: config.tenant.clone(),
            database: config.database.clone(),
            collection: config.collection.clone(),
            collection_id: Mutex::new(None),
        })
    }

    /// Create a store with the default tenant and database
    pub fn from_url(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tenant: "default_tenant".to_string(),
            database: "default_database".to_string(),
            collection: collection.into(),
            collection_id: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collections_url(&self) -> String {
        format!(
            "{}/api/v2/tenants/{}/databases/{}/collections",
            self.base_url, self.tenant, self.database
        )
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.collections_url(), self.collection)
    }

    fn operation_url(&self, collection_id: &str, operation: &str) -> String {
        format!("{}/{collection_id}/{operation}", self.collections_url())
    }

    fn cached_id(&self) -> Option<String> {
        self.collection_id.lock().ok().and_then(|id| id.clone())
    }

    fn remember(&self, id: Option<String>) {
        if let Ok(mut cached) = self.collection_id.lock() {
            *cached = id;
        }
    }

    async fn resolve_id(&self) -> Result<String> {
        match self.cached_id() {
            Some(id) => Ok(id),
            None => Ok(self.get_collection().await?.id),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                CodevecError::ConnectionError(format!("{} unreachable: {e}", self.base_url))
            } else {
                CodevecError::DatabaseError(format!("Request to {} failed: {e}", self.base_url))
            }
        })
    }

    /// Pass successful responses through; map failures to errors.
    ///
    /// A not-found answer means the collection is absent only when the
    /// request addressed the collection itself.
    async fn check(
        &self,
        response: Response,
        target: Target,
        on_error: fn(String) -> CodevecError,
    ) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if target == Target::Collection && is_missing(status, &body) {
            self.remember(None);
            return Err(CodevecError::CollectionNotFound(self.collection.clone()));
        }

        Err(on_error(format!(
            "Chroma API error {}: {}",
            status.as_u16(),
            body.trim()
        )))
    }

    async fn create(
        &self,
        settings: &CollectionSettings,
        get_or_create: bool,
    ) -> Result<CollectionInfo> {
        let body = json!({
            "name": self.collection,
            "metadata": settings.to_metadata(),
            "get_or_create": get_or_create,
        });

        let response = self
            .send(self.client.post(self.collections_url()).json(&body))
            .await?;
        let response = self
            .check(response, Target::Database, CodevecError::DatabaseError)
            .await?;
        let raw: RawCollection = decode(response).await?;
        let info = CollectionInfo::from(raw);

        tracing::debug!(collection = %info.name, id = %info.id, "Collection ready");
        self.remember(Some(info.id.clone()));
        Ok(info)
    }
}

/// What a request addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// The tenant's database, e.g. collection creation
    Database,
    /// The named collection or its records
    Collection,
}

fn is_missing(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND
        || body.contains("does not exist")
        || body.contains("NotFoundError")
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| CodevecError::DatabaseError(format!("Failed to parse Chroma response: {e}")))
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawCollection {
    id: String,
    name: String,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl From<RawCollection> for CollectionInfo {
    fn from(raw: RawCollection) -> Self {
        Self {
            id: raw.id,
            name: raw.name,
            metadata: raw.metadata.as_ref().map(normalize_metadata),
        }
    }
}

#[derive(Debug, Serialize)]
struct UpsertBody<'a> {
    ids: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    documents: Vec<&'a str>,
    // Chroma rejects empty metadata maps, so those are sent as null
    metadatas: Vec<Option<&'a Metadata>>,
}

#[derive(Debug, Serialize)]
struct GetBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<usize>,
    include: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Map<String, Value>>>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    where_clause: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    where_document: Option<Value>,
    include: [&'static str; 3],
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

impl GetResponse {
    fn into_records(self) -> Vec<StoredRecord> {
        let mut documents = self.documents.unwrap_or_default().into_iter();
        let mut metadatas = self.metadatas.unwrap_or_default().into_iter();
        let mut embeddings = self.embeddings.unwrap_or_default().into_iter();

        self.ids
            .into_iter()
            .map(|id| StoredRecord {
                id,
                document: documents.next().flatten(),
                metadata: metadatas
                    .next()
                    .flatten()
                    .map(|m| normalize_metadata(&m))
                    .unwrap_or_default(),
                embedding: embeddings.next(),
            })
            .collect()
    }
}

impl QueryResponse {
    /// Hits for the first (only) query embedding
    fn into_hits(self) -> Vec<QueryHit> {
        let mut documents = first_row(self.documents).into_iter();
        let mut metadatas = first_row(self.metadatas).into_iter();
        let mut distances = first_row(self.distances).into_iter();

        first_row(Some(self.ids))
            .into_iter()
            .map(|id| QueryHit {
                id,
                document: documents.next().flatten(),
                metadata: metadatas
                    .next()
                    .flatten()
                    .map(|m| normalize_metadata(&m))
                    .unwrap_or_default(),
                distance: distances.next().flatten().unwrap_or(f32::NAN),
            })
            .collect()
    }
}

fn first_row<T>(rows: Option<Vec<Vec<T>>>) -> Vec<T> {
    rows.and_then(|r| r.into_iter().next()).unwrap_or_default()
}

// ============================================================================
// VectorStore implementation
// ============================================================================

#[async_trait]
impl super::VectorStore for ChromaStore {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn heartbeat(&self) -> Result<()> {
        let url = format!("{}/api/v2/heartbeat", self.base_url);
        let response = self.send(self.client.get(&url)).await?;

        if !response.status().is_success() {
            return Err(CodevecError::ConnectionError(format!(
                "Heartbeat to {} returned {}",
                self.base_url,
                response.status()
            )));
        }

        tracing::debug!(url = %self.base_url, "Vector database reachable");
        Ok(())
    }

    async fn get_collection(&self) -> Result<CollectionInfo> {
        let response = self.send(self.client.get(self.collection_url())).await?;
        let response = self
            .check(response, Target::Collection, CodevecError::DatabaseError)
            .await?;
        let info = CollectionInfo::from(decode::<RawCollection>(response).await?);

        self.remember(Some(info.id.clone()));
        Ok(info)
    }

    async fn create_collection(&self, settings: &CollectionSettings) -> Result<CollectionInfo> {
        self.create(settings, false).await
    }

    async fn get_or_create_collection(
        &self,
        settings: &CollectionSettings,
    ) -> Result<CollectionInfo> {
        self.create(settings, true).await
    }

    async fn delete_collection(&self) -> Result<bool> {
        let response = self.send(self.client.delete(self.collection_url())).await?;
        self.remember(None);

        let checked = self
            .check(response, Target::Collection, CodevecError::DatabaseError)
            .await;
        match checked {
            Ok(_) => Ok(true),
            Err(CodevecError::CollectionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let id = self.resolve_id().await?;
        let body = UpsertBody {
            ids: records.iter().map(|r| r.id.as_str()).collect(),
            embeddings: records.iter().map(|r| r.embedding.as_slice()).collect(),
            documents: records.iter().map(|r| r.document.as_str()).collect(),
            metadatas: records
                .iter()
                .map(|r| (!r.metadata.is_empty()).then_some(&r.metadata))
                .collect(),
        };

        let response = self
            .send(self.client.post(self.operation_url(&id, "upsert")).json(&body))
            .await?;
        self.check(response, Target::Collection, CodevecError::DatabaseError)
            .await?;

        tracing::trace!(count = records.len(), "Upserted records");
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let id = self.resolve_id().await?;
        let response = self
            .send(self.client.get(self.operation_url(&id, "count")))
            .await?;
        let response = self
            .check(response, Target::Collection, CodevecError::DatabaseError)
            .await?;

        decode(response).await
    }

    async fn get(&self, request: &GetRequest) -> Result<Vec<StoredRecord>> {
        let id = self.resolve_id().await?;

        let mut include = vec!["documents", "metadatas"];
        if request.include_embeddings {
            include.push("embeddings");
        }

        let body = GetBody {
            ids: request.ids.as_deref(),
            limit: request.limit,
            offset: (request.offset > 0).then_some(request.offset),
            include,
        };

        let response = self
            .send(self.client.post(self.operation_url(&id, "get")).json(&body))
            .await?;
        let response = self
            .check(response, Target::Collection, CodevecError::DatabaseError)
            .await?;
        let result: GetResponse = decode(response).await?;

        Ok(result.into_records())
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryHit>> {
        if request.n_results == 0 {
            return Ok(Vec::new());
        }

        let id = self.resolve_id().await?;
        let body = QueryBody {
            query_embeddings: [request.embedding.as_slice()],
            n_results: request.n_results,
            where_clause: request
                .metadata_filter
                .as_ref()
                .and_then(|filter| filter.to_where()),
            where_document: request
                .document_filter
                .as_ref()
                .map(|filter| filter.to_where_document()),
            include: ["documents", "metadatas", "distances"],
        };

        let response = self
            .send(self.client.post(self.operation_url(&id, "query")).json(&body))
            .await?;
        let response = self
            .check(response, Target::Collection, CodevecError::SearchError)
            .await?;
        let result: QueryResponse = decode(response).await?;

        Ok(result.into_hits())
    }
}

// ============================================================================
// Tests
// ============================================================================
