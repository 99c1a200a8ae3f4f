//! Loader, dumper and query runner tests
//!
//! These run against the in-memory store with a deterministic embedder,
//! so no vector database or embedding service is needed.
//!
//! Author: hephaex@gmail.com

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use codevec_cli::{dump_collection, load_file, run_queries, Loader, QueryKind, QueryMode};
use codevec_core::{
    CodevecError, DistanceFunction, LoaderConfig, MetadataValue, QueryConfig, Result,
};
use codevec_vector::{
    CollectionInfo, CollectionSettings, EmbeddingClient, GetRequest, MemoryStore, QueryHit,
    QueryRequest, StoredRecord, VectorRecord, VectorStore,
};
use tempfile::NamedTempFile;

const DIM: usize = 16;

/// Bag-of-bytes embedding: similar texts land close together
struct HashEmbedder;

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; DIM];
        for byte in text.bytes() {
            vector[byte as usize % DIM] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> Option<usize> {
        Some(DIM)
    }

    fn model(&self) -> &str {
        "hash-16"
    }
}

/// Claims a dimension its vectors do not have
struct MislabeledEmbedder;

#[async_trait]
impl EmbeddingClient for MislabeledEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        HashEmbedder.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        HashEmbedder.embed_batch(texts).await
    }

    fn dimension(&self) -> Option<usize> {
        Some(384)
    }

    fn model(&self) -> &str {
        "all-minilm"
    }
}

/// In-memory store with injectable failures
struct FaultyStore {
    inner: MemoryStore,
    server_down: bool,
    document_search_broken: bool,
}

impl FaultyStore {
    fn server_down() -> Self {
        Self {
            inner: MemoryStore::new("go_code_chunks"),
            server_down: true,
            document_search_broken: false,
        }
    }

    fn broken_document_search() -> Self {
        Self {
            inner: MemoryStore::new("go_code_chunks"),
            server_down: false,
            document_search_broken: true,
        }
    }
}

#[async_trait]
impl VectorStore for FaultyStore {
    fn collection_name(&self) -> &str {
        self.inner.collection_name()
    }

    async fn heartbeat(&self) -> Result<()> {
        if self.server_down {
            return Err(CodevecError::ConnectionError(
                "http://127.0.0.1:1 unreachable: connection refused".to_string(),
            ));
        }
        self.inner.heartbeat().await
    }

    async fn get_collection(&self) -> Result<CollectionInfo> {
        self.inner.get_collection().await
    }

    async fn create_collection(&self, settings: &CollectionSettings) -> Result<CollectionInfo> {
        self.inner.create_collection(settings).await
    }

    async fn get_or_create_collection(
        &self,
        settings: &CollectionSettings,
    ) -> Result<CollectionInfo> {
        self.inner.get_or_create_collection(settings).await
    }

    async fn delete_collection(&self) -> Result<bool> {
        self.inner.delete_collection().await
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        self.inner.upsert(records).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    async fn get(&self, request: &GetRequest) -> Result<Vec<StoredRecord>> {
        self.inner.get(request).await
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryHit>> {
        if self.document_search_broken && request.document_filter.is_some() {
            return Err(CodevecError::SearchError(
                "Invalid where_document clause".to_string(),
            ));
        }
        self.inner.query(request).await
    }
}

fn write_chunks(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn sample_chunks() -> NamedTempFile {
    write_chunks(
        r#"[
        {"id": "c1", "document": "func Foo(){}",
         "metadata": {"entity_type": "function", "package_name": "main",
                      "file_path": "main.go", "start_line": 3, "end_line": 3,
                      "imports": ["fmt", "os"]}},
        {"id": "c2", "document": "type EndpointsHandler interface { OnEndpointsAdd() }",
         "metadata": {"entity_type": "type", "package_name": "config",
                      "import_pkg": "k8s.io/kubernetes/pkg/proxy/config",
                      "symbol_name": "EndpointsHandler",
                      "position": {"line": 12, "column": 1}}},
        {"id": "c3", "document": "func (c *EndpointsConfig) Run(stopCh <-chan struct{}) {}",
         "metadata": {"entity_type": "method", "package_name": "config"}}
    ]"#,
    )
}

fn loader_config(batch_size: usize) -> LoaderConfig {
    LoaderConfig {
        batch_size,
        ..LoaderConfig::default()
    }
}

async fn load(store: &dyn VectorStore, path: &Path, batch_size: usize) -> (usize, String) {
    let config = loader_config(batch_size);
    let loader = Loader::new(store, &HashEmbedder, &config);
    let mut out = Vec::new();
    let report = load_file(path, &loader, &mut out).await.unwrap();
    (report.uploaded, String::from_utf8(out).unwrap())
}

// =============================================================================
// Loader
// =============================================================================

#[tokio::test]
async fn test_load_reports_batches() {
    let store = MemoryStore::new("go_code_chunks");
    let file = sample_chunks();

    let (uploaded, output) = load(&store, file.path(), 2).await;

    assert_eq!(uploaded, 3);
    assert!(output.contains("Added batch 1: 2/3 chunks"));
    assert!(output.contains("Added batch 2: 3/3 chunks"));
    assert!(output.contains("Verification: Collection now contains 3 items"));
    assert!(output.contains("Time taken to feed all chunks:"));
    assert_eq!(store.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_load_round_trip_by_id() {
    let store = MemoryStore::new("go_code_chunks");
    let file = sample_chunks();
    load(&store, file.path(), 100).await;

    let records = store
        .get(&GetRequest {
            ids: Some(vec!["c1".to_string()]),
            ..GetRequest::default()
        })
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.document.as_deref(), Some("func Foo(){}"));
    assert_eq!(
        record.metadata["entity_type"],
        MetadataValue::from("function")
    );
    assert_eq!(record.metadata["start_line"], MetadataValue::Int(3));
    assert_eq!(record.metadata["file_path"], MetadataValue::from("main.go"));
    assert_eq!(record.metadata["imports"], MetadataValue::from("fmt, os"));
}

#[tokio::test]
async fn test_load_nested_metadata_becomes_json_text() {
    let store = MemoryStore::new("go_code_chunks");
    let file = sample_chunks();
    load(&store, file.path(), 100).await;

    let records = store
        .get(&GetRequest {
            ids: Some(vec!["c2".to_string()]),
            ..GetRequest::default()
        })
        .await
        .unwrap();

    let position = records[0].metadata["position"].as_str().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(position).unwrap();
    assert_eq!(parsed, serde_json::json!({"line": 12, "column": 1}));
}

#[tokio::test]
async fn test_load_twice_is_idempotent() {
    let store = MemoryStore::new("go_code_chunks");
    let file = sample_chunks();

    load(&store, file.path(), 100).await;
    let first = store.count().await.unwrap();
    load(&store, file.path(), 1).await;

    assert_eq!(store.count().await.unwrap(), first);
}

#[tokio::test]
async fn test_load_without_reset_keeps_existing_records() {
    let store = MemoryStore::new("go_code_chunks");
    load(&store, sample_chunks().path(), 100).await;

    let extra = write_chunks(r#"[{"id": "c9", "document": "func Extra(){}"}]"#);
    let config = LoaderConfig {
        reset_collection: false,
        ..LoaderConfig::default()
    };
    let loader = Loader::new(&store, &HashEmbedder, &config);
    let report = load_file(extra.path(), &loader, &mut Vec::new())
        .await
        .unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(report.final_count, Some(4));
}

#[tokio::test]
async fn test_load_empty_input() {
    let store = MemoryStore::new("go_code_chunks");
    let file = write_chunks("[]");
    let config = LoaderConfig::default();
    let loader = Loader::new(&store, &HashEmbedder, &config);

    let report = load_file(file.path(), &loader, &mut Vec::new())
        .await
        .unwrap();

    assert_eq!(report.chunks_read, 0);
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.batches, 0);
    assert_eq!(report.final_count, Some(0));
}

#[tokio::test]
async fn test_load_records_collection_settings() {
    let store = MemoryStore::new("go_code_chunks");
    let config = LoaderConfig::default();
    let loader =
        Loader::new(&store, &HashEmbedder, &config).with_distance(DistanceFunction::Cosine);

    loader.prepare_collection().await.unwrap();
    let info = store.get_collection().await.unwrap();

    assert_eq!(info.embedding_model(), Some("hash-16"));
    assert_eq!(info.distance(), DistanceFunction::Cosine);
    assert_eq!(
        info.metadata.unwrap()["hnsw:search_ef"],
        MetadataValue::Int(100)
    );
}

#[tokio::test]
async fn test_load_missing_file_aborts() {
    let store = MemoryStore::new("go_code_chunks");
    let config = LoaderConfig::default();
    let loader = Loader::new(&store, &HashEmbedder, &config);

    let err = load_file(Path::new("/nonexistent/chunks.json"), &loader, &mut Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CodevecError::InputNotFound(_)));
    assert!(store.get_collection().await.is_err());
}

#[tokio::test]
async fn test_load_malformed_json_aborts() {
    let store = MemoryStore::new("go_code_chunks");
    let file = write_chunks(r#"[{"id": "c1", "document": }]"#);
    let config = LoaderConfig::default();
    let loader = Loader::new(&store, &HashEmbedder, &config);

    let err = load_file(file.path(), &loader, &mut Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CodevecError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_load_rejects_wrong_dimension() {
    let store = MemoryStore::new("go_code_chunks");
    let file = sample_chunks();
    let config = LoaderConfig::default();
    let loader = Loader::new(&store, &MislabeledEmbedder, &config);

    let err = load_file(file.path(), &loader, &mut Vec::new())
        .await
        .unwrap_err();

    assert!(
        matches!(&err, CodevecError::EmbeddingError(msg) if msg.contains("expected 384")),
        "unexpected error: {err:?}"
    );
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_load_unreachable_server_aborts() {
    let store = FaultyStore::server_down();
    let file = sample_chunks();
    let config = LoaderConfig::default();
    let loader = Loader::new(&store, &HashEmbedder, &config);
    let mut out = Vec::new();

    let err = load_file(file.path(), &loader, &mut out).await.unwrap_err();

    assert!(matches!(err, CodevecError::ConnectionError(_)));
    assert!(err.hint().is_some());
    assert!(store.inner.get_collection().await.is_err());
    assert!(!String::from_utf8(out).unwrap().contains("Added batch"));
}

// =============================================================================
// Query runner
// =============================================================================

#[tokio::test]
async fn test_query_unreachable_server_aborts() {
    let store = FaultyStore::server_down();

    let err = run_queries(
        &store,
        &HashEmbedder,
        &QueryConfig::default(),
        DistanceFunction::L2,
        QueryMode::All,
        &mut Vec::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CodevecError::ConnectionError(_)));
    assert!(err.hint().is_some());
    assert!(store.inner.get_collection().await.is_err());
}

#[tokio::test]
async fn test_function_filter_scenario() {
    let store = MemoryStore::new("go_code_chunks");
    let file = write_chunks(
        r#"[{"id":"c1","document":"func Foo(){}","metadata":{"entity_type":"function","package_name":"main"}}]"#,
    );
    load(&store, file.path(), 100).await;

    let mut filters = std::collections::BTreeMap::new();
    filters.insert("entity_type".to_string(), MetadataValue::from("function"));
    let config = QueryConfig {
        text: "find function declarations".to_string(),
        metadata_filters: filters,
        ..QueryConfig::default()
    };

    let outcomes = run_queries(
        &store,
        &HashEmbedder,
        &config,
        DistanceFunction::L2,
        QueryMode::Metadata,
        &mut Vec::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcomes.len(), 1);
    let hits = outcomes[0].hits();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document.as_deref(), Some("func Foo(){}"));
}

#[tokio::test]
async fn test_all_modes_against_loaded_collection() {
    let store = MemoryStore::new("go_code_chunks");
    load(&store, sample_chunks().path(), 100).await;

    let config = QueryConfig {
        document_contains: "EndpointsHandler".to_string(),
        ..QueryConfig::default()
    };
    let mut out = Vec::new();
    let outcomes = run_queries(
        &store,
        &HashEmbedder,
        &config,
        DistanceFunction::L2,
        QueryMode::All,
        &mut out,
    )
    .await
    .unwrap();
    let output = String::from_utf8(out).unwrap();

    let kinds: Vec<QueryKind> = outcomes.iter().map(|o| o.kind).collect();
    assert_eq!(
        kinds,
        vec![QueryKind::Semantic, QueryKind::Metadata, QueryKind::Document]
    );
    assert_eq!(outcomes[0].hits().len(), 3);
    assert_eq!(outcomes[1].hits().len(), 1);
    assert_eq!(outcomes[1].hits()[0].id, "c2");
    assert_eq!(outcomes[2].hits().len(), 1);

    assert!(output.contains("Document count: 3"));
    assert!(output.contains("Import Pkg: k8s.io/kubernetes/pkg/proxy/config"));
    assert!(output.contains("Symbol Name: EndpointsHandler"));
    assert!(output.contains("Import Pkg: N/A"));
}

#[tokio::test]
async fn test_query_nonexistent_collection_has_no_results() {
    let store = MemoryStore::new("never_loaded");
    let mut out = Vec::new();

    let outcomes = run_queries(
        &store,
        &HashEmbedder,
        &QueryConfig::default(),
        DistanceFunction::L2,
        QueryMode::All,
        &mut out,
    )
    .await
    .unwrap();
    let output = String::from_utf8(out).unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| !o.is_err() && o.hits().is_empty()));
    assert_eq!(output.matches("No relevant snippets found").count(), 3);
    assert!(output.contains("Document count: 0"));
}

#[tokio::test]
async fn test_failing_query_is_skipped() {
    let store = FaultyStore::broken_document_search();
    load(&store, sample_chunks().path(), 100).await;
    let mut out = Vec::new();

    let outcomes = run_queries(
        &store,
        &HashEmbedder,
        &QueryConfig::default(),
        DistanceFunction::L2,
        QueryMode::All,
        &mut out,
    )
    .await
    .unwrap();
    let output = String::from_utf8(out).unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(!outcomes[0].is_err());
    assert!(!outcomes[1].is_err());
    assert!(outcomes[2].is_err());
    assert!(output.contains("An error occurred during Document Content Filtered Search"));
}

// =============================================================================
// Dumper
// =============================================================================

#[tokio::test]
async fn test_dump_prints_every_record() {
    let store = MemoryStore::new("go_code_chunks");
    load(&store, sample_chunks().path(), 100).await;
    let mut out = Vec::new();

    let dumped = dump_collection(&store, 2, &mut out).await.unwrap();
    let output = String::from_utf8(out).unwrap();

    assert_eq!(dumped, 3);
    assert!(output.contains("--- Chunks in Collection 'go_code_chunks' (3 total) ---"));
    assert!(output.contains("Chunk ID: c1\n  Content:\nfunc Foo(){}\n"));
    assert_eq!(output.matches("Chunk ID:").count(), 3);
    assert_eq!(output.matches("------------------------------\n").count(), 3);
}

#[tokio::test]
async fn test_dump_empty_collection() {
    let store = MemoryStore::new("go_code_chunks");
    store
        .create_collection(&CollectionSettings::new(100, DistanceFunction::L2))
        .await
        .unwrap();
    let mut out = Vec::new();

    let dumped = dump_collection(&store, 1000, &mut out).await.unwrap();

    assert_eq!(dumped, 0);
    assert!(String::from_utf8(out)
        .unwrap()
        .contains("No chunks found in the collection 'go_code_chunks'."));
}

#[tokio::test]
async fn test_dump_unreachable_server_aborts() {
    let store = FaultyStore::server_down();

    let err = dump_collection(&store, 1000, &mut Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CodevecError::ConnectionError(_)));
    assert!(err.hint().is_some());
}

#[tokio::test]
async fn test_dump_missing_collection_aborts() {
    let store = MemoryStore::new("go_code_chunks");

    let err = dump_collection(&store, 1000, &mut Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CodevecError::CollectionNotFound(_)));
}
