//! Chunk loader
//!
//! Reads the chunk file, (re)creates the collection, embeds and uploads
//! the chunks in fixed-size batches, then runs a couple of smoke queries
//! to show the collection is searchable.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use codevec_core::{
    prepare_metadata, ChunkRecord, CodevecError, DistanceFunction, LoaderConfig, Result,
};
use codevec_vector::{
    CollectionInfo, CollectionSettings, EmbeddingClient, MetadataFilter, QueryRequest,
    VectorRecord, VectorStore,
};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Number of hits requested by each smoke query
const SAMPLE_TOP_K: usize = 3;

/// Outcome of a load run
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    /// Chunks read from the input file
    pub chunks_read: usize,
    /// Chunks upserted into the collection
    pub uploaded: usize,
    pub batches: usize,
    pub elapsed: Duration,
    /// Item count after upload; `None` when verification failed
    pub final_count: Option<usize>,
}

/// Read a JSON array of chunk records
pub fn read_chunks(path: &Path) -> Result<Vec<ChunkRecord>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CodevecError::InputNotFound(path.to_path_buf()));
        }
        Err(e) => {
            return Err(CodevecError::InvalidInput {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    };

    serde_json::from_str(&content).map_err(|e| CodevecError::InvalidInput {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Uploads chunk records into one collection
pub struct Loader<'a> {
    store: &'a dyn VectorStore,
    embedder: &'a dyn EmbeddingClient,
    config: &'a LoaderConfig,
    distance: DistanceFunction,
}

impl<'a> Loader<'a> {
    pub fn new(
        store: &'a dyn VectorStore,
        embedder: &'a dyn EmbeddingClient,
        config: &'a LoaderConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            distance: DistanceFunction::default(),
        }
    }

    /// Similarity space used when the collection is created
    pub fn with_distance(mut self, distance: DistanceFunction) -> Self {
        self.distance = distance;
        self
    }

    fn settings(&self) -> CollectionSettings {
        CollectionSettings::new(self.config.search_ef, self.distance)
            .with_embedding_model(self.embedder.model())
    }

    /// Make the target collection ready for upload.
    ///
    /// With `reset_collection` the collection is empty afterwards whatever
    /// its prior state; otherwise an existing collection is reused.
    pub async fn prepare_collection(&self) -> Result<CollectionInfo> {
        let settings = self.settings();
        if self.config.reset_collection {
            self.store.create_or_reset(&settings).await
        } else {
            self.store.get_or_create_collection(&settings).await
        }
    }

    /// Embed and upsert `chunks` batch by batch. Returns (uploaded, batches).
    pub async fn upload(
        &self,
        chunks: &[ChunkRecord],
        out: &mut dyn Write,
    ) -> Result<(usize, usize)> {
        let batch_size = self.config.batch_size.max(1);
        let mut uploaded = 0;
        let mut batches = 0;

        for (index, batch) in chunks.chunks(batch_size).enumerate() {
            let started = Instant::now();
            let documents: Vec<String> = batch.iter().map(|c| c.document.clone()).collect();
            let embeddings = self.embedder.embed_batch(&documents).await?;
            if embeddings.len() != batch.len() {
                return Err(CodevecError::EmbeddingError(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }
            self.check_dimensions(&embeddings)?;

            let records: Vec<VectorRecord> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| VectorRecord {
                    id: chunk.id.clone(),
                    document: chunk.document.clone(),
                    metadata: prepare_metadata(&chunk.metadata),
                    embedding,
                })
                .collect();

            self.store.upsert(&records).await?;
            uploaded += records.len();
            batches += 1;

            debug!(
                batch = index + 1,
                size = records.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Uploaded batch"
            );
            writeln!(
                out,
                "Added batch {}: {}/{} chunks (embeddings generated)",
                index + 1,
                uploaded,
                chunks.len()
            )?;
        }

        Ok((uploaded, batches))
    }

    /// Reject vectors whose length differs from the model's known dimension
    fn check_dimensions(&self, embeddings: &[Vec<f32>]) -> Result<()> {
        let Some(expected) = self.embedder.dimension() else {
            return Ok(());
        };

        match embeddings.iter().find(|e| e.len() != expected) {
            Some(bad) => Err(CodevecError::EmbeddingError(format!(
                "Model {} returned a {}-dimensional vector, expected {expected}",
                self.embedder.model(),
                bad.len()
            ))),
            None => Ok(()),
        }
    }

    /// Print the collection count and run the smoke queries
    pub async fn verify(&self, chunks: &[ChunkRecord], out: &mut dyn Write) -> Result<usize> {
        let count = self.store.count().await?;
        writeln!(out, "\nVerification: Collection now contains {count} items")?;

        writeln!(out, "\n=== Sample Query Capabilities ===")?;
        self.sample_query(
            out,
            "find function declarations",
            "function",
            MetadataFilter::new().field_eq("entity_type", "function"),
        )
        .await?;

        let package = chunks
            .first()
            .and_then(|c| c.metadata.get("package_name"))
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty());
        if let Some(package) = package {
            self.sample_query(
                out,
                &format!("code related to {package}"),
                &format!("package '{package}'"),
                MetadataFilter::new().field_eq("package_name", package),
            )
            .await?;
        }

        Ok(count)
    }

    async fn sample_query(
        &self,
        out: &mut dyn Write,
        text: &str,
        label: &str,
        filter: MetadataFilter,
    ) -> Result<()> {
        let embedding = self.embedder.embed(text).await?;
        let hits = self
            .store
            .query(&QueryRequest::new(embedding, SAMPLE_TOP_K).with_metadata_filter(filter))
            .await?;

        writeln!(out, "\nFound {} results for {label}", hits.len())?;
        if let Some(first) = hits.first() {
            let snippet: String = first
                .document
                .as_deref()
                .unwrap_or("")
                .chars()
                .take(100)
                .collect();
            writeln!(out, "Sample result: {snippet}...")?;
            let metadata = serde_json::to_string(&first.metadata)
                .map_err(|e| CodevecError::Other(e.into()))?;
            writeln!(out, "Metadata: {metadata}")?;
        }
        Ok(())
    }

    /// Prepare, upload and verify. Verification failures are reported
    /// but do not fail the run.
    pub async fn run(&self, chunks: &[ChunkRecord], out: &mut dyn Write) -> Result<LoadReport> {
        let collection = self.prepare_collection().await?;
        info!(
            collection = %collection.name,
            id = %collection.id,
            reset = self.config.reset_collection,
            "Collection ready"
        );
        writeln!(
            out,
            "Collection '{}' ready (search_ef={}, space={})",
            collection.name,
            self.config.search_ef,
            self.distance
        )?;

        let started = Instant::now();
        let (uploaded, batches) = self.upload(chunks, out).await?;
        let elapsed = started.elapsed();

        writeln!(
            out,
            "\nSuccessfully added all {uploaded} chunks with embeddings to the '{}' collection.",
            collection.name
        )?;
        writeln!(
            out,
            "Time taken to feed all chunks: {:.2} seconds",
            elapsed.as_secs_f64()
        )?;

        let final_count = match self.verify(chunks, out).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(error = %e, "Verification failed");
                writeln!(
                    out,
                    "Could not retrieve collection count or perform sample queries: {e}"
                )?;
                None
            }
        };

        Ok(LoadReport {
            chunks_read: chunks.len(),
            uploaded,
            batches,
            elapsed,
            final_count,
        })
    }
}

/// Read `path` and load its chunks into the store's collection
pub async fn load_file(
    path: &Path,
    loader: &Loader<'_>,
    out: &mut dyn Write,
) -> Result<LoadReport> {
    let chunks = read_chunks(path)?;
    writeln!(out, "Loaded {} chunks from {}", chunks.len(), path.display())?;

    loader.store.heartbeat().await?;
    writeln!(out, "Connected to the vector database")?;

    let report = loader.run(&chunks, out).await?;

    writeln!(out, "\n=== Ready for semantic search! ===")?;
    writeln!(out, "Try: codevec query --type semantic")?;
    Ok(report)
}
