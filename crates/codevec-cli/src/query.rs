//! Query runner
//!
//! Runs up to three searches against one collection with a single query
//! embedding: pure semantic ranking, ranking restricted by metadata
//! equality, and ranking restricted by a document substring.

use std::io::Write;

use clap::ValueEnum;
use codevec_core::{DistanceFunction, QueryConfig, Result};
use codevec_vector::{
    CollectionSettings, DocumentFilter, EmbeddingClient, MetadataFilter, QueryHit, QueryRequest,
    VectorStore,
};
use tracing::{info, warn};

use crate::render::write_hit;

/// Which searches to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum QueryMode {
    Semantic,
    Metadata,
    Document,
    #[default]
    All,
}

impl QueryMode {
    pub fn kinds(self) -> &'static [QueryKind] {
        match self {
            Self::Semantic => &[QueryKind::Semantic],
            Self::Metadata => &[QueryKind::Metadata],
            Self::Document => &[QueryKind::Document],
            Self::All => &[QueryKind::Semantic, QueryKind::Metadata, QueryKind::Document],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Metadata => "metadata",
            Self::Document => "document",
            Self::All => "all",
        }
    }
}

/// A single search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Semantic,
    Metadata,
    Document,
}

impl QueryKind {
    fn title(self) -> &'static str {
        match self {
            Self::Semantic => "Semantic Search",
            Self::Metadata => "Metadata Filtered Search",
            Self::Document => "Document Content Filtered Search",
        }
    }
}

/// Result of one search; failures are kept so the caller can report them
#[derive(Debug)]
pub struct QueryOutcome {
    pub kind: QueryKind,
    pub result: Result<Vec<QueryHit>>,
}

impl QueryOutcome {
    /// Hits, or an empty slice when the search failed
    pub fn hits(&self) -> &[QueryHit] {
        self.result.as_deref().unwrap_or(&[])
    }

    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }
}

/// Runs the configured searches against a ready collection
pub struct QueryRunner<'a> {
    store: &'a dyn VectorStore,
    embedder: &'a dyn EmbeddingClient,
    config: &'a QueryConfig,
}

impl<'a> QueryRunner<'a> {
    pub fn new(
        store: &'a dyn VectorStore,
        embedder: &'a dyn EmbeddingClient,
        config: &'a QueryConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Build the request for one search kind
    pub fn request(&self, kind: QueryKind, embedding: Vec<f32>) -> QueryRequest {
        match kind {
            QueryKind::Semantic => QueryRequest::new(embedding, self.config.semantic_top_k),
            QueryKind::Metadata => {
                let request = QueryRequest::new(embedding, self.config.filtered_top_k);
                let filter: MetadataFilter = self
                    .config
                    .metadata_filters
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                if filter.is_empty() {
                    request
                } else {
                    request.with_metadata_filter(filter)
                }
            }
            QueryKind::Document => QueryRequest::new(embedding, self.config.filtered_top_k)
                .with_document_filter(DocumentFilter::contains(&self.config.document_contains)),
        }
    }

    fn write_header(&self, kind: QueryKind, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "\n--- Running {} ---", kind.title())?;
        match kind {
            QueryKind::Semantic => writeln!(out, "Query: '{}'", self.config.text),
            QueryKind::Metadata => {
                let conditions: Vec<String> = self
                    .config
                    .metadata_filters
                    .iter()
                    .map(|(key, value)| format!("{key} = '{value}'"))
                    .collect();
                writeln!(out, "Filtering by metadata: {}", conditions.join(" AND "))
            }
            QueryKind::Document => writeln!(
                out,
                "Filtering by document content containing: '{}'",
                self.config.document_contains
            ),
        }
    }

    fn write_outcome(&self, outcome: &QueryOutcome, out: &mut dyn Write) -> std::io::Result<()> {
        match &outcome.result {
            Err(e) => writeln!(out, "An error occurred during {}: {e}", outcome.kind.title()),
            Ok(hits) if hits.is_empty() => writeln!(
                out,
                "No relevant snippets found for {}.",
                outcome.kind.title()
            ),
            Ok(hits) => {
                for (index, hit) in hits.iter().enumerate() {
                    write_hit(out, index + 1, hit, &self.config.display_fields)?;
                }
                Ok(())
            }
        }
    }

    /// Embed the query text once and run every search `mode` selects.
    ///
    /// Only an embedding failure aborts; a failing search is printed and
    /// the remaining searches still run.
    pub async fn run(&self, mode: QueryMode, out: &mut dyn Write) -> Result<Vec<QueryOutcome>> {
        writeln!(
            out,
            "\n--- Performing Search Queries (Type: {}) ---",
            mode.as_str().to_uppercase()
        )?;

        let embedding = self.embedder.embed(&self.config.text).await?;
        let mut outcomes = Vec::with_capacity(mode.kinds().len());

        for &kind in mode.kinds() {
            self.write_header(kind, out)?;
            let result = self
                .store
                .query(&self.request(kind, embedding.clone()))
                .await;
            if let Err(e) = &result {
                warn!(kind = ?kind, error = %e, "Query failed");
            }

            let outcome = QueryOutcome { kind, result };
            self.write_outcome(&outcome, out)?;
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

/// Connect, get or create the collection and run the selected searches
pub async fn run_queries(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingClient,
    config: &QueryConfig,
    distance: DistanceFunction,
    mode: QueryMode,
    out: &mut dyn Write,
) -> Result<Vec<QueryOutcome>> {
    store.heartbeat().await?;
    writeln!(out, "Successfully connected to the vector database")?;

    let settings = CollectionSettings::new(config.search_ef, distance)
        .with_embedding_model(embedder.model());
    let collection = store.get_or_create_collection(&settings).await?;

    if let Some(model) = collection.embedding_model() {
        if model != embedder.model() {
            warn!(
                collection_model = model,
                query_model = embedder.model(),
                "Collection was built with a different embedding model"
            );
        }
    }

    let count = store.count().await?;
    info!(collection = %collection.name, count, "Collection ready");
    writeln!(
        out,
        "Collection '{}' ready. Document count: {count}",
        collection.name
    )?;

    QueryRunner::new(store, embedder, config).run(mode, out).await
}
