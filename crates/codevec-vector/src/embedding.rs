//! Embedding client for generating vector representations
//!
//! Supports Ollama and OpenAI-compatible embedding APIs, and an
//! in-process all-MiniLM-L6-v2 model behind the `local-embeddings`
//! feature.
//!
//! Author: hephaex@gmail.com

use std::time::Duration;

use async_trait::async_trait;
use codevec_core::{CodevecError, EmbeddingConfig, EmbeddingProvider, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ============================================================================
// Embedding Trait
// ============================================================================

/// Turns text into fixed-length vectors
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed one text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts; output order matches input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Length of the vectors this model produces, when known
    fn dimension(&self) -> Option<usize>;

    /// Model identifier, recorded on collections built with it
    fn model(&self) -> &str;
}

/// Vector length of well-known embedding models
fn known_dimension(model: &str) -> Option<usize> {
    match model {
        "all-minilm" | "all-MiniLM-L6-v2" | "bge-small-en-v1.5" => Some(384),
        "nomic-embed-text" => Some(768),
        "mxbai-embed-large" => Some(1024),
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CodevecError::EmbeddingError(format!("HTTP client setup failed: {e}")))
}

/// Send a provider request and decode its JSON body
async fn call_provider<T: DeserializeOwned>(provider: &str, request: RequestBuilder) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| CodevecError::EmbeddingError(format!("{provider} request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CodevecError::EmbeddingError(format!(
            "{provider} returned {}: {}",
            status.as_u16(),
            body.trim()
        )));
    }

    response.json().await.map_err(|e| {
        CodevecError::EmbeddingError(format!("Unreadable {provider} response: {e}"))
    })
}

// ============================================================================
// OpenAI-compatible Client
// ============================================================================

/// Client for `/embeddings` on OpenAI or a compatible server
pub struct OpenAiEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiItem>,
}

#[derive(Debug, Deserialize)]
struct OpenAiItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedding {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
        }
    }

    /// Point at an OpenAI-compatible server
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Build from settings; an API key is required
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let Some(api_key) = &config.openai_api_key else {
            return Err(CodevecError::ConfigError(
                "OPENAI_API_KEY is required for the openai provider".to_string(),
            ));
        };

        let mut embedder = Self::new(api_key.clone(), config.model.clone());
        embedder.client = build_client(config.timeout_secs)?;
        if let Some(url) = &config.openai_base_url {
            embedder = embedder.with_base_url(url.clone());
        }
        Ok(embedder)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| CodevecError::EmbeddingError("Empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&OpenAiRequest {
                model: &self.model,
                input: texts,
            });
        let OpenAiResponse { mut data } = call_provider("OpenAI", request).await?;

        if data.len() != texts.len() {
            return Err(CodevecError::EmbeddingError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }

        // Items may arrive out of order
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }

    fn dimension(&self) -> Option<usize> {
        known_dimension(&self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Ollama Client
// ============================================================================

/// Client for a local Ollama server's `/api/embeddings`
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let mut embedder = Self::new(config.ollama_url.clone(), config.model.clone());
        embedder.client = build_client(config.timeout_secs)?;
        Ok(embedder)
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&OllamaRequest {
                model: &self.model,
                prompt: text,
            });
        let response: OllamaResponse = call_provider("Ollama", request).await?;
        Ok(response.embedding)
    }

    /// One request per text; the endpoint takes a single prompt
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> Option<usize> {
        known_dimension(&self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Local Embedding (fastembed)
// ============================================================================

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedding;

#[cfg(feature = "local-embeddings")]
mod local {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use codevec_core::{CodevecError, Result};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    use super::EmbeddingClient;

    /// In-process embedding model using ONNX runtime
    pub struct LocalEmbedding {
        model: Mutex<TextEmbedding>,
        name: String,
    }

    impl LocalEmbedding {
        pub fn new(model_name: &str) -> Result<Self> {
            let model = match model_name {
                "all-MiniLM-L6-v2" | "all-minilm" => EmbeddingModel::AllMiniLML6V2,
                "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
                other => {
                    return Err(CodevecError::ConfigError(format!(
                        "Unsupported local embedding model: {other}"
                    )))
                }
            };

            let options = InitOptions::new(model).with_show_download_progress(true);
            let model = TextEmbedding::try_new(options)
                .map_err(|e| CodevecError::EmbeddingError(format!("Model load failed: {e}")))?;

            Ok(Self {
                model: Mutex::new(model),
                name: model_name.to_string(),
            })
        }
    }

    #[async_trait]
    impl EmbeddingClient for LocalEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.embed_batch(&[text.to_string()])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| CodevecError::EmbeddingError("No embedding returned".to_string()))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut model = self
                .model
                .lock()
                .map_err(|_| CodevecError::EmbeddingError("Model lock poisoned".to_string()))?;
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| CodevecError::EmbeddingError(format!("Encoding failed: {e}")))
        }

        fn dimension(&self) -> Option<usize> {
            super::known_dimension(&self.name)
        }

        fn model(&self) -> &str {
            &self.name
        }
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Build the client selected by `config.provider`
pub fn create_embedding_client(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    match config.provider {
        EmbeddingProvider::OpenAI => Ok(Box::new(OpenAiEmbedding::from_config(config)?)),
        EmbeddingProvider::Ollama => Ok(Box::new(OllamaEmbedding::from_config(config)?)),
        #[cfg(feature = "local-embeddings")]
        EmbeddingProvider::Local => Ok(Box::new(LocalEmbedding::new(&config.model)?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProvider::Local => Err(CodevecError::ConfigError(
            "Local embeddings require building with the `local-embeddings` feature".to_string(),
        )),
    }
}

// ============================================================================
// Tests
// ============================================================================
