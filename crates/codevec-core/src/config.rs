//! codevec Configuration Management
//!
//! Handles configuration from a TOML file and environment variables,
//! with defaults matching a local development setup (vector database on
//! `localhost:8080`, collection `go_code_chunks`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::{DistanceFunction, MetadataValue};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Vector database connection
    pub database: DatabaseConfig,

    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Loader settings
    pub loader: LoaderConfig,

    /// Dumper settings
    pub dump: DumpConfig,

    /// Query runner settings
    pub query: QueryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Resolve the effective configuration: defaults, then the optional
    /// file, then environment overrides. The result is validated.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let config = config.with_env_override()?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Database
        if let Some(host) = lookup("CODEVEC_HOST") {
            self.database.host = host;
        }
        if let Some(port) = lookup("CODEVEC_PORT") {
            self.database.port = parse_value("CODEVEC_PORT", port)?;
        }
        if let Some(collection) = lookup("CODEVEC_COLLECTION") {
            self.database.collection = collection;
        }

        // Loader
        if let Some(path) = lookup("CODEVEC_INPUT") {
            self.loader.input_path = PathBuf::from(path);
        }
        if let Some(size) = lookup("CODEVEC_BATCH_SIZE") {
            self.loader.batch_size = parse_value("CODEVEC_BATCH_SIZE", size)?;
        }

        // Embedding
        if let Some(provider) = lookup("EMBEDDING_PROVIDER") {
            self.embedding.provider = provider.parse()?;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.embedding.ollama_url = url;
        }
        // Always use env for sensitive values
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.embedding.openai_api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.embedding.openai_base_url = Some(url);
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(self)
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.collection.trim().is_empty() {
            return Err(ConfigError::MissingRequired("database.collection".to_string()));
        }
        if self.loader.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "loader.batch_size".to_string(),
                value: "0".to_string(),
            });
        }
        if self.dump.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "dump.page_size".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Vector database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Server host
    pub host: String,

    /// Server HTTP port
    pub port: u16,

    /// Tenant name
    pub tenant: String,

    /// Database name within the tenant
    pub database: String,

    /// Collection holding the code chunks
    pub collection: String,

    /// Similarity space used when creating the collection
    pub distance: DistanceFunction,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl DatabaseConfig {
    /// Base URL of the server
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            tenant: "default_tenant".to_string(),
            database: "default_database".to_string(),
            collection: "go_code_chunks".to_string(),
            distance: DistanceFunction::L2,
            timeout_secs: 60,
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider to use
    pub provider: EmbeddingProvider,

    /// Embedding model name
    pub model: String,

    /// Ollama server URL
    pub ollama_url: String,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for compatible APIs)
    pub openai_base_url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            // all-MiniLM-L6-v2 as packaged by Ollama
            model: "all-minilm".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Supported embedding providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Ollama,
    OpenAI,
    /// In-process ONNX model (requires the `local-embeddings` feature)
    Local,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "local" => Ok(Self::Local),
            _ => Err(ConfigError::InvalidValue {
                key: "EMBEDDING_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// JSON file of chunk records
    pub input_path: PathBuf,

    /// Records per upload request
    pub batch_size: usize,

    /// HNSW `search_ef` set on the created collection
    pub search_ef: u32,

    /// Drop and recreate the collection before loading
    pub reset_collection: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("code_chunks.json"),
            batch_size: 100,
            search_ef: 100,
            reset_collection: true,
        }
    }
}

/// Dumper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Records fetched per request while reading the whole collection
    pub page_size: usize,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self { page_size: 1000 }
    }
}

/// Query runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Text embedded once and shared by every query
    pub text: String,

    /// Results for the plain semantic query
    pub semantic_top_k: usize,

    /// Results for the filtered queries
    pub filtered_top_k: usize,

    /// HNSW `search_ef` used if the collection has to be created
    pub search_ef: u32,

    /// Exact-match conditions for the metadata query (all must hold)
    pub metadata_filters: BTreeMap<String, MetadataValue>,

    /// Substring the document query requires
    pub document_contains: String,

    /// Metadata fields printed for each result
    pub display_fields: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        let metadata_filters = BTreeMap::from([
            (
                "import_pkg".to_string(),
                MetadataValue::from("k8s.io/kubernetes/pkg/proxy/config"),
            ),
            (
                "symbol_name".to_string(),
                MetadataValue::from("EndpointsHandler"),
            ),
        ]);

        Self {
            text: "find code chunks related to kubernetes proxy config EndpointsHandler"
                .to_string(),
            semantic_top_k: 5,
            filtered_top_k: 20,
            search_ef: 150,
            metadata_filters,
            document_contains: "k8s.io/kubernetes/pkg/proxy/config.EndpointsHandler".to_string(),
            display_fields: vec![
                "file_path".to_string(),
                "import_pkg".to_string(),
                "symbol_name".to_string(),
            ],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.database.base_url(), "http://localhost:8080");
        assert_eq!(config.database.collection, "go_code_chunks");
        assert_eq!(config.loader.batch_size, 100);
        assert_eq!(config.query.semantic_top_k, 5);
        assert_eq!(config.query.filtered_top_k, 20);
        assert_eq!(config.query.metadata_filters.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = AppConfig::default()
            .with_overrides(lookup(&[
                ("CODEVEC_HOST", "chroma.internal"),
                ("CODEVEC_PORT", "8000"),
                ("CODEVEC_BATCH_SIZE", "25"),
                ("EMBEDDING_PROVIDER", "openai"),
                ("OPENAI_API_KEY", "sk-test"),
            ]))
            .unwrap();

        assert_eq!(config.database.base_url(), "http://chroma.internal:8000");
        assert_eq!(config.loader.batch_size, 25);
        assert_eq!(config.embedding.provider, EmbeddingProvider::OpenAI);
        assert_eq!(config.embedding.openai_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_invalid_env_value() {
        let err = AppConfig::default()
            .with_overrides(lookup(&[("CODEVEC_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CODEVEC_PORT"));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = AppConfig::default();
        config.loader.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.collection = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [database]
            port = 8000
            distance = "cosine"

            [query]
            text = "http handlers"

            [query.metadata_filters]
            entity_type = "function"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.port, 8000);
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.distance, DistanceFunction::Cosine);
        assert_eq!(config.query.text, "http handlers");
        assert_eq!(config.query.semantic_top_k, 5);
        assert_eq!(
            config.query.metadata_filters.get("entity_type"),
            Some(&MetadataValue::from("function"))
        );
        assert_eq!(config.query.metadata_filters.len(), 1);
    }

    #[test]
    fn test_embedding_provider_parse() {
        assert_eq!(
            "ollama".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::Ollama
        );
        assert_eq!(
            "OpenAI".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::OpenAI
        );
        assert!("invalid".parse::<EmbeddingProvider>().is_err());
    }
}
