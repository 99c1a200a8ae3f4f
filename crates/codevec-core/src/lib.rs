//! codevec Core - Shared types, errors and configuration
//!
//! This crate defines the pieces every codevec component relies on:
//! - Chunk records as produced by the upstream chunker
//! - Primitive metadata values accepted by the vector database
//! - Metadata normalization and field promotion
//! - Common error types
//! - Configuration management
//!
//! Author: hephaex@gmail.com

pub mod config;
pub mod metadata;

pub use config::{
    AppConfig, ConfigError, DatabaseConfig, DumpConfig, EmbeddingConfig, EmbeddingProvider,
    LoaderConfig, LoggingConfig, QueryConfig,
};
pub use metadata::{normalize_metadata, prepare_metadata, promote_fields, PROMOTED_FIELDS};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for codevec operations
#[derive(Error, Debug)]
pub enum CodevecError {
    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Invalid input in {}: {message}", .path.display())]
    InvalidInput { path: PathBuf, message: String },

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Search error: {0}")]
    SearchError(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CodevecError {
    /// Remediation hint shown to the operator alongside the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InputNotFound(_) => {
                Some("Run the chunk producer first to generate the input file.")
            }
            Self::InvalidInput { .. } => {
                Some("The input must be a JSON array of {id, document, metadata} objects.")
            }
            Self::ConnectionError(_) => {
                Some("Ensure the vector database server is running and reachable.")
            }
            Self::CollectionNotFound(_) => {
                Some("Run `codevec load` to create and populate the collection.")
            }
            Self::EmbeddingError(_) => Some(
                "Check the embedding provider settings (provider, model, URL and API key).",
            ),
            Self::ConfigError(_) => {
                Some("Check the configuration file and environment overrides.")
            }
            Self::DatabaseError(_) | Self::SearchError(_) | Self::Io(_) | Self::Other(_) => None,
        }
    }
}

impl From<ConfigError> for CodevecError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CodevecError>;

// ============================================================================
// Chunk Records
// ============================================================================

/// One unit of source code plus descriptive metadata, as emitted upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Unique identifier
    pub id: String,

    /// Source text to embed and search
    pub document: String,

    /// Loosely-typed attributes (strings, numbers, lists, nested objects)
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// Metadata Values
// ============================================================================

/// A metadata value the vector database accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Flat mapping of attribute name to primitive value
pub type Metadata = BTreeMap<String, MetadataValue>;

impl MetadataValue {
    /// Convert a JSON scalar; returns `None` for lists and objects
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            }),
            Value::String(s) => Some(Self::Str(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// String contents, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => match serde_json::Number::from_f64(*x) {
                Some(n) => write!(f, "{n}"),
                None => write!(f, "{x}"),
            },
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<MetadataValue> for serde_json::Value {
    fn from(value: MetadataValue) -> Self {
        match value {
            MetadataValue::Null => Self::Null,
            MetadataValue::Bool(b) => Self::Bool(b),
            MetadataValue::Int(i) => Self::from(i),
            MetadataValue::Float(x) => Self::from(x),
            MetadataValue::Str(s) => Self::String(s),
        }
    }
}

// ============================================================================
// Distance Functions
// ============================================================================

/// Similarity space of a collection's index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceFunction {
    /// Squared Euclidean distance
    #[default]
    L2,
    /// One minus cosine similarity
    Cosine,
    /// One minus inner product
    Ip,
}

impl DistanceFunction {
    /// Name used in the `hnsw:space` collection setting
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::Cosine => "cosine",
            Self::Ip => "ip",
        }
    }

    /// Distance between two vectors (smaller is closer)
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Self::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (norm_a * norm_b)
            }
            Self::Ip => 1.0 - a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }
}

impl std::fmt::Display for DistanceFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DistanceFunction {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "l2" => Ok(Self::L2),
            "cosine" => Ok(Self::Cosine),
            "ip" => Ok(Self::Ip),
            _ => Err(ConfigError::InvalidValue {
                key: "database.distance".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
