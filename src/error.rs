use std::path::PathBuf;
use thiserror::Error;

/// Failures of the embedding backend or of the provider wrapping it.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedder initialization failed: {0}")]
    Init(String),

    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("unexpected embedding response: {0}")]
    Response(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedder returned an empty vector")]
    Empty,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt snapshot: {0}")]
    Corrupt(String),

    #[error("incompatible snapshot: {0}")]
    Incompatible(String),
}

#[derive(Debug, Error)]
pub enum DedupError {
    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error("vector dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index inconsistency: {0}")]
    IndexInconsistency(String),

    #[error("duplicate record id: {0}")]
    DuplicateId(String),

    #[error("poisoned lock")]
    Poisoned,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
