use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub dedup: DedupConfig,
    pub embedding: EmbeddingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    pub similarity_threshold: f32,
    pub time_window_secs: u64,
    pub max_cache_size: usize,
    /// Drop the oldest live records once `max_cache_size` is exceeded.
    /// Off: the cap only triggers a window eviction pass.
    pub enforce_max_size: bool,
    pub min_text_chars: usize,
    pub top_k: usize,
    /// Background snapshot every N admissions (0 = never)
    pub snapshot_every: u64,
    pub cache_file: Option<PathBuf>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            time_window_secs: 2 * 3600,
            max_cache_size: 10_000,
            enforce_max_size: false,
            min_text_chars: 10,
            top_k: 10,
            snapshot_every: 100,
            cache_file: Some(PathBuf::from("message_cache.rkyv")),
        }
    }
}

impl DedupConfig {
    pub fn time_window(&self) -> Duration {
        Duration::from_secs(self.time_window_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    Hash,
    Http,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Defaults to `hash`, which needs no model server but only matches
    /// shared wording. Set `http` for semantic (cross-language) matching.
    pub provider: EmbeddingKind,
    /// Remote model name. Only read by the `http` provider; the hash
    /// provider reports itself as `hash`
    pub model: String,
    pub endpoint: String,
    pub api_key: String,
    /// Output size of the hash embedder; HTTP models report their own
    pub dimensions: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingKind::Hash,
            model: "bge-m3".to_string(),
            endpoint: "http://localhost:11434/api/embed".to_string(),
            api_key: String::new(),
            dimensions: 256,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub addr: String,
    /// JSON API port (0 = disabled)
    pub http_port: u16,
    /// Periodic snapshot interval (0 = disabled)
    pub snapshot_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9100".to_string(),
            http_port: 9101,
            snapshot_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io { path: path.to_path_buf(), source }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.dedup;
        if !(-1.0..=1.0).contains(&d.similarity_threshold) {
            return Err(invalid("dedup.similarity_threshold", "must be within [-1, 1]"));
        }
        if d.time_window_secs == 0 {
            return Err(invalid("dedup.time_window_secs", "must be positive"));
        }
        if d.max_cache_size == 0 {
            return Err(invalid("dedup.max_cache_size", "must be positive"));
        }
        if d.top_k == 0 {
            return Err(invalid("dedup.top_k", "must be positive"));
        }
        if self.embedding.provider == EmbeddingKind::Hash && self.embedding.dimensions == 0 {
            return Err(invalid("embedding.dimensions", "must be positive"));
        }
        if self.embedding.provider == EmbeddingKind::Http && self.embedding.endpoint.is_empty() {
            return Err(invalid("embedding.endpoint", "required for the http provider"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.to_string() }
}
