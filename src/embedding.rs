//! Text -> vector providers.
//!
//! The engine only ever talks to [`EmbeddingProvider`], which owns one
//! [`Embedder`] backend, runs its expensive start-up exactly once, pins the
//! output dimension and guarantees unit-norm vectors.

use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::info;
use crate::config::{EmbeddingConfig, EmbeddingKind};
use crate::error::EmbedError;
use crate::vector;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, for stats and logs.
    fn name(&self) -> &str;

    /// One-time, possibly slow, preparation (model download, warm-up).
    async fn load(&self) -> Result<(), EmbedError> {
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

pub fn from_config(cfg: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbedError> {
    match cfg.provider {
        EmbeddingKind::Hash => Ok(Arc::new(HashEmbedder::new(cfg.dimensions))),
        EmbeddingKind::Http => {
            let api_key = Some(cfg.api_key.clone()).filter(|k| !k.is_empty());
            let embedder = HttpEmbedder::new(
                &cfg.endpoint,
                &cfg.model,
                api_key,
                Duration::from_secs(cfg.timeout_secs),
            )?;
            Ok(Arc::new(embedder))
        }
    }
}

pub struct EmbeddingProvider {
    backend: Arc<dyn Embedder>,
    dimension: OnceCell<usize>,
}

impl EmbeddingProvider {
    pub fn new(backend: Arc<dyn Embedder>) -> Self {
        Self { backend, dimension: OnceCell::new() }
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// `None` until `initialize` has succeeded.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    /// Loads the backend and discovers its dimension with a sample embedding.
    /// Concurrent callers wait on the same load; a failed load leaves the
    /// provider uninitialized.
    pub async fn initialize(&self) -> Result<usize, EmbedError> {
        self.dimension
            .get_or_try_init(|| async {
                let started = Instant::now();
                info!("Loading embedder: {}", self.backend.name());

                self.backend.load().await.map_err(|e| EmbedError::Init(e.to_string()))?;
                let sample = self
                    .backend
                    .embed("test")
                    .await
                    .map_err(|e| EmbedError::Init(e.to_string()))?;
                if sample.is_empty() {
                    return Err(EmbedError::Init("sample returned an empty vector".into()));
                }

                info!(
                    "Embedder ready: dimension={}, took {:.2}s",
                    sample.len(),
                    started.elapsed().as_secs_f64()
                );
                Ok(sample.len())
            })
            .await
            .copied()
    }

    /// Embeds `text` and returns a unit-norm vector of the pinned dimension.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let dim = self.initialize().await?;
        let mut v = self.backend.embed(text).await?;

        if v.is_empty() {
            return Err(EmbedError::Empty);
        }
        if v.len() != dim {
            return Err(EmbedError::Dimension { expected: dim, actual: v.len() });
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(EmbedError::Response("non-finite component".into()));
        }

        vector::normalize(&mut v);
        Ok(v)
    }
}

/// Deterministic feature-hashing embedder. Shares surface features (words,
/// character trigrams, word pairs), NOT meaning: translations will not match.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    fn accumulate(&self, v: &mut [f32], feature: &str, weight: f32) {
        let h = seahash::hash(feature.as_bytes());
        let idx = (h % self.dimensions as u64) as usize;
        // Top bit picks the sign so colliding features tend to cancel
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut v = vec![0.0f32; self.dimensions];
        let tokens = tokenize(text);

        for token in &tokens {
            self.accumulate(&mut v, token, 1.0);
            for tri in char_ngrams(token, 3) {
                self.accumulate(&mut v, &format!("tri:{tri}"), 0.35);
            }
        }
        for pair in tokens.windows(2) {
            self.accumulate(&mut v, &format!("bi:{}_{}", pair[0], pair[1]), 0.8);
        }

        vector::normalize(&mut v);
        Ok(v)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn char_ngrams(token: &str, n: usize) -> Vec<String> {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() < n {
        return vec![token.to_string()];
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

/// Remote embedding model over HTTP. Sends `{"model", "input"}` and accepts
/// the Ollama (`embeddings` / `embedding`) and OpenAI (`data[].embedding`)
/// response shapes.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(endpoint: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, EmbedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedError::Init(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let body = serde_json::json!({ "model": self.model, "input": text });

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| EmbedError::Request(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Request(format!("HTTP {}: {}", status, detail)));
        }

        let json: Value = resp.json().await.map_err(|e| EmbedError::Response(e.to_string()))?;
        parse_embedding(&json)
    }
}

fn parse_embedding(json: &Value) -> Result<Vec<f32>, EmbedError> {
    let values = if let Some(batch) = json.get("embeddings") {
        batch.get(0)
    } else if let Some(data) = json.get("data") {
        data.get(0).and_then(|d| d.get("embedding"))
    } else {
        json.get("embedding")
    };

    let values = values
        .and_then(Value::as_array)
        .ok_or_else(|| EmbedError::Response("no embedding array in response".into()))?;

    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbedError::Response(format!("non-numeric component: {v}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::json;

    struct SlowLoader {
        loads: AtomicUsize,
        dim: usize,
    }

    #[async_trait]
    impl Embedder for SlowLoader {
        fn name(&self) -> &str {
            "slow"
        }

        async fn load(&self) -> Result<(), EmbedError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            let mut v = vec![1.0; self.dim];
            v[0] += text.len() as f32;
            Ok(v)
        }
    }

    struct Broken;

    #[async_trait]
    impl Embedder for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn load(&self) -> Result<(), EmbedError> {
            Err(EmbedError::Request("model not found".into()))
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn concurrent_initialization_loads_once() {
        let backend = Arc::new(SlowLoader { loads: AtomicUsize::new(0), dim: 4 });
        let provider = Arc::new(EmbeddingProvider::new(backend.clone()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let p = provider.clone();
            tasks.push(tokio::spawn(async move { p.initialize().await }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap().unwrap(), 4);
        }
        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
        assert_eq!(provider.dimension(), Some(4));
    }

    #[tokio::test]
    async fn failed_initialization_is_surfaced() {
        let provider = EmbeddingProvider::new(Arc::new(Broken));
        let err = provider.initialize().await.unwrap_err();
        assert!(matches!(err, EmbedError::Init(_)));
        assert_eq!(provider.dimension(), None);
    }

    #[tokio::test]
    async fn provider_normalizes_output() {
        let provider = EmbeddingProvider::new(Arc::new(SlowLoader { loads: AtomicUsize::new(0), dim: 3 }));
        let v = provider.embed("hello").await.unwrap();
        assert!((vector::l2_norm(&v) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_unit() {
        let e = HashEmbedder::new(128);
        let a = e.embed("Binance lists DOGE/USDT trading pair").await.unwrap();
        let b = e.embed("Binance lists DOGE/USDT trading pair").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
        assert!((vector::l2_norm(&a) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hash_embedder_prefers_shared_wording() {
        let e = HashEmbedder::new(256);
        let base = e.embed("Binance lists DOGE/USDT trading pair").await.unwrap();
        let close = e.embed("Binance lists new DOGE/USDT trading pair").await.unwrap();
        let far = e.embed("Bitcoin price reaches new all-time high").await.unwrap();
        assert!(vector::dot(&base, &close) > vector::dot(&base, &far));
    }

    #[test]
    fn parses_known_response_shapes() {
        let ollama = json!({ "model": "bge-m3", "embeddings": [[0.1, 0.2]] });
        let legacy = json!({ "embedding": [0.3, 0.4] });
        let openai = json!({ "data": [{ "index": 0, "embedding": [0.5, 0.6] }] });

        assert_eq!(parse_embedding(&ollama).unwrap(), vec![0.1, 0.2]);
        assert_eq!(parse_embedding(&legacy).unwrap(), vec![0.3, 0.4]);
        assert_eq!(parse_embedding(&openai).unwrap(), vec![0.5, 0.6]);
    }

    #[test]
    fn rejects_malformed_responses() {
        assert!(parse_embedding(&json!({ "error": "boom" })).is_err());
        assert!(parse_embedding(&json!({ "embedding": [0.1, "x"] })).is_err());
    }

    #[test]
    fn trigrams_cover_short_tokens() {
        assert_eq!(char_ngrams("ab", 3), vec!["ab"]);
        assert_eq!(char_ngrams("币安即将", 3), vec!["币安即", "安即将"]);
    }
}
