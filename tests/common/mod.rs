#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parrot::config::DedupConfig;
use parrot::embedding::Embedder;
use parrot::error::EmbedError;
use parrot::window::ManualClock;
use parrot::ParrotEngine;

pub const T0: u64 = 1_700_000_000_000;
pub const DIM: usize = 4;

pub const LISTING: &str = "Binance lists DOGE/USDT trading pair";
pub const PARAPHRASE: &str = "Binance will list the DOGE/USDT pair soon";
pub const UNRELATED: &str = "Bitcoin price reaches new all-time high";
pub const HALFWAY: &str = "Crypto exchange news roundup for today";
pub const EXPLODES: &str = "this text makes the embedder fail";
/// Embedding this text moves the harness clock forward by `SLOW_BY`.
pub const SLOW: &str = "this text takes the embedder a while";
pub const SLOW_BY: Duration = Duration::from_secs(40);

/// Fixed text -> vector table. Unknown text maps to the last axis.
pub struct StubEmbedder {
    table: HashMap<&'static str, Vec<f32>>,
    calls: AtomicUsize,
    clock: Option<Arc<ManualClock>>,
}

impl StubEmbedder {
    pub fn new() -> Self {
        let mut table = HashMap::new();
        table.insert(LISTING, vec![1.0, 0.0, 0.0, 0.0]);
        // cos(LISTING, PARAPHRASE) ~= 0.95
        table.insert(PARAPHRASE, vec![0.95, 0.312_25, 0.0, 0.0]);
        table.insert(UNRELATED, vec![0.0, 0.0, 1.0, 0.0]);
        // cos(LISTING, HALFWAY) = 0.5
        table.insert(HALFWAY, vec![0.5, 0.5, 0.5, 0.5]);
        table.insert(SLOW, vec![0.5, 0.5, 0.5, 0.5]);
        Self { table, calls: AtomicUsize::new(0), clock: None }
    }

    pub fn with_clock(clock: Arc<ManualClock>) -> Self {
        Self { clock: Some(clock), ..Self::new() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn name(&self) -> &str {
        "stub"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text == EXPLODES {
            return Err(EmbedError::Request("inference backend unavailable".into()));
        }
        if text == SLOW {
            if let Some(clock) = &self.clock {
                clock.advance(SLOW_BY);
            }
        }
        Ok(self
            .table
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.0, 0.0, 0.0, 1.0]))
    }
}

pub fn settings() -> DedupConfig {
    DedupConfig { cache_file: None, snapshot_every: 0, ..DedupConfig::default() }
}

pub struct Harness {
    pub engine: ParrotEngine,
    pub embedder: Arc<StubEmbedder>,
    pub clock: Arc<ManualClock>,
}

pub async fn harness(settings: DedupConfig) -> Harness {
    harness_at(settings, T0).await
}

pub async fn harness_at(settings: DedupConfig, start: u64) -> Harness {
    let clock = Arc::new(ManualClock::new(start));
    let embedder = Arc::new(StubEmbedder::with_clock(clock.clone()));
    let engine = ParrotEngine::open_with_clock(settings, embedder.clone(), false, clock.clone())
        .await
        .unwrap();
    Harness { engine, embedder, clock }
}
