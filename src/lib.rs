pub mod api;
pub mod cache;
pub mod config;
pub mod embedding;
pub mod envelope;
pub mod error;
pub mod index;
pub mod manager;
pub mod model;
pub mod parser;
pub mod server;
pub mod storage;
pub mod vector;
pub mod window;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use crate::cache::RecordCache;
use crate::config::DedupConfig;
use crate::embedding::{Embedder, EmbeddingProvider};
use crate::envelope::{DuplicateNotice, ProcessReply};
use crate::error::DedupError;
use crate::model::{Counters, Message, MessageRecord, Outcome, Stats, Verdict};
use crate::storage::{Snapshot, SnapshotStore};
use crate::window::{Clock, SystemClock, Window};

/// Everything one lock guards: the live records (with their lookup and
/// index) and the counters that describe them.
struct State {
    cache: RecordCache,
    counters: Counters,
}

/// What a snapshot is built from, copied under the state lock.
struct Image {
    generation: u64,
    dimension: usize,
    records: Vec<Arc<MessageRecord>>,
    counters: Counters,
}

impl Image {
    fn into_snapshot(self) -> Snapshot {
        let records = self.records.iter().map(|r| (**r).clone()).collect();
        Snapshot::new(self.generation, self.dimension, records, self.counters)
    }
}

/// The deduplication engine. Build one per process with [`ParrotEngine::open`]
/// and share it by `Arc`.
pub struct ParrotEngine {
    settings: DedupConfig,
    window: Window,
    provider: EmbeddingProvider,
    state: Mutex<State>,
    // Embedding of the last checked text, handed to the admit that follows
    memo: Mutex<Option<(String, Vec<f32>)>>,
    storage: Option<Arc<SnapshotStore>>,
    // Last snapshot generation handed out
    generation: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ParrotEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.state.lock().map(|s| s.cache.len()).unwrap_or(0);
        f.debug_struct("ParrotEngine")
        .field("model", &self.provider.name())
        .field("cached", &cached)
        .finish()
    }
}

impl ParrotEngine {
    pub async fn open(settings: DedupConfig, embedder: Arc<dyn Embedder>, strict_durability: bool) -> Result<Self, DedupError> {
        Self::open_with_clock(settings, embedder, strict_durability, Arc::new(SystemClock)).await
    }

    /// Initializes the embedder (fatal on failure) and restores the last
    /// snapshot, if any.
    pub async fn open_with_clock(
        settings: DedupConfig,
        embedder: Arc<dyn Embedder>,
        strict_durability: bool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DedupError> {
        let provider = EmbeddingProvider::new(embedder);
        let dim = provider.initialize().await?;
        let window = Window::new(settings.time_window());

        let storage = settings
            .cache_file
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| Arc::new(SnapshotStore::new(p, strict_durability)));

        let (mut cache, counters, generation) = match &storage {
            Some(store) => restore(store, dim),
            None => (RecordCache::new(dim), Counters::default(), 0),
        };
        cache.evict_expired(&window, clock.now_millis());

        info!(
            "Dedup engine ready: model={}, threshold={}, window={}s, records={}",
            provider.name(),
            settings.similarity_threshold,
            settings.time_window_secs,
            cache.len()
        );

        Ok(Self {
            settings,
            window,
            provider,
            state: Mutex::new(State { cache, counters }),
            memo: Mutex::new(None),
            storage,
            generation: AtomicU64::new(generation),
            clock,
        })
    }

    pub fn settings(&self) -> &DedupConfig {
        &self.settings
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Decides whether `msg` repeats something admitted within the window.
    /// Never fails: internal errors are logged, counted and reported as
    /// "not a duplicate".
    pub async fn check(&self, msg: &Message) -> Verdict {
        if self.is_too_short(&msg.text) {
            debug!("Text too short for dedup: {}", msg.id);
            return Verdict::unique();
        }
        match self.try_check(msg).await {
            Ok(verdict) => verdict,
            Err(e) => {
                self.record_error("check", &e);
                Verdict::unique()
            }
        }
    }

    /// Adds `msg` to the cache. Expected after a non-duplicate verdict;
    /// returns `false` for short text, a known id or an internal error.
    pub async fn admit(&self, msg: &Message) -> bool {
        if self.is_too_short(&msg.text) {
            return false;
        }
        match self.try_admit(msg).await {
            Ok(admitted) => admitted,
            Err(e) => {
                self.record_error("admit", &e);
                false
            }
        }
    }

    /// `check`, then `admit` when the message is new.
    pub async fn process(&self, msg: &Message) -> Outcome {
        let verdict = self.check(msg).await;
        if verdict.is_duplicate {
            return Outcome { verdict, admitted: false };
        }
        let admitted = self.admit(msg).await;
        Outcome { verdict, admitted }
    }

    /// `process`, plus the notice for a suppressed message.
    pub async fn process_reply(&self, msg: &Message) -> ProcessReply {
        let outcome = self.process(msg).await;
        let notice = outcome
            .verdict
            .is_duplicate
            .then(|| self.notice(msg, &outcome.verdict));
        ProcessReply { outcome, notice }
    }

    pub fn notice(&self, msg: &Message, verdict: &Verdict) -> DuplicateNotice {
        DuplicateNotice::new(msg, verdict, self.stats(), self.now_millis())
    }

    pub fn stats(&self) -> Stats {
        // Read-only, so a poisoned lock is still worth reporting from
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let now = self.clock.now_millis();

        Stats {
            total_messages: state.counters.total_messages,
            duplicates_found: state.counters.duplicates_found,
            cache_hits: state.counters.cache_hits,
            cache_misses: state.counters.cache_misses,
            errors: state.counters.errors,
            live_count: state.cache.live_count(&self.window, now),
            cache_size: state.cache.len(),
            window_secs: self.settings.time_window_secs,
            threshold: self.settings.similarity_threshold,
            model: self.provider.name().to_string(),
            dimension: state.cache.dimension(),
        }
    }

    /// Writes a snapshot synchronously. `Ok(None)` when persistence is off,
    /// `Ok(Some(0))` when a newer snapshot landed first.
    pub fn save_now(&self) -> Result<Option<usize>, DedupError> {
        let Some(store) = &self.storage else {
            return Ok(None);
        };
        let snapshot = self.capture()?.into_snapshot();
        match store.save(&snapshot)? {
            Some(bytes) => {
                info!("[SNAPSHOT] {} records, {} bytes -> {}", snapshot.records.len(), bytes, store.path().display());
                Ok(Some(bytes))
            }
            None => {
                debug!("[SNAPSHOT] Generation {} superseded", snapshot.generation);
                Ok(Some(0))
            }
        }
    }

    // --- internals ---

    fn is_too_short(&self, text: &str) -> bool {
        let text = text.trim();
        text.is_empty() || text.chars().count() < self.settings.min_text_chars
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, State>, DedupError> {
        self.state.lock().map_err(|_| DedupError::Poisoned)
    }

    fn record_error(&self, op: &str, e: &DedupError) {
        error!("Dedup {} failed, treating message as new: {}", op, e);
        if let Ok(mut state) = self.state.lock() {
            state.counters.errors += 1;
        }
    }

    async fn try_check(&self, msg: &Message) -> Result<Verdict, DedupError> {
        let started = Instant::now();

        {
            let mut state = self.lock_state()?;
            self.evict_expired(&mut state.cache);

            if let Some(existing) = state.cache.get(&msg.id).cloned() {
                state.counters.cache_hits += 1;
                info!("Exact duplicate by id: {}", msg.id);
                return Ok(Verdict::exact(existing));
            }
        }

        // Lock released: embedding may take a while
        let query = self.provider.embed(&msg.text).await?;
        self.remember(&msg.text, &query);

        let mut state = self.lock_state()?;
        if state.cache.is_empty() {
            state.counters.cache_misses += 1;
            debug!("Cache empty, {} is new", msg.id);
            return Ok(Verdict::unique());
        }

        let k = self.settings.top_k.min(state.cache.len());
        let hits = match state.cache.search(&query, k) {
            Ok(hits) => hits,
            Err(e @ DedupError::IndexInconsistency(_)) => {
                error!("Resetting dedup cache after index failure: {}", e);
                state.cache.clear();
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let now = self.clock.now_millis();
        let mut best: Option<Arc<MessageRecord>> = None;
        let mut max_similarity = 0.0f32;
        let mut examined = 0;

        for hit in &hits {
            let Some(record) = state.cache.at(hit.position) else {
                let len = state.cache.len();
                error!("Index returned position {} past {} live records, resetting cache", hit.position, len);
                state.cache.clear();
                return Err(DedupError::IndexInconsistency(format!(
                    "neighbor position {} out of range ({})",
                    hit.position, len
                )));
            };
            // Time moved on while embedding
            if !self.window.is_live(record.timestamp, now) {
                continue;
            }
            examined += 1;
            if hit.similarity > max_similarity {
                max_similarity = hit.similarity;
                best = Some(record.clone());
            }
        }

        let is_duplicate = best.is_some() && max_similarity >= self.settings.similarity_threshold;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        if is_duplicate {
            state.counters.duplicates_found += 1;
            if let Some(original) = &best {
                info!(
                    "Duplicate: {} ~ {} (similarity={:.3}, {:.1}ms)",
                    msg.id, original.id, max_similarity, elapsed_ms
                );
            }
        } else {
            state.counters.cache_misses += 1;
            debug!("New message {}: best similarity={:.3}, {:.1}ms", msg.id, max_similarity, elapsed_ms);
        }

        Ok(Verdict {
            is_duplicate,
            matched: best,
            similarity: max_similarity,
            neighbors_examined: examined,
        })
    }

    async fn try_admit(&self, msg: &Message) -> Result<bool, DedupError> {
        if self.lock_state()?.cache.contains(&msg.id) {
            debug!("Already cached, skipping admit: {}", msg.id);
            return Ok(false);
        }

        let vector = match self.take_memo(&msg.text) {
            Some(v) => v,
            None => self.provider.embed(&msg.text).await?,
        };

        let record = MessageRecord {
            id: msg.id.clone(),
            chat_id: msg.chat_id.clone(),
            text: msg.text.trim().to_string(),
            vector,
            timestamp: self.clock.now_millis(),
            payload: msg.payload.clone(),
        };

        let due_snapshot = {
            let mut state = self.lock_state()?;
            match state.cache.push(record) {
                Ok(_) => {}
                Err(DedupError::DuplicateId(id)) => {
                    debug!("Admitted concurrently, skipping: {}", id);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
            state.counters.total_messages += 1;

            if state.cache.len() > self.settings.max_cache_size {
                self.enforce_cap(&mut state.cache);
            }

            let every = self.settings.snapshot_every;
            every > 0 && state.counters.total_messages % every == 0
        };

        debug!("Admitted {}", msg.id);
        if due_snapshot {
            self.spawn_snapshot();
        }
        Ok(true)
    }

    fn evict_expired(&self, cache: &mut RecordCache) {
        let removed = cache.evict_expired(&self.window, self.clock.now_millis());
        if removed > 0 {
            info!("Evicted {} expired records, {} remain", removed, cache.len());
        }
    }

    fn enforce_cap(&self, cache: &mut RecordCache) {
        let cap = self.settings.max_cache_size;
        self.evict_expired(cache);
        if cache.len() <= cap {
            return;
        }
        if self.settings.enforce_max_size {
            let dropped = cache.evict_oldest(cap);
            warn!("Cache over {} records, dropped {} oldest live entries", cap, dropped);
        } else {
            debug!("Cache holds {} live records, above cap {}", cache.len(), cap);
        }
    }

    fn remember(&self, text: &str, vector: &[f32]) {
        if let Ok(mut memo) = self.memo.lock() {
            *memo = Some((text.to_string(), vector.to_vec()));
        }
    }

    fn take_memo(&self, text: &str) -> Option<Vec<f32>> {
        let mut memo = self.memo.lock().ok()?;
        match memo.take() {
            Some((t, v)) if t == text => Some(v),
            _ => None,
        }
    }

    /// Point-in-time copy. Records are immutable, so cloning the `Arc`s is
    /// enough for a consistent view. The generation is drawn under the same
    /// lock, so generation order is state order.
    fn capture(&self) -> Result<Image, DedupError> {
        let state = self.lock_state()?;
        Ok(Image {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            dimension: state.cache.dimension(),
            records: state.cache.records().to_vec(),
            counters: state.counters,
        })
    }

    fn spawn_snapshot(&self) {
        let Some(store) = self.storage.clone() else {
            return;
        };
        let image = match self.capture() {
            Ok(image) => image,
            Err(e) => {
                error!("Snapshot skipped: {}", e);
                return;
            }
        };

        tokio::task::spawn_blocking(move || {
            let snapshot = image.into_snapshot();
            match store.save(&snapshot) {
                Ok(Some(bytes)) => debug!("[SNAPSHOT] {} records, {} bytes", snapshot.records.len(), bytes),
                Ok(None) => debug!("[SNAPSHOT] Generation {} superseded", snapshot.generation),
                Err(e) => error!("[SNAPSHOT] Save failed: {}", e),
            }
        });
    }
}

/// Loads the snapshot behind `store`. Anything unusable is dropped and the
/// engine starts empty.
fn restore(store: &SnapshotStore, dim: usize) -> (RecordCache, Counters, u64) {
    let empty = || (RecordCache::new(dim), Counters::default(), 0);

    let snapshot = match store.load() {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            info!("No snapshot at {}, starting empty", store.path().display());
            return empty();
        }
        Err(e) => {
            error!("Discarding snapshot {}: {}", store.path().display(), e);
            return empty();
        }
    };

    if snapshot.dimension as usize != dim {
        error!(
            "Discarding snapshot: dimension {} does not match embedder dimension {}",
            snapshot.dimension, dim
        );
        return empty();
    }

    let count = snapshot.records.len();
    match RecordCache::from_records(dim, snapshot.records) {
        Ok(cache) => {
            info!("[RESTORE] {} records from {}", count, store.path().display());
            (cache, snapshot.counters, snapshot.generation)
        }
        Err(e) => {
            error!("Discarding snapshot, index rebuild failed: {}", e);
            empty()
        }
    }
}
