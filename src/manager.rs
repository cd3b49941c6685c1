use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use crate::ParrotEngine;

#[derive(Debug, Clone)]
pub struct SystemProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
    pub strict_durability: bool, // true = fsync snapshots, false = OS buffer (faster)
}

impl SystemProfile {
    pub fn detect() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

        // Single core: one worker for requests, one left for snapshot I/O
        if cores <= 1 {
            warn!("CPU constraint detected (cores: {}), snapshots will not fsync", cores);
            return Self {
                logical_cores: cores,
                worker_threads: 2,
                strict_durability: false,
            };
        }

        Self {
            logical_cores: cores,
            worker_threads: cores,
            strict_durability: true,
        }
    }
}

/// Writes a snapshot every `interval`, on top of the every-N-admissions
/// trigger inside the engine.
pub fn start_snapshot_task(engine: Arc<ParrotEngine>, interval: Duration) -> Option<tokio::task::JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        info!("[SNAPSHOT] Periodic snapshots every {}s", interval.as_secs());
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; nothing new to save yet
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let engine = engine.clone();
            match tokio::task::spawn_blocking(move || engine.save_now()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("[SNAPSHOT] Periodic save failed: {}", e),
                Err(e) => error!("[SNAPSHOT] Task error: {}", e),
            }
        }
    }))
}
