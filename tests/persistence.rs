mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use common::*;
use parrot::config::DedupConfig;
use parrot::embedding::HashEmbedder;
use parrot::model::Message;
use parrot::ParrotEngine;

fn persisted(path: &Path) -> DedupConfig {
    DedupConfig { cache_file: Some(path.to_path_buf()), ..settings() }
}

#[tokio::test]
async fn restart_reproduces_every_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.rkyv");
    let admitted = [("a", LISTING), ("b", UNRELATED), ("c", HALFWAY), ("d", "plain filler message")];

    {
        let h = harness(persisted(&path)).await;
        for (id, text) in admitted {
            assert!(h.engine.admit(&Message::new(id, "news", text)).await);
            h.clock.advance(Duration::from_secs(10));
        }
        assert!(h.engine.save_now().unwrap().unwrap() > 0);
    }

    let h = harness_at(persisted(&path), T0 + 60_000).await;
    let stats = h.engine.stats();
    assert_eq!(stats.cache_size, admitted.len());
    assert_eq!(stats.live_count, admitted.len());
    assert_eq!(stats.total_messages, admitted.len() as u64);

    // Lookup: every id resolves to its own record
    for (i, (id, text)) in admitted.iter().enumerate() {
        let verdict = h.engine.check(&Message::new(*id, "news", "some unrelated new text")).await;
        let record = verdict.matched.unwrap();
        assert_eq!(record.id, *id);
        assert_eq!(record.text, *text);
        assert_eq!(record.timestamp, T0 + 10_000 * i as u64);
    }

    // Index rows: each text finds its own record again
    for (id, text) in admitted {
        let verdict = h.engine.check(&Message::new(format!("new-{id}"), "news", text)).await;
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.matched.as_ref().map(|r| r.id.as_str()), Some(id));
    }

    let verdict = h.engine.check(&Message::new("p", "news", PARAPHRASE)).await;
    assert!(verdict.is_duplicate);
    assert_eq!(verdict.matched.unwrap().id, "a");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn final_save_is_never_replaced_by_an_older_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.rkyv");
    let cfg = DedupConfig { snapshot_every: 1, ..persisted(&path) };

    {
        let h = harness(cfg).await;
        for i in 0..200 {
            assert!(h.engine.admit(&Message::new(format!("m{i}"), "c", format!("message body number {i}"))).await);
        }
        assert!(h.engine.save_now().unwrap().is_some());
        // Let every queued background snapshot finish
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    let reopened = harness(persisted(&path)).await;
    let stats = reopened.engine.stats();
    assert_eq!(stats.cache_size, 200);
    assert_eq!(stats.total_messages, 200);
}

#[tokio::test]
async fn save_without_persistence_is_a_no_op() {
    let h = harness(settings()).await;
    h.engine.admit(&Message::new("a", "c", LISTING)).await;
    assert_eq!(h.engine.save_now().unwrap(), None);
}

#[tokio::test]
async fn corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.rkyv");
    fs::write(&path, b"\x00\x01 this is not a snapshot \xff").unwrap();

    let h = harness(persisted(&path)).await;
    assert_eq!(h.engine.stats().cache_size, 0);

    // And it keeps working, overwriting the bad file on the next save
    assert!(h.engine.admit(&Message::new("a", "c", LISTING)).await);
    h.engine.save_now().unwrap();
    let reopened = harness(persisted(&path)).await;
    assert_eq!(reopened.engine.stats().cache_size, 1);
}

#[tokio::test]
async fn snapshot_from_another_model_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.rkyv");

    {
        let h = harness(persisted(&path)).await;
        h.engine.admit(&Message::new("a", "c", LISTING)).await;
        h.engine.save_now().unwrap();
    }

    // Hash embedder with a different output size
    let engine = ParrotEngine::open(persisted(&path), Arc::new(HashEmbedder::new(DIM * 2)), false)
        .await
        .unwrap();
    let stats = engine.stats();
    assert_eq!(stats.cache_size, 0);
    assert_eq!(stats.total_messages, 0);
    assert_eq!(stats.dimension, DIM * 2);
}

#[tokio::test]
async fn expired_records_are_dropped_on_restore() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.rkyv");
    let cfg = DedupConfig { time_window_secs: 60, ..persisted(&path) };

    {
        let h = harness(cfg.clone()).await;
        h.engine.admit(&Message::new("old", "c", LISTING)).await;
        h.clock.advance(Duration::from_secs(45));
        h.engine.admit(&Message::new("new", "c", UNRELATED)).await;
        h.engine.save_now().unwrap();
    }

    let h = harness_at(cfg, T0 + 61_000).await;
    assert_eq!(h.engine.stats().cache_size, 1);
    assert!(h.engine.check(&Message::new("new", "c", UNRELATED)).await.is_duplicate);
    assert!(!h.engine.check(&Message::new("x", "c", PARAPHRASE)).await.is_duplicate);
}

#[tokio::test]
async fn admissions_trigger_background_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.rkyv");
    let cfg = DedupConfig { snapshot_every: 2, ..persisted(&path) };

    let h = harness(cfg).await;
    h.engine.admit(&Message::new("a", "c", LISTING)).await;
    assert!(!path.exists());
    h.engine.admit(&Message::new("b", "c", UNRELATED)).await;

    let mut waited = 0;
    while !path.exists() && waited < 100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 1;
    }
    assert!(path.exists(), "background snapshot never landed");

    let reopened = harness(persisted(&path)).await;
    assert_eq!(reopened.engine.stats().total_messages, 2);
}
