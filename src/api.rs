use std::sync::Arc;
use serde_json::{json, Value};
use tracing::{error, info};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};
use crate::ParrotEngine;
use crate::envelope;
use crate::server::MAX_FRAME;

pub async fn start_api(engine: Arc<ParrotEngine>, port: u16) {
    info!("HTTP API listening on port {}", port);
    warp::serve(routes(engine)).run(([0, 0, 0, 0], port)).await;
}

pub fn routes(engine: Arc<ParrotEngine>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    // 1. GET /stats
    let stats = warp::get()
    .and(warp::path("stats"))
    .and(warp::path::end())
    .and(with_engine(engine.clone()))
    .map(|engine: Arc<ParrotEngine>| warp::reply::json(&engine.stats()));

    // 2. POST /check
    let check = warp::post()
    .and(warp::path("check"))
    .and(warp::path::end())
    .and(json_body())
    .and(with_engine(engine.clone()))
    .and_then(|env: Value, engine: Arc<ParrotEngine>| async move {
        let msg = envelope::message_from_envelope(&env, engine.now_millis());
        let verdict = engine.check(&msg).await;
        Ok::<_, Rejection>(warp::reply::json(&verdict))
    });

    // 3. POST /admit
    let admit = warp::post()
    .and(warp::path("admit"))
    .and(warp::path::end())
    .and(json_body())
    .and(with_engine(engine.clone()))
    .and_then(|env: Value, engine: Arc<ParrotEngine>| async move {
        let msg = envelope::message_from_envelope(&env, engine.now_millis());
        let admitted = engine.admit(&msg).await;
        Ok::<_, Rejection>(warp::reply::json(&json!({ "admitted": admitted })))
    });

    // 4. POST /process
    let process = warp::post()
    .and(warp::path("process"))
    .and(warp::path::end())
    .and(json_body())
    .and(with_engine(engine.clone()))
    .and_then(|env: Value, engine: Arc<ParrotEngine>| async move {
        let msg = envelope::message_from_envelope(&env, engine.now_millis());
        let reply = engine.process_reply(&msg).await;
        Ok::<_, Rejection>(warp::reply::json(&reply))
    });

    // 5. POST /snapshot
    let snapshot = warp::post()
    .and(warp::path("snapshot"))
    .and(warp::path::end())
    .and(with_engine(engine))
    .and_then(|engine: Arc<ParrotEngine>| async move {
        let (status, body) = match tokio::task::spawn_blocking(move || engine.save_now()).await {
            Ok(Ok(bytes)) => (StatusCode::OK, json!({ "saved": bytes.is_some(), "bytes": bytes })),
            Ok(Err(e)) => {
                error!("Snapshot failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() }))
            }
            Err(e) => {
                error!("Snapshot task error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() }))
            }
        };
        Ok::<_, Rejection>(warp::reply::with_status(warp::reply::json(&body), status))
    });

    stats.or(check).or(admit).or(process).or(snapshot)
}

fn json_body() -> impl Filter<Extract = (Value,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_FRAME as u64).and(warp::body::json())
}

fn with_engine(engine: Arc<ParrotEngine>) -> impl Filter<Extract = (Arc<ParrotEngine>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || engine.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DedupConfig;
    use crate::embedding::HashEmbedder;

    async fn engine() -> Arc<ParrotEngine> {
        let settings = DedupConfig { cache_file: None, ..DedupConfig::default() };
        let engine = ParrotEngine::open(settings, Arc::new(HashEmbedder::new(64)), false)
            .await
            .unwrap();
        Arc::new(engine)
    }

    fn envelope(id: &str, text: &str) -> Value {
        json!({ "type": "telegram.message", "data": { "message_id": id, "chat_id": "-1", "text": text } })
    }

    #[tokio::test]
    async fn process_then_replay_is_suppressed() {
        let api = routes(engine().await);

        let first = warp::test::request()
            .method("POST")
            .path("/process")
            .json(&envelope("1", "Binance lists DOGE/USDT trading pair"))
            .reply(&api)
            .await;
        assert_eq!(first.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(first.body()).unwrap();
        assert_eq!(body["outcome"]["admitted"], true);
        assert!(body["notice"].is_null());

        let replay = warp::test::request()
            .method("POST")
            .path("/process")
            .json(&envelope("1", "Binance lists DOGE/USDT trading pair"))
            .reply(&api)
            .await;
        let body: Value = serde_json::from_slice(replay.body()).unwrap();
        assert_eq!(body["outcome"]["verdict"]["is_duplicate"], true);
        assert_eq!(body["notice"]["type"], "messages.duplicate");
        assert_eq!(body["notice"]["data"]["duplicate_info"]["original_message_id"], "1");
    }

    #[tokio::test]
    async fn stats_reports_counters() {
        let api = routes(engine().await);

        warp::test::request()
            .method("POST")
            .path("/admit")
            .json(&envelope("7", "a message that is long enough"))
            .reply(&api)
            .await;

        let resp = warp::test::request().method("GET").path("/stats").reply(&api).await;
        let stats: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(stats["total_messages"], 1);
        assert_eq!(stats["cache_size"], 1);
        assert_eq!(stats["model"], "hash");
    }

    #[tokio::test]
    async fn snapshot_without_persistence_saves_nothing() {
        let api = routes(engine().await);
        let resp = warp::test::request().method("POST").path("/snapshot").reply(&api).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["saved"], false);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let api = routes(engine().await);
        let resp = warp::test::request()
            .method("POST")
            .path("/check")
            .header("content-type", "application/json")
            .body("{not json")
            .reply(&api)
            .await;
        assert!(resp.status().is_client_error());
    }
}
