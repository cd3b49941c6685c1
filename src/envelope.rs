//! Wire envelope of incoming chat messages and of the duplicate notices sent
//! back out.
//!
//! ```json
//! { "type": "telegram.message", "timestamp": 1700000000000, "source": "telegram",
//!   "data": { "message_id": "1001", "chat_id": "-100123", "text": "...",
//!             "raw_text": "...", "extracted_data": { "raw_text": "..." } } }
//! ```

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;
use crate::model::{Message, Outcome, Stats, Verdict};

pub const DUPLICATE_NOTICE_TYPE: &str = "messages.duplicate";

/// Best available text: `extracted_data.raw_text`, then `text`, then
/// `raw_text`, each trimmed; blank candidates are skipped.
pub fn extract_text(data: &Value) -> String {
    let candidates = [
        data.get("extracted_data").and_then(|e| e.get("raw_text")),
        data.get("text"),
        data.get("raw_text"),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|t| !t.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Stable id for sources that send none, so replays of the same message
/// collapse onto one record.
pub fn derive_id(text: &str, timestamp: u64) -> String {
    let name = format!("{}_{}", text.trim(), timestamp);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Builds a `Message` from a parsed envelope. `now_ms` stands in for a
/// missing envelope timestamp when an id has to be derived.
pub fn message_from_envelope(envelope: &Value, now_ms: u64) -> Message {
    let empty = Value::Null;
    let data = envelope.get("data").unwrap_or(&empty);
    let text = extract_text(data);

    let id = scalar_to_string(data.get("message_id")).unwrap_or_else(|| {
        let ts = envelope.get("timestamp").and_then(Value::as_u64).unwrap_or(now_ms);
        derive_id(&text, ts)
    });
    let chat_id = scalar_to_string(data.get("chat_id")).unwrap_or_default();

    Message { id, chat_id, text, payload: envelope.to_string() }
}

pub fn message_from_slice(bytes: &[u8], now_ms: u64) -> Result<Message, serde_json::Error> {
    let envelope: Value = serde_json::from_slice(bytes)?;
    Ok(message_from_envelope(&envelope, now_ms))
}

fn scalar_to_string(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateInfo {
    pub is_duplicate: bool,
    pub similarity_score: f32,
    pub original_message_id: Option<String>,
    pub original_timestamp: Option<u64>,
    pub detected_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoticeData {
    pub message: Value,
    pub duplicate_info: DuplicateInfo,
    pub stats: Stats,
}

/// Outbound notice for a suppressed message.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateNotice {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: u64,
    pub source: &'static str,
    pub data: NoticeData,
}

impl DuplicateNotice {
    pub fn new(message: &Message, verdict: &Verdict, stats: Stats, now_ms: u64) -> Self {
        let original = serde_json::from_str(&message.payload)
            .unwrap_or_else(|_| Value::String(message.payload.clone()));

        Self {
            kind: DUPLICATE_NOTICE_TYPE,
            timestamp: now_ms,
            source: "parrot",
            data: NoticeData {
                message: original,
                duplicate_info: DuplicateInfo {
                    is_duplicate: verdict.is_duplicate,
                    similarity_score: verdict.similarity,
                    original_message_id: verdict.matched.as_ref().map(|r| r.id.clone()),
                    original_timestamp: verdict.matched.as_ref().map(|r| r.timestamp),
                    detected_at: now_ms,
                },
                stats,
            },
        }
    }
}

/// What `process` answers over the network: the outcome, plus the notice to
/// forward when the message was suppressed.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReply {
    pub outcome: Outcome,
    pub notice: Option<DuplicateNotice>,
}
