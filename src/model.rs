use std::sync::Arc;
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

/// One admitted message. Created by `admit`, never mutated afterwards.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct MessageRecord {
    /// External id, or derived from (text, arrival time) when the source has none
    pub id: String,

    /// Grouping id. Carried through, never used to scope dedup
    pub chat_id: String,

    /// The canonical text that was embedded
    pub text: String,

    /// Unit-norm embedding (The "meaning")
    #[serde(skip)]
    pub vector: Vec<f32>,

    /// Admission time, unix millis. Only used for window eviction
    pub timestamp: u64,

    /// The original message, as received (JSON text)
    pub payload: String,
}

/// Running counters, persisted alongside the records.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct Counters {
    pub total_messages: u64,
    pub duplicates_found: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
}

/// A message after text extraction, ready for `check` / `admit`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub text: String,
    pub payload: String,
}

impl Message {
    pub fn new(id: impl Into<String>, chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            chat_id: chat_id.into(),
            payload: serde_json::json!({ "text": &text }).to_string(),
            text,
        }
    }
}

/// Result of `check`.
///
/// For duplicates `matched` is the record that crossed the threshold. For
/// non-duplicates it is the nearest live record scoring above zero, if any,
/// and `similarity` is that score.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub is_duplicate: bool,
    pub matched: Option<Arc<MessageRecord>>,
    pub similarity: f32,
    /// Live neighbours scored; expired rows the index still held are not counted
    pub neighbors_examined: usize,
}

impl Verdict {
    pub fn unique() -> Self {
        Self { is_duplicate: false, matched: None, similarity: 0.0, neighbors_examined: 0 }
    }

    pub fn exact(record: Arc<MessageRecord>) -> Self {
        Self { is_duplicate: true, matched: Some(record), similarity: 1.0, neighbors_examined: 0 }
    }
}

/// Result of `process`: the verdict plus whether the message entered the cache.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub verdict: Verdict,
    pub admitted: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Stats {
    pub total_messages: u64,
    pub duplicates_found: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub live_count: usize,
    pub cache_size: usize,
    pub window_secs: u64,
    pub threshold: f32,
    pub model: String,
    pub dimension: usize,
}
