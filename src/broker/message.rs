use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::now_iso;

/// The frame delivered to subscribers, both for live fan-out and replay.
///
/// Replayed history goes through [`EventEnvelope::new`] exactly like a
/// live publish, so the two are indistinguishable on the wire apart from
/// their timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub topic: String,
    pub message: Value,
    pub ts: String,
}

impl EventEnvelope {
    pub fn new(topic: &str, message: Value) -> Self {
        Self {
            kind: "event".to_string(),
            topic: topic.to_string(),
            message,
            ts: now_iso(),
        }
    }
}

/// What a topic's replay buffer stores per publish: the payload and the
/// time it was accepted.
#[derive(Debug, Clone)]
pub struct ReplayEntry {
    pub ts: String,
    pub message: Value,
}
