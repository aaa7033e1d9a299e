use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::now_iso;

/// Inbound JSON frames, tagged by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe {
        topic: String,
        client_id: String,
        last_n: Option<u64>,
        request_id: Option<String>,
    },

    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        topic: String,
        client_id: String,
        request_id: Option<String>,
    },

    #[serde(rename = "publish")]
    Publish {
        topic: String,
        message: Value,
        request_id: Option<String>,
    },

    #[serde(rename = "ping")]
    Ping { request_id: Option<String> },
}

impl ClientMessage {
    /// Schema checks beyond what deserialization enforces. Returns a
    /// human-readable reason suitable for a `BAD_REQUEST` frame.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            ClientMessage::Subscribe {
                topic, client_id, ..
            }
            | ClientMessage::Unsubscribe {
                topic, client_id, ..
            } => {
                if topic.is_empty() {
                    return Err("topic must be non-empty");
                }
                if client_id.is_empty() {
                    return Err("client_id must be non-empty");
                }
                Ok(())
            }
            ClientMessage::Publish { topic, message, .. } => {
                if topic.is_empty() {
                    return Err("topic must be non-empty");
                }
                // Published payloads are objects carrying a string id.
                let has_id = message
                    .as_object()
                    .and_then(|m| m.get("id"))
                    .is_some_and(Value::is_string);
                if !has_id {
                    return Err("message must be an object with a string `id`");
                }
                Ok(())
            }
            ClientMessage::Ping { .. } => Ok(()),
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Subscribe { request_id, .. }
            | ClientMessage::Unsubscribe { request_id, .. }
            | ClientMessage::Publish { request_id, .. }
            | ClientMessage::Ping { request_id } => request_id.as_deref(),
        }
    }
}

/// Outbound JSON frames other than event envelopes (those serialize
/// straight from [`crate::broker::EventEnvelope`] in the drain path).
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    #[serde(rename = "ack")]
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        status: &'static str,
        ts: String,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: ErrorBody,
        ts: String,
    },

    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        ts: String,
    },

    #[serde(rename = "info")]
    Info {
        msg: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        ts: String,
    },
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl ServerMessage {
    pub fn ack(request_id: Option<&str>, topic: Option<&str>) -> Self {
        ServerMessage::Ack {
            request_id: request_id.map(str::to_string),
            topic: topic.map(str::to_string),
            status: "ok",
            ts: now_iso(),
        }
    }

    pub fn error(code: &'static str, message: &str, request_id: Option<&str>) -> Self {
        ServerMessage::Error {
            request_id: request_id.map(str::to_string),
            error: ErrorBody {
                code,
                message: message.to_string(),
            },
            ts: now_iso(),
        }
    }

    pub fn pong(request_id: Option<&str>) -> Self {
        ServerMessage::Pong {
            request_id: request_id.map(str::to_string),
            ts: now_iso(),
        }
    }

    pub fn info(msg: &str, topic: Option<&str>) -> Self {
        ServerMessage::Info {
            msg: msg.to_string(),
            topic: topic.map(str::to_string),
            ts: now_iso(),
        }
    }
}
