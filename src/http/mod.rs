//! HTTP control plane: topic CRUD, listing, health and stats.
//!
//! Thin translation over the broker API; every handler locks the shared
//! broker briefly and serializes the result. Guarded by an `x-api-key`
//! header when a key is configured.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::{json, Value};
use tracing::debug;

use crate::broker::Broker;
use crate::transport::message::ServerMessage;
use crate::utils::error::BrokerError;

#[derive(Clone)]
pub struct ApiState {
    pub broker: Arc<Mutex<Broker>>,
    pub api_key: Option<String>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/topics", post(create_topic).get(list_topics))
        .route("/topics/:name", delete(delete_topic))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .fallback(not_found)
        .with_state(state)
}

async fn require_api_key(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    if let Some(expected) = &state.api_key {
        let supplied = req
            .headers()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok());
        if supplied != Some(expected.as_str()) {
            return json_error(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                Some("missing or invalid X-API-Key"),
            );
        }
    }
    next.run(req).await
}

async fn create_topic(State(state): State<ApiState>, body: Option<Json<Value>>) -> Response {
    let name = body
        .as_ref()
        .and_then(|Json(v)| v.get("name"))
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty());
    let Some(name) = name else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            Some("body must be an object with a non-empty `name`"),
        );
    };

    match state.broker.lock().unwrap().create_topic(name) {
        Ok(()) => (
            StatusCode::CREATED,
            Json(json!({ "status": "created", "topic": name })),
        )
            .into_response(),
        Err(e) => broker_error(&e),
    }
}

async fn delete_topic(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let result = state.broker.lock().unwrap().delete_topic(&name, |transport| {
        // Courtesy frame ahead of the force-close.
        let frame = ServerMessage::info("topic_deleted", Some(&name));
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = transport.send(text);
        }
    });
    match result {
        Ok(detached) => {
            debug!(topic = %name, detached, "topic deleted via control plane");
            (
                StatusCode::OK,
                Json(json!({ "status": "deleted", "topic": name })),
            )
                .into_response()
        }
        Err(e) => broker_error(&e),
    }
}

async fn list_topics(State(state): State<ApiState>) -> Response {
    let topics = state.broker.lock().unwrap().list();
    Json(json!({ "topics": topics })).into_response()
}

async fn health(State(state): State<ApiState>) -> Response {
    let broker = state.broker.lock().unwrap();
    Json(json!({
        "uptime_sec": broker.uptime_secs(),
        "topics": broker.topic_count(),
        "subscribers": broker.total_subscribers(),
    }))
    .into_response()
}

async fn stats(State(state): State<ApiState>) -> Response {
    let stats = state.broker.lock().unwrap().stats();
    Json(stats.topics).into_response()
}

async fn not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "BAD_REQUEST", Some("route not found"))
}

fn json_error(status: StatusCode, code: &'static str, message: Option<&str>) -> Response {
    let mut body = json!({ "error": code });
    if let Some(m) = message {
        body["message"] = json!(m);
    }
    (status, Json(body)).into_response()
}

fn broker_error(err: &BrokerError) -> Response {
    let status = match err {
        BrokerError::TopicNotFound(_) => StatusCode::NOT_FOUND,
        BrokerError::TopicExists(_) => StatusCode::CONFLICT,
        BrokerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
    };
    json_error(status, err.code(), Some(&err.to_string()))
}
