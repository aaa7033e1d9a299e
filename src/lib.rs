//! # relaypub
//!
//! An in-memory publish/subscribe broker served over WebSockets, with a
//! bounded replay of recent history for late subscribers and an HTTP
//! control plane for topic management.
//!
//! Modules:
//!
//! - `broker`: the engine (topic registry, per-subscriber bounded queues
//!   with overflow policies, asynchronous drains and replay buffers).
//! - `transport`: the `Transport` capability the engine writes through,
//!   the JSON wire frames, and the WebSocket server implementing both.
//! - `http`: the axum control plane (topic CRUD, health, stats).
//! - `config`: layered settings (defaults, file, environment).
//! - `utils`: error types and timestamp helpers.

pub mod broker;
pub mod config;
pub mod http;
pub mod transport;
pub mod utils;
