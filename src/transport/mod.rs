//! Client-facing transports.
//!
//! The broker core never talks to a socket directly; it goes through the
//! narrow [`Transport`] capability defined here. `websocket` provides the
//! real implementation on top of tokio-tungstenite, and `message` defines
//! the JSON frames exchanged with clients.

pub mod message;
pub mod websocket;

use crate::utils::error::TransportError;

/// The capability the broker needs from a connected client.
///
/// Implementations must be cheap to call from the broker's lock scope:
/// `send` hands the frame to an outbound queue, it does not perform
/// network I/O.
pub trait Transport: Send + Sync {
    /// Whether the peer can still receive frames.
    fn is_open(&self) -> bool;

    /// Queue one text frame for delivery. Best effort: an `Err` means the
    /// frame was not accepted, not that the connection is unusable.
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Close the connection with a WebSocket-style status code and reason.
    /// Idempotent.
    fn close(&self, code: u16, reason: &str);

    /// Bytes queued for the peer but not yet written to the wire. Drains
    /// use this as the backpressure signal.
    fn pending_bytes(&self) -> usize;
}
