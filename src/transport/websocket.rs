use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{Request, Response};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::frame::CloseFrame;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Broker, Subscriber, Subscription};
use crate::config::Settings;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::transport::Transport;
use crate::utils::error::{BrokerError, TransportError};

/// Close code for a failed API-key check.
const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code for a subscriber dropped under the `disconnect` policy.
const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;

/// [`Transport`] over one WebSocket connection.
///
/// Frames go into an unbounded channel consumed by the connection's
/// writer task; `pending_bytes` tracks what sits between the two, which
/// is the backlog signal subscriber drains throttle on.
pub struct WsTransport {
    tx: mpsc::UnboundedSender<WsMessage>,
    open: AtomicBool,
    pending: AtomicUsize,
}

impl WsTransport {
    pub fn new(tx: mpsc::UnboundedSender<WsMessage>) -> Arc<Self> {
        Arc::new(Self {
            tx,
            open: AtomicBool::new(true),
            pending: AtomicUsize::new(0),
        })
    }

    fn queue(&self, msg: WsMessage) -> Result<(), TransportError> {
        let bytes = msg.len();
        self.pending.fetch_add(bytes, Ordering::AcqRel);
        self.tx.send(msg).map_err(|_| {
            self.pending.fetch_sub(bytes, Ordering::AcqRel);
            TransportError::Closed
        })
    }

    /// Called by the writer task once a frame hit the socket.
    fn note_written(&self, bytes: usize) {
        self.pending.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Flags the connection dead without emitting a close frame, for when
    /// the peer is already gone.
    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl Transport for WsTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.queue(WsMessage::text(text))
    }

    fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::AcqRel) {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            };
            let _ = self.queue(WsMessage::Close(Some(frame)));
        }
    }

    fn pending_bytes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Serializes and queues one control frame, best effort.
pub(crate) fn send_frame(transport: &WsTransport, frame: &ServerMessage) {
    match serde_json::to_string(frame) {
        Ok(text) => {
            let _ = transport.send(text);
        }
        Err(e) => warn!(error = %e, "failed to serialize server frame"),
    }
}

/// Accept loop: one task per connection, all sharing the broker handle.
pub async fn start_websocket_server(addr: &str, broker: Arc<Mutex<Broker>>, settings: Arc<Settings>) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!(%addr, error = %e, "failed to bind WebSocket listener");
            return;
        }
    };
    info!("WebSocket server listening on ws://{addr}");

    while let Ok((stream, peer)) = listener.accept().await {
        let broker = Arc::clone(&broker);
        let settings = Arc::clone(&settings);
        tokio::spawn(async move {
            debug!(%peer, "connection accepted");
            handle_connection(stream, broker, settings).await;
        });
    }
}

/// API key supplied during the upgrade, from the `apiKey` query parameter
/// or the `Sec-WebSocket-Protocol` header.
fn supplied_key(req: &Request) -> Option<String> {
    let from_query = req
        .uri()
        .query()
        .and_then(|q| q.split('&').find_map(|p| p.strip_prefix("apiKey=")))
        .map(str::to_string);
    from_query.or_else(|| {
        req.headers()
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })
}

async fn handle_connection(stream: TcpStream, broker: Arc<Mutex<Broker>>, settings: Arc<Settings>) {
    let conn_id = format!("conn-{}", uuid::Uuid::new_v4());

    let mut key = None;
    let ws_stream = match accept_hdr_async(stream, |req: &Request, resp: Response| {
        key = supplied_key(req);
        Ok(resp)
    })
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%conn_id, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let transport = WsTransport::new(tx);

    // Writer task: the only place outbound frames touch the socket.
    let writer_transport = Arc::clone(&transport);
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let bytes = msg.len();
            let is_close = matches!(msg, WsMessage::Close(_));
            if ws_sender.send(msg).await.is_err() {
                break;
            }
            writer_transport.note_written(bytes);
            if is_close {
                break;
            }
        }
        writer_transport.mark_closed();
    });

    if let Some(expected) = &settings.server.api_key {
        if key.as_deref() != Some(expected.as_str()) {
            warn!(%conn_id, "rejected connection with missing or bad API key");
            send_frame(&transport, &ServerMessage::error("UNAUTHORIZED", "invalid API key", None));
            transport.close(CLOSE_POLICY_VIOLATION, "UNAUTHORIZED");
            return;
        }
    }

    // Periodic liveness frame; stops once the transport closes.
    let heartbeat_transport = Arc::clone(&transport);
    let heartbeat_secs = settings.broker.heartbeat_secs.max(1);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(heartbeat_secs));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !heartbeat_transport.is_open() {
                break;
            }
            send_frame(&heartbeat_transport, &ServerMessage::info("ping", None));
        }
    });

    // This connection's live subscriptions, by topic.
    let mut subscriptions: HashMap<String, Subscription> = HashMap::new();

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if !msg.is_text() {
            if msg.is_close() {
                break;
            }
            continue;
        }
        let text = match msg.to_text() {
            Ok(t) => t,
            Err(_) => continue,
        };

        let parsed: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                send_frame(&transport, &ServerMessage::error("BAD_REQUEST", "invalid JSON", None));
                continue;
            }
        };
        let client_msg: ClientMessage = match serde_json::from_value(parsed) {
            Ok(m) => m,
            Err(_) => {
                send_frame(
                    &transport,
                    &ServerMessage::error("BAD_REQUEST", "schema validation failed", None),
                );
                continue;
            }
        };

        handle_client_message(&broker, &transport, &mut subscriptions, client_msg);
    }

    debug!(%conn_id, "connection closed");
    transport.mark_closed();
    let mut broker = broker.lock().unwrap();
    for (_, token) in subscriptions.drain() {
        broker.unsubscribe(&token);
    }
}

/// Maps one validated inbound frame onto the broker API and answers with
/// an ack, pong or error frame.
pub(crate) fn handle_client_message(
    broker: &Arc<Mutex<Broker>>,
    transport: &Arc<WsTransport>,
    subscriptions: &mut HashMap<String, Subscription>,
    msg: ClientMessage,
) {
    if let Err(reason) = msg.validate() {
        send_frame(transport, &ServerMessage::error("BAD_REQUEST", reason, msg.request_id()));
        return;
    }

    match msg {
        ClientMessage::Ping { request_id } => {
            send_frame(transport, &ServerMessage::pong(request_id.as_deref()));
        }

        ClientMessage::Subscribe {
            topic,
            client_id,
            last_n,
            request_id,
        } => {
            let result = broker.lock().unwrap().subscribe(
                &topic,
                &client_id,
                Arc::clone(transport) as Arc<dyn Transport>,
                last_n.unwrap_or(0) as usize,
            );
            match result {
                Ok(token) => {
                    // A second subscribe on the same topic replaces the
                    // old registration; its stale token is dropped here.
                    subscriptions.insert(topic.clone(), token);
                    send_frame(
                        transport,
                        &ServerMessage::ack(request_id.as_deref(), Some(&topic)),
                    );
                }
                Err(e) => send_broker_error(transport, &e, request_id.as_deref()),
            }
        }

        ClientMessage::Unsubscribe {
            topic, request_id, ..
        } => {
            if let Some(token) = subscriptions.remove(&topic) {
                broker.lock().unwrap().unsubscribe(&token);
            }
            send_frame(
                transport,
                &ServerMessage::ack(request_id.as_deref(), Some(&topic)),
            );
        }

        ClientMessage::Publish {
            topic,
            message,
            request_id,
        } => {
            let rid = request_id.as_deref();
            let result = broker
                .lock()
                .unwrap()
                .publish(&topic, message, |sub: &Arc<Subscriber>| {
                    let frame =
                        ServerMessage::error("SLOW_CONSUMER", "subscriber queue overflow", rid);
                    if let Ok(text) = serde_json::to_string(&frame) {
                        let _ = sub.transport().send(text);
                    }
                    sub.close(CLOSE_MESSAGE_TOO_BIG, "SLOW_CONSUMER");
                });
            match result {
                Ok(()) => send_frame(transport, &ServerMessage::ack(rid, Some(&topic))),
                Err(e) => send_broker_error(transport, &e, rid),
            }
        }
    }
}

fn send_broker_error(transport: &WsTransport, err: &BrokerError, request_id: Option<&str>) {
    send_frame(
        transport,
        &ServerMessage::error(err.code(), &err.to_string(), request_id),
    );
}
