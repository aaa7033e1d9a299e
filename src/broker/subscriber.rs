use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::trace;

use crate::broker::message::EventEnvelope;
use crate::transport::Transport;

/// Frames sent per drain pass before the backpressure check.
pub const DRAIN_BATCH: usize = 64;

/// Transport backlog above which a drain yields its turn.
pub const HIGH_WATER_BYTES: usize = 1_000_000;

/// What to do when a subscriber's pending queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Reject the new message and signal the caller to drop the client.
    Disconnect,
    /// Silently evict the oldest queued message to make room.
    DropOldest,
}

/// Result of [`Subscriber::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue was full under `drop-oldest`; the oldest message made way.
    DroppedOldest,
    /// Queue was full under `disconnect`; nothing was queued and the
    /// caller should terminate this subscriber's connection.
    Overflow,
}

/// One client's subscription to one topic: a bounded outbound queue plus
/// the drain task that feeds the client's transport.
///
/// `enqueue` never blocks and never touches the network; delivery happens
/// in a spawned drain task that batches sends and backs off while the
/// transport reports a large unsent backlog.
pub struct Subscriber {
    client_id: String,
    transport: Arc<dyn Transport>,
    queue: Mutex<VecDeque<EventEnvelope>>,
    capacity: usize,
    policy: OverflowPolicy,
    drain_scheduled: AtomicBool,
    draining: AtomicBool,
    closed: AtomicBool,
}

impl Subscriber {
    pub fn new(
        client_id: &str,
        transport: Arc<dyn Transport>,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            client_id: client_id.to_string(),
            transport,
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            policy,
            drain_scheduled: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the subscriber dead and closes its transport. Any in-flight
    /// drain observes the flag at its next batch and stops.
    pub fn close(&self, code: u16, reason: &str) {
        self.closed.store(true, Ordering::Release);
        self.transport.close(code, reason);
    }

    /// Appends `event` to the pending queue and schedules a drain.
    ///
    /// A full queue is resolved by the overflow policy: `drop-oldest`
    /// evicts the head and still queues the event; `disconnect` queues
    /// nothing and reports [`EnqueueOutcome::Overflow`] so the fan-out
    /// path can surface an error frame and drop the connection. The queue
    /// never holds more than the configured capacity.
    pub fn enqueue(self: &Arc<Self>, event: EventEnvelope) -> EnqueueOutcome {
        let outcome = {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(event);
                        EnqueueOutcome::DroppedOldest
                    }
                    OverflowPolicy::Disconnect => EnqueueOutcome::Overflow,
                }
            } else {
                queue.push_back(event);
                EnqueueOutcome::Queued
            }
        };
        if outcome != EnqueueOutcome::Overflow {
            self.schedule_drain();
        }
        outcome
    }

    /// Spawns a drain task unless one is already pending or running;
    /// re-entrant requests coalesce on the `drain_scheduled` flag.
    pub fn schedule_drain(self: &Arc<Self>) {
        if self.drain_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let sub = Arc::clone(self);
        tokio::spawn(async move {
            sub.drain().await;
        });
    }

    async fn drain(self: Arc<Self>) {
        self.drain_scheduled.store(false, Ordering::Release);
        if self.draining.swap(true, Ordering::AcqRel) {
            // Another drain is mid-flight; it re-checks the queue on exit.
            return;
        }

        loop {
            if self.is_closed() || !self.transport.is_open() {
                break;
            }

            let batch: Vec<EventEnvelope> = {
                let mut queue = self.queue.lock().unwrap();
                let take = queue.len().min(DRAIN_BATCH);
                queue.drain(..take).collect()
            };
            if batch.is_empty() {
                break;
            }

            for event in batch {
                match serde_json::to_string(&event) {
                    // Best effort: a failed send does not tear the
                    // subscriber down, closure is caught next pass.
                    Ok(text) => {
                        let _ = self.transport.send(text);
                    }
                    Err(e) => {
                        trace!(client_id = %self.client_id, error = %e, "dropping unserializable event");
                    }
                }
            }

            if self.transport.pending_bytes() > HIGH_WATER_BYTES {
                // Slow consumer: give its writer a turn before the next batch.
                tokio::task::yield_now().await;
            }
        }

        self.draining.store(false, Ordering::Release);
        // An enqueue that raced the final empty check re-arms the drain.
        if !self.is_closed() && self.transport.is_open() && self.queued() > 0 {
            self.schedule_drain();
        }
    }
}
