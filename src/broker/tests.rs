use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use super::engine::{Broker, BrokerOptions};
use super::message::EventEnvelope;
use super::replay::ReplayBuffer;
use super::subscriber::{EnqueueOutcome, OverflowPolicy, Subscriber};
use crate::transport::Transport;
use crate::utils::error::{BrokerError, TransportError};

/// In-memory transport recording every frame and close.
struct MockTransport {
    open: AtomicBool,
    pending: AtomicUsize,
    frames: Mutex<Vec<String>>,
    closes: Mutex<Vec<(u16, String)>>,
}

impl MockTransport {
    fn open() -> Arc<Self> {
        Self::with_open(true)
    }

    /// A transport whose peer cannot receive yet; drains become no-ops
    /// and queues stay inspectable.
    fn closed() -> Arc<Self> {
        Self::with_open(false)
    }

    fn with_open(open: bool) -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(open),
            pending: AtomicUsize::new(0),
            frames: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
        })
    }

    fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }

    /// Fakes a backed-up peer by pinning the reported outbound backlog.
    fn set_pending(&self, bytes: usize) {
        self.pending.store(bytes, Ordering::Release);
    }

    fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    fn closes(&self) -> Vec<(u16, String)> {
        self.closes.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.frames.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        self.open.store(false, Ordering::Release);
        self.closes
            .lock()
            .unwrap()
            .push((code, reason.to_string()));
    }

    fn pending_bytes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

fn event(id: &str) -> EventEnvelope {
    EventEnvelope::new("t", json!({ "id": id }))
}

fn event_ids(frames: &[String]) -> Vec<String> {
    frames
        .iter()
        .map(|f| {
            let env: EventEnvelope = serde_json::from_str(f).unwrap();
            assert_eq!(env.kind, "event");
            env.message["id"].as_str().unwrap().to_string()
        })
        .collect()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// --- ReplayBuffer ---

#[test]
fn test_replay_buffer_overwrites_oldest() {
    let mut buf = ReplayBuffer::new(3).unwrap();
    for i in 0..5 {
        buf.push(i);
    }
    assert_eq!(buf.len(), 3);
    assert_eq!(buf.last_n(3), vec![2, 3, 4]);
}

#[test]
fn test_replay_buffer_last_n_clamps() {
    let mut buf = ReplayBuffer::new(5).unwrap();
    buf.push("a");
    buf.push("b");
    assert_eq!(buf.last_n(10), vec!["a", "b"]);
    assert_eq!(buf.last_n(1), vec!["b"]);
    assert!(buf.last_n(0).is_empty());
}

#[test]
fn test_replay_buffer_empty_and_clear() {
    let mut buf: ReplayBuffer<u32> = ReplayBuffer::new(2).unwrap();
    assert!(buf.last_n(4).is_empty());
    buf.push(1);
    buf.push(2);
    buf.clear();
    assert!(buf.is_empty());
    assert_eq!(buf.capacity(), 2);
    buf.push(7);
    assert_eq!(buf.last_n(2), vec![7]);
}

#[test]
fn test_replay_buffer_rejects_zero_capacity() {
    let err = ReplayBuffer::<u32>::new(0).unwrap_err();
    assert!(matches!(err, BrokerError::InvalidArgument(_)));
}

// --- Subscriber ---

#[tokio::test]
async fn test_drop_oldest_keeps_most_recent() {
    let transport = MockTransport::closed();
    let sub = Subscriber::new("c1", transport.clone(), 3, OverflowPolicy::DropOldest);

    assert_eq!(sub.enqueue(event("0")), EnqueueOutcome::Queued);
    assert_eq!(sub.enqueue(event("1")), EnqueueOutcome::Queued);
    assert_eq!(sub.enqueue(event("2")), EnqueueOutcome::Queued);
    assert_eq!(sub.enqueue(event("3")), EnqueueOutcome::DroppedOldest);
    assert_eq!(sub.queued(), 3);

    // Let the peer catch up; the surviving messages are the newest three.
    transport.set_open(true);
    sub.schedule_drain();
    settle().await;
    assert_eq!(event_ids(&transport.frames()), vec!["1", "2", "3"]);
    assert_eq!(sub.queued(), 0);
}

#[tokio::test]
async fn test_disconnect_policy_signals_overflow() {
    let transport = MockTransport::closed();
    let sub = Subscriber::new("c1", transport.clone(), 2, OverflowPolicy::Disconnect);

    assert_eq!(sub.enqueue(event("0")), EnqueueOutcome::Queued);
    assert_eq!(sub.enqueue(event("1")), EnqueueOutcome::Queued);
    assert_eq!(sub.enqueue(event("2")), EnqueueOutcome::Overflow);
    // Nothing was queued past capacity.
    assert_eq!(sub.queued(), 2);
}

#[tokio::test]
async fn test_drain_delivers_in_order() {
    let transport = MockTransport::open();
    let sub = Subscriber::new("c1", transport.clone(), 10, OverflowPolicy::Disconnect);

    for i in 0..5 {
        sub.enqueue(event(&i.to_string()));
    }
    settle().await;
    assert_eq!(event_ids(&transport.frames()), vec!["0", "1", "2", "3", "4"]);
    assert_eq!(sub.queued(), 0);
}

#[tokio::test]
async fn test_drain_backs_off_but_finishes_under_high_water() {
    use super::subscriber::{DRAIN_BATCH, HIGH_WATER_BYTES};

    let transport = MockTransport::open();
    // The peer never catches up: every batch sees a backlog above the
    // high-water mark, forcing the yield between batches.
    transport.set_pending(HIGH_WATER_BYTES + 1);
    let total = DRAIN_BATCH * 2 + 5;
    let sub = Subscriber::new("c1", transport.clone(), total, OverflowPolicy::Disconnect);

    for i in 0..total {
        assert_eq!(sub.enqueue(event(&i.to_string())), EnqueueOutcome::Queued);
    }
    settle().await;

    // Backpressure slows the drain down; it must not stall or drop.
    let expected: Vec<String> = (0..total).map(|i| i.to_string()).collect();
    assert_eq!(event_ids(&transport.frames()), expected);
    assert_eq!(sub.queued(), 0);
}

#[tokio::test]
async fn test_redundant_drain_schedules_coalesce() {
    let transport = MockTransport::open();
    let sub = Subscriber::new("c1", transport.clone(), 200, OverflowPolicy::Disconnect);

    for i in 0..100 {
        sub.enqueue(event(&i.to_string()));
    }
    // Hammer the scheduler while the first drain is pending and running;
    // extra requests must fold into it, not start a second drain.
    for _ in 0..10 {
        sub.schedule_drain();
        tokio::task::yield_now().await;
        sub.schedule_drain();
    }
    settle().await;

    let expected: Vec<String> = (0..100).map(|i| i.to_string()).collect();
    assert_eq!(event_ids(&transport.frames()), expected);
    assert_eq!(sub.queued(), 0);
}

#[tokio::test]
async fn test_drain_noop_when_transport_not_open() {
    let transport = MockTransport::closed();
    let sub = Subscriber::new("c1", transport.clone(), 10, OverflowPolicy::Disconnect);

    sub.enqueue(event("0"));
    settle().await;
    assert!(transport.frames().is_empty());
    assert_eq!(sub.queued(), 1);
}

#[tokio::test]
async fn test_drain_stops_after_close() {
    let transport = MockTransport::open();
    let sub = Subscriber::new("c1", transport.clone(), 10, OverflowPolicy::Disconnect);

    sub.close(1000, "bye");
    sub.enqueue(event("0"));
    settle().await;
    assert!(transport.frames().is_empty());
    assert_eq!(transport.closes(), vec![(1000, "bye".to_string())]);
}

// --- Broker ---

fn broker() -> Broker {
    Broker::new(BrokerOptions::default()).unwrap()
}

#[test]
fn test_create_twice_is_conflict() {
    let mut b = broker();
    b.create_topic("t").unwrap();
    let err = b.create_topic("t").unwrap_err();
    assert_eq!(err, BrokerError::TopicExists("t".to_string()));
    assert_eq!(err.code(), "CONFLICT");
}

#[test]
fn test_create_empty_name_is_invalid() {
    let mut b = broker();
    assert!(matches!(
        b.create_topic("").unwrap_err(),
        BrokerError::InvalidArgument(_)
    ));
}

#[test]
fn test_delete_missing_is_not_found() {
    let mut b = broker();
    b.create_topic("t").unwrap();
    b.delete_topic("t", |_| {}).unwrap();
    let err = b.delete_topic("t", |_| {}).unwrap_err();
    assert_eq!(err, BrokerError::TopicNotFound("t".to_string()));
}

#[test]
fn test_subscribe_and_publish_missing_topic() {
    let mut b = broker();
    let transport = MockTransport::closed();
    assert_eq!(
        b.subscribe("nope", "c1", transport, 0).unwrap_err(),
        BrokerError::TopicNotFound("nope".to_string())
    );
    assert_eq!(
        b.publish("nope", json!({ "id": "a" }), |_| {}).unwrap_err(),
        BrokerError::TopicNotFound("nope".to_string())
    );
}

#[test]
fn test_broker_rejects_zero_capacities() {
    let bad = BrokerOptions {
        queue_capacity: 0,
        ..BrokerOptions::default()
    };
    assert!(Broker::new(bad).is_err());
    let bad = BrokerOptions {
        replay_capacity: 0,
        ..BrokerOptions::default()
    };
    assert!(Broker::new(bad).is_err());
}

#[test]
fn test_resubscribe_replaces_previous() {
    let mut b = broker();
    b.create_topic("t").unwrap();

    let first = MockTransport::closed();
    let second = MockTransport::closed();
    b.subscribe("t", "x", first.clone(), 0).unwrap();
    b.subscribe("t", "x", second.clone(), 0).unwrap();

    assert_eq!(first.closes(), vec![(1000, "replaced".to_string())]);
    assert!(second.closes().is_empty());
    assert_eq!(b.topic("t").unwrap().subscriber_count(), 1);
    assert_eq!(b.total_subscribers(), 1);
}

#[test]
fn test_delete_closes_all_subscribers() {
    let mut b = broker();
    b.create_topic("t").unwrap();

    let transports: Vec<_> = (0..3)
        .map(|i| {
            let t = MockTransport::closed();
            b.subscribe("t", &format!("c{i}"), t.clone(), 0).unwrap();
            t
        })
        .collect();
    assert_eq!(b.total_subscribers(), 3);

    let notified = AtomicUsize::new(0);
    let detached = b
        .delete_topic("t", |_| {
            notified.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert_eq!(detached, 3);
    assert_eq!(notified.load(Ordering::SeqCst), 3);
    assert_eq!(b.total_subscribers(), 0);
    for t in transports {
        assert_eq!(t.closes(), vec![(1000, "topic_deleted".to_string())]);
    }
}

#[test]
fn test_unsubscribe_token_is_idempotent() {
    let mut b = broker();
    b.create_topic("t").unwrap();
    let token = b.subscribe("t", "x", MockTransport::closed(), 0).unwrap();

    assert!(b.unsubscribe(&token));
    assert!(!b.unsubscribe(&token));
    assert_eq!(b.total_subscribers(), 0);
}

#[test]
fn test_stale_token_after_replace_is_noop() {
    let mut b = broker();
    b.create_topic("t").unwrap();
    let stale = b.subscribe("t", "x", MockTransport::closed(), 0).unwrap();
    let fresh = b.subscribe("t", "x", MockTransport::closed(), 0).unwrap();

    // The stale token must not detach the replacement subscriber.
    assert!(!b.unsubscribe(&stale));
    assert_eq!(b.total_subscribers(), 1);
    assert!(b.unsubscribe(&fresh));
    assert_eq!(b.total_subscribers(), 0);
}

#[tokio::test]
async fn test_publish_overflow_invokes_handler() {
    let options = BrokerOptions {
        queue_capacity: 1,
        overflow_policy: OverflowPolicy::Disconnect,
        replay_capacity: 10,
    };
    let mut b = Broker::new(options).unwrap();
    b.create_topic("t").unwrap();
    b.subscribe("t", "slow", MockTransport::closed(), 0).unwrap();

    let overflowed = Mutex::new(Vec::new());
    b.publish("t", json!({ "id": "a" }), |s| {
        overflowed.lock().unwrap().push(s.client_id().to_string())
    })
    .unwrap();
    assert!(overflowed.lock().unwrap().is_empty());

    b.publish("t", json!({ "id": "b" }), |s| {
        overflowed.lock().unwrap().push(s.client_id().to_string())
    })
    .unwrap();
    assert_eq!(*overflowed.lock().unwrap(), vec!["slow".to_string()]);
    // Replay history still records the rejected publish.
    assert_eq!(b.topic("t").unwrap().message_count(), 2);
}

#[tokio::test]
async fn test_replay_then_live_delivery() {
    let options = BrokerOptions {
        replay_capacity: 2,
        ..BrokerOptions::default()
    };
    let mut b = Broker::new(options).unwrap();
    b.create_topic("orders").unwrap();

    for id in ["a", "b", "c"] {
        b.publish("orders", json!({ "id": id }), |_| {}).unwrap();
    }

    let transport = MockTransport::open();
    b.subscribe("orders", "x", transport.clone(), 2).unwrap();
    settle().await;
    // Capacity 2, so the replay is exactly the last two publishes.
    assert_eq!(event_ids(&transport.frames()), vec!["b", "c"]);

    b.publish("orders", json!({ "id": "d" }), |_| {}).unwrap();
    settle().await;
    assert_eq!(event_ids(&transport.frames()), vec!["b", "c", "d"]);
}

#[tokio::test]
async fn test_fanout_reaches_every_subscriber() {
    let mut b = broker();
    b.create_topic("t").unwrap();
    let t1 = MockTransport::open();
    let t2 = MockTransport::open();
    b.subscribe("t", "c1", t1.clone(), 0).unwrap();
    b.subscribe("t", "c2", t2.clone(), 0).unwrap();

    b.publish("t", json!({ "id": "a" }), |_| {}).unwrap();
    settle().await;
    assert_eq!(event_ids(&t1.frames()), vec!["a"]);
    assert_eq!(event_ids(&t2.frames()), vec!["a"]);
}

#[tokio::test]
async fn test_stats_and_list() {
    let mut b = broker();
    b.create_topic("a").unwrap();
    b.create_topic("b").unwrap();
    b.subscribe("a", "c1", MockTransport::closed(), 0).unwrap();
    b.publish("a", json!({ "id": "1" }), |_| {}).unwrap();
    b.publish("a", json!({ "id": "2" }), |_| {}).unwrap();

    let mut list = b.list();
    list.sort_by(|x, y| x.name.cmp(&y.name));
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].name, "a");
    assert_eq!(list[0].subscribers, 1);
    assert_eq!(list[1].subscribers, 0);

    let stats = b.stats();
    assert_eq!(stats.total_subscribers, 1);
    assert_eq!(stats.topics["a"].messages, 2);
    assert_eq!(stats.topics["b"].messages, 0);
    assert_eq!(b.topic_count(), 2);
}

#[test]
fn test_shutdown_closes_everything() {
    let mut b = broker();
    b.create_topic("t").unwrap();
    let transport = MockTransport::closed();
    b.subscribe("t", "c1", transport.clone(), 0).unwrap();

    b.shutdown();
    assert_eq!(b.topic_count(), 0);
    assert_eq!(b.total_subscribers(), 0);
    assert_eq!(transport.closes(), vec![(1000, "shutting_down".to_string())]);
}
