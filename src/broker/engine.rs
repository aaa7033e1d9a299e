use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::broker::message::{EventEnvelope, ReplayEntry};
use crate::broker::subscriber::{OverflowPolicy, Subscriber};
use crate::broker::topic::{Topic, TopicStats};
use crate::transport::Transport;
use crate::utils::error::BrokerError;

/// Normal-closure WebSocket status used for broker-initiated closes.
const CLOSE_NORMAL: u16 = 1000;

/// Broker-wide knobs applied to every topic and subscriber.
#[derive(Debug, Clone, Copy)]
pub struct BrokerOptions {
    /// Pending-frame queue capacity per subscriber.
    pub queue_capacity: usize,
    /// What happens when that queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Replay history kept per topic.
    pub replay_capacity: usize,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            overflow_policy: OverflowPolicy::Disconnect,
            replay_capacity: 100,
        }
    }
}

/// Proof of one specific subscriber registration, returned by
/// [`Broker::subscribe`].
///
/// Redeeming it through [`Broker::unsubscribe`] removes exactly that
/// registration: if the client re-subscribed in the meantime (replacing
/// the subscriber) or the topic was deleted, redeeming is a no-op.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    client_id: String,
    subscriber: Weak<Subscriber>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicSummary {
    pub name: String,
    pub subscribers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub topics: HashMap<String, TopicStats>,
    pub total_subscribers: usize,
}

/// The topic registry and the engine's sole API surface.
///
/// One instance per process, owned behind an `Arc<Mutex<_>>` shared by the
/// WebSocket handler and the HTTP control plane; every registry mutation
/// runs to completion under that lock while subscriber drains proceed as
/// independent tasks.
pub struct Broker {
    topics: HashMap<String, Topic>,
    options: BrokerOptions,
    started_at: Instant,
    total_subscribers: usize,
}

impl Broker {
    /// Fails fast on zero capacities; those are configuration errors, not
    /// runtime conditions.
    pub fn new(options: BrokerOptions) -> Result<Self, BrokerError> {
        if options.queue_capacity < 1 {
            return Err(BrokerError::InvalidArgument(
                "queue capacity must be >= 1".to_string(),
            ));
        }
        if options.replay_capacity < 1 {
            return Err(BrokerError::InvalidArgument(
                "replay capacity must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            topics: HashMap::new(),
            options,
            started_at: Instant::now(),
            total_subscribers: 0,
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn total_subscribers(&self) -> usize {
        self.total_subscribers
    }

    pub fn topic(&self, name: &str) -> Option<&Topic> {
        self.topics.get(name)
    }

    /// Registers a new topic with the configured replay capacity.
    pub fn create_topic(&mut self, name: &str) -> Result<(), BrokerError> {
        if self.topics.contains_key(name) {
            return Err(BrokerError::TopicExists(name.to_string()));
        }
        let topic = Topic::new(name, self.options.replay_capacity)?;
        self.topics.insert(name.to_string(), topic);
        info!(topic = name, "topic created");
        Ok(())
    }

    /// Removes a topic, force-closing every subscriber.
    ///
    /// `notify` runs best-effort against each subscriber's transport
    /// before the close, so the adapter can send a courtesy frame. Once
    /// this returns, no publish can reach the detached subscribers; their
    /// drains observe the closed flag and stop. Returns how many
    /// subscribers were detached.
    pub fn delete_topic(
        &mut self,
        name: &str,
        notify: impl Fn(&Arc<dyn Transport>),
    ) -> Result<usize, BrokerError> {
        let topic = self
            .topics
            .remove(name)
            .ok_or_else(|| BrokerError::TopicNotFound(name.to_string()))?;

        let mut detached = 0;
        for sub in topic.subscribers() {
            notify(sub.transport());
            sub.close(CLOSE_NORMAL, "topic_deleted");
            self.total_subscribers = self.total_subscribers.saturating_sub(1);
            detached += 1;
        }
        info!(topic = name, detached, "topic deleted");
        Ok(detached)
    }

    /// Attaches `client_id` to a topic, replacing any previous
    /// subscription it held there (last-writer-wins), and queues up to
    /// `replay_count` recent messages.
    ///
    /// The subscriber is registered before the replay snapshot is taken:
    /// a message published concurrently with this call is delivered at
    /// least once (possibly twice, once from replay and once live), never
    /// silently missed. Replay shares [`EventEnvelope::new`] with live
    /// fan-out and is queued, not flushed, before any later publish can
    /// reach the new subscriber.
    pub fn subscribe(
        &mut self,
        name: &str,
        client_id: &str,
        transport: Arc<dyn Transport>,
        replay_count: usize,
    ) -> Result<Subscription, BrokerError> {
        if client_id.is_empty() {
            return Err(BrokerError::InvalidArgument(
                "client id must be non-empty".to_string(),
            ));
        }
        let topic = self
            .topics
            .get_mut(name)
            .ok_or_else(|| BrokerError::TopicNotFound(name.to_string()))?;

        if let Some(prev) = topic.remove_subscriber(client_id) {
            prev.close(CLOSE_NORMAL, "replaced");
            self.total_subscribers = self.total_subscribers.saturating_sub(1);
            debug!(topic = name, client_id, "previous subscriber replaced");
        }

        let sub = Subscriber::new(
            client_id,
            transport,
            self.options.queue_capacity,
            self.options.overflow_policy,
        );
        topic.add_subscriber(Arc::clone(&sub));
        self.total_subscribers += 1;

        if replay_count > 0 {
            for entry in topic.replay().last_n(replay_count) {
                sub.enqueue(EventEnvelope::new(name, entry.message));
            }
        }
        debug!(topic = name, client_id, replay_count, "subscribed");

        Ok(Subscription {
            topic: name.to_string(),
            client_id: client_id.to_string(),
            subscriber: Arc::downgrade(&sub),
        })
    }

    /// Redeems a [`Subscription`], detaching that exact subscriber.
    ///
    /// Idempotent: returns `false` when the registration is already gone
    /// or was replaced by a newer one for the same client id.
    pub fn unsubscribe(&mut self, token: &Subscription) -> bool {
        let Some(subscriber) = token.subscriber.upgrade() else {
            return false;
        };
        let Some(topic) = self.topics.get_mut(&token.topic) else {
            return false;
        };
        let registered = topic
            .get_subscriber(&token.client_id)
            .is_some_and(|current| Arc::ptr_eq(current, &subscriber));
        if !registered {
            return false;
        }
        topic.remove_subscriber(&token.client_id);
        self.total_subscribers = self.total_subscribers.saturating_sub(1);
        debug!(topic = %token.topic, client_id = %token.client_id, "unsubscribed");
        true
    }

    /// Accepts a message for a topic: records it in the replay buffer and
    /// starts fan-out to the current subscribers.
    ///
    /// Returns once every subscriber has the event queued (or has been
    /// reported to `on_overflow`), not once delivery completed. The
    /// overflow callback fires once per subscriber whose queue rejected
    /// the event under the `disconnect` policy; the adapter is expected
    /// to error and close that one connection.
    pub fn publish(
        &mut self,
        name: &str,
        message: Value,
        mut on_overflow: impl FnMut(&Arc<Subscriber>),
    ) -> Result<(), BrokerError> {
        let topic = self
            .topics
            .get_mut(name)
            .ok_or_else(|| BrokerError::TopicNotFound(name.to_string()))?;

        let event = EventEnvelope::new(name, message);
        topic.record(ReplayEntry {
            ts: event.ts.clone(),
            message: event.message.clone(),
        });
        for sub in topic.fanout(&event) {
            debug!(topic = name, client_id = sub.client_id(), "subscriber overflow");
            on_overflow(&sub);
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<TopicSummary> {
        self.topics
            .values()
            .map(|t| TopicSummary {
                name: t.name().to_string(),
                subscribers: t.subscriber_count(),
            })
            .collect()
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            topics: self
                .topics
                .iter()
                .map(|(name, t)| (name.clone(), t.stats()))
                .collect(),
            total_subscribers: self.total_subscribers,
        }
    }

    /// Tears down every topic at process shutdown, closing all
    /// subscriber transports.
    pub fn shutdown(&mut self) {
        for (name, topic) in self.topics.drain() {
            for sub in topic.subscribers() {
                sub.close(CLOSE_NORMAL, "shutting_down");
                self.total_subscribers = self.total_subscribers.saturating_sub(1);
            }
            debug!(topic = %name, "topic closed at shutdown");
        }
    }
}
