use std::collections::HashMap;
use std::sync::Arc;

use crate::broker::message::{EventEnvelope, ReplayEntry};
use crate::broker::replay::ReplayBuffer;
use crate::broker::subscriber::{EnqueueOutcome, Subscriber};
use crate::utils::error::BrokerError;

pub type ClientId = String;

/// Per-topic counters exposed by the stats endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TopicStats {
    pub messages: u64,
    pub subscribers: usize,
}

/// A named channel: its current subscribers plus a bounded replay history.
///
/// The name is fixed at creation and the subscriber map holds at most one
/// entry per client id; last-writer-wins replacement is handled by the
/// broker before insertion.
pub struct Topic {
    name: String,
    subscribers: HashMap<ClientId, Arc<Subscriber>>,
    messages: u64,
    replay: ReplayBuffer<ReplayEntry>,
}

impl Topic {
    pub fn new(name: &str, replay_capacity: usize) -> Result<Self, BrokerError> {
        if name.is_empty() {
            return Err(BrokerError::InvalidArgument(
                "topic name must be non-empty".to_string(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            subscribers: HashMap::new(),
            messages: 0,
            replay: ReplayBuffer::new(replay_capacity)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_count(&self) -> u64 {
        self.messages
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn replay(&self) -> &ReplayBuffer<ReplayEntry> {
        &self.replay
    }

    pub fn has_subscriber(&self, client_id: &str) -> bool {
        self.subscribers.contains_key(client_id)
    }

    pub fn get_subscriber(&self, client_id: &str) -> Option<&Arc<Subscriber>> {
        self.subscribers.get(client_id)
    }

    pub fn add_subscriber(&mut self, sub: Arc<Subscriber>) {
        self.subscribers.insert(sub.client_id().to_string(), sub);
    }

    pub fn remove_subscriber(&mut self, client_id: &str) -> Option<Arc<Subscriber>> {
        self.subscribers.remove(client_id)
    }

    pub fn subscribers(&self) -> impl Iterator<Item = &Arc<Subscriber>> {
        self.subscribers.values()
    }

    /// Records a publish: bumps the counter and stores the payload in the
    /// replay buffer.
    pub fn record(&mut self, entry: ReplayEntry) {
        self.messages += 1;
        self.replay.push(entry);
    }

    /// Enqueues `event` on every current subscriber, returning the ones
    /// that overflowed under the `disconnect` policy.
    ///
    /// Fan-out is not transactional: each subscriber gets its own clone
    /// of the event and a slow or overflowing one never stalls the rest.
    pub fn fanout(&self, event: &EventEnvelope) -> Vec<Arc<Subscriber>> {
        let mut overflowed = Vec::new();
        for sub in self.subscribers.values() {
            if sub.enqueue(event.clone()) == EnqueueOutcome::Overflow {
                overflowed.push(Arc::clone(sub));
            }
        }
        overflowed
    }

    pub fn stats(&self) -> TopicStats {
        TopicStats {
            messages: self.messages,
            subscribers: self.subscribers.len(),
        }
    }
}
