//! The pub/sub engine: topic registry, subscriber queueing and bounded
//! replay history. Transports call in through [`Broker`]; everything
//! outbound goes through the queue-and-drain machinery in `subscriber`.

pub mod engine;
pub mod message;
pub mod replay;
pub mod subscriber;
pub mod topic;

pub use engine::{Broker, BrokerOptions, BrokerStats, Subscription, TopicSummary};
pub use message::EventEnvelope;
pub use replay::ReplayBuffer;
pub use subscriber::{EnqueueOutcome, OverflowPolicy, Subscriber};

#[cfg(test)]
mod tests;
