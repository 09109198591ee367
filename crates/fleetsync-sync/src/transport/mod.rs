//! Pub/sub transport abstraction.
//!
//! This module provides:
//!
//! - [`Broker`]: Trait for publishing and subscribing on a pub/sub broker
//! - [`MessageHandler`]: Callback invoked for every delivered message
//! - [`memory::InMemoryBroker`]: Recording broker for tests
//! - [`mqtt::MqttBroker`]: MQTT broker connection
//! - [`fanout::FanoutBroker`]: Mirrors every operation to several brokers
//!
//! ## Design Principles
//!
//! - **Exactly once**: Every publish and subscription uses QoS 2
//! - **Inline delivery**: Handlers run in the delivery callback; the catalog's
//!   per-record replace is the only serialization point between them
//! - **Shared subscriptions**: Filters may carry a `$share/<group>/` prefix

pub mod fanout;
pub mod memory;
pub mod mqtt;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use fleetsync_core::Result;

use crate::topics::strip_share_prefix;

/// A message delivered by a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
}

impl InboundMessage {
    /// Creates an inbound message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Receives messages for a subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one message. Failures are the handler's to log.
    async fn handle(&self, message: InboundMessage);
}

/// A pub/sub broker connection.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Broker name used in logs and aggregated errors.
    fn name(&self) -> &str;

    /// Publishes a payload.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Subscribes `handler` to every topic matching `filter`.
    async fn subscribe(&self, filter: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;
}

/// Returns true if `topic` matches the MQTT subscription `filter`.
///
/// Supports the single-level `+` and multi-level `#` wildcards and ignores a
/// `$share/<group>/` prefix on the filter.
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = strip_share_prefix(filter).split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
