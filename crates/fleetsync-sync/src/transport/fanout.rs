//! Fan-out over several brokers.
//!
//! Every publish and subscribe is issued to all brokers concurrently. The
//! composite call completes once every broker has answered and fails with one
//! aggregated [`Error::Transport`] naming each broker that failed.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;

use fleetsync_core::error::BrokerFailure;
use fleetsync_core::{Error, Result};

use super::{Broker, MessageHandler};

/// Mirrors every operation to a set of brokers.
pub struct FanoutBroker {
    name: String,
    brokers: Vec<Arc<dyn Broker>>,
}

impl std::fmt::Debug for FanoutBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.brokers.iter().map(|b| b.name()).collect();
        f.debug_struct("FanoutBroker")
            .field("brokers", &names)
            .finish()
    }
}

impl FanoutBroker {
    /// Creates a fan-out over `brokers`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `brokers` is empty.
    pub fn new(brokers: Vec<Arc<dyn Broker>>) -> Result<Self> {
        if brokers.is_empty() {
            return Err(Error::Configuration(
                "fan-out needs at least one broker".into(),
            ));
        }
        let name = brokers
            .iter()
            .map(|b| b.name())
            .collect::<Vec<_>>()
            .join(",");
        Ok(Self { name, brokers })
    }

    /// Number of brokers served.
    #[must_use]
    pub fn len(&self) -> usize {
        self.brokers.len()
    }

    /// Always false; construction rejects an empty set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty()
    }
}

fn collect_failures(results: Vec<(String, Result<()>)>) -> Vec<BrokerFailure> {
    results
        .into_iter()
        .filter_map(|(broker, result)| {
            result.err().map(|e| BrokerFailure {
                broker,
                message: e.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl Broker for FanoutBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let results = join_all(self.brokers.iter().map(|broker| {
            let payload = payload.clone();
            async move { (broker.name().to_string(), broker.publish(topic, payload).await) }
        }))
        .await;

        let failures = collect_failures(results);
        if failures.is_empty() {
            return Ok(());
        }
        tracing::warn!(topic, failed = failures.len(), total = self.brokers.len(), "fan-out publish failed");
        Err(Error::transport_aggregate("publish", failures))
    }

    async fn subscribe(&self, filter: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let results = join_all(self.brokers.iter().map(|broker| {
            let handler = Arc::clone(&handler);
            async move { (broker.name().to_string(), broker.subscribe(filter, handler).await) }
        }))
        .await;

        let failures = collect_failures(results);
        if failures.is_empty() {
            return Ok(());
        }
        tracing::warn!(filter, failed = failures.len(), total = self.brokers.len(), "fan-out subscribe failed");
        Err(Error::transport_aggregate("subscribe", failures))
    }
}
