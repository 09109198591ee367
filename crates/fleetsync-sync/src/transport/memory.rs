//! In-memory broker implementation for testing.
//!
//! This module provides [`InMemoryBroker`], a loopback implementation of the
//! [`Broker`] trait that records every publish and delivers it inline to
//! matching subscribers.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No network, no persistence
//! - **Single-process only**: Subscribers must share the broker instance
//! - **Shared subscriptions are not balanced**: Every matching subscriber
//!   receives every message

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use fleetsync_core::{Error, Result};

use super::{Broker, InboundMessage, MessageHandler, topic_matches};

/// A message recorded by [`InMemoryBroker::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic it was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
}

impl PublishedMessage {
    /// Returns the payload as UTF-8 text, lossily.
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

struct Subscription {
    filter: String,
    handler: Arc<dyn MessageHandler>,
}

/// Loopback broker that records publishes.
pub struct InMemoryBroker {
    name: String,
    published: RwLock<Vec<PublishedMessage>>,
    subscriptions: RwLock<Vec<Subscription>>,
    failing: AtomicBool,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new("memory")
    }
}

/// Converts a lock poison error to a transport error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::transport("broker lock poisoned")
}

impl InMemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            published: RwLock::new(Vec::new()),
            subscriptions: RwLock::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Makes every publish and subscribe fail while `failing` is true.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns every message published so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn published(&self) -> Result<Vec<PublishedMessage>> {
        Ok(self.published.read().map_err(poison_err)?.clone())
    }

    /// Returns the messages published on exactly `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn published_to(&self, topic: &str) -> Result<Vec<PublishedMessage>> {
        Ok(self
            .published
            .read()
            .map_err(poison_err)?
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect())
    }

    /// Forgets recorded publishes.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn clear_published(&self) -> Result<()> {
        self.published.write().map_err(poison_err)?.clear();
        Ok(())
    }

    /// Returns the filters subscribed so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn filters(&self) -> Result<Vec<String>> {
        Ok(self
            .subscriptions
            .read()
            .map_err(poison_err)?
            .iter()
            .map(|s| s.filter.clone())
            .collect())
    }

    /// Delivers a message to matching subscribers without recording it.
    ///
    /// Simulates a message published by an agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub async fn deliver(&self, topic: &str, payload: impl Into<Bytes>) -> Result<usize> {
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .subscriptions
            .read()
            .map_err(poison_err)?
            .iter()
            .filter(|s| topic_matches(&s.filter, topic))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        let message = InboundMessage::new(topic, payload);
        for handler in &handlers {
            handler.handle(message.clone()).await;
        }
        Ok(handlers.len())
    }

    fn check_failure(&self, operation: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::transport(format!(
                "injected {operation} failure on {}",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.check_failure("publish")?;
        self.published
            .write()
            .map_err(poison_err)?
            .push(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            });
        self.deliver(topic, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, filter: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.check_failure("subscribe")?;
        self.subscriptions
            .write()
            .map_err(poison_err)?
            .push(Subscription {
                filter: filter.to_string(),
                handler,
            });
        Ok(())
    }
}
