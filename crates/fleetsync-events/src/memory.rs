//! In-memory source and sink for tests and local runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use fleetsync_core::{Error, Result};

use crate::consumer::{EventSink, EventSource};
use crate::message::{DoneNotification, EventRecord};

/// Finite source that remembers its last commit.
#[derive(Debug, Default)]
pub struct InMemoryEventSource {
    pending: Mutex<VecDeque<EventRecord>>,
    committed: Mutex<Option<u64>>,
    next_offset: Mutex<u64>,
}

impl InMemoryEventSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record with the next offset. Returns the offset.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned.
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> Result<u64> {
        let mut next = self
            .next_offset
            .lock()
            .map_err(|_| Error::internal("event source lock poisoned"))?;
        let offset = *next;
        *next += 1;
        self.pending
            .lock()
            .map_err(|_| Error::internal("event source lock poisoned"))?
            .push_back(EventRecord {
                offset,
                payload: payload.into(),
            });
        Ok(offset)
    }

    /// Returns the last committed offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn committed(&self) -> Result<Option<u64>> {
        self.committed
            .lock()
            .map(|c| *c)
            .map_err(|_| Error::internal("event source lock poisoned"))
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn next(&self) -> Result<Option<EventRecord>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| Error::internal("event source lock poisoned"))?;
        Ok(pending.pop_front())
    }

    async fn commit(&self, offset: u64) -> Result<()> {
        let mut committed = self
            .committed
            .lock()
            .map_err(|_| Error::internal("event source lock poisoned"))?;
        *committed = Some(offset);
        Ok(())
    }
}

/// Sink that records every notice.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<DoneNotification>>,
    failing: AtomicBool,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send fail while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns the notices sent so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn sent(&self) -> Result<Vec<DoneNotification>> {
        self.sent
            .lock()
            .map(|s| s.clone())
            .map_err(|_| Error::internal("sink lock poisoned"))
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, notification: &DoneNotification) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::transport("sink unavailable"));
        }
        self.sent
            .lock()
            .map_err(|_| Error::internal("sink lock poisoned"))?
            .push(notification.clone());
        Ok(())
    }
}
