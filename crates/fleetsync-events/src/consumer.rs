//! The notification consumer loop.
//!
//! Each record is decoded, handed to the [`EventHandler`] and acknowledged
//! with a [`DoneNotification`] on the [`EventSink`], retried under the
//! [`RetryPolicy`]. When the retry times out the failure handler picks a
//! [`FailurePolicy`]:
//!
//! - `Fatal` stops the consumer with an error; nothing past the last success
//!   is committed.
//! - `Skip` continues with the next record but freezes the committed offset
//!   before the failed record, so it is redelivered after a restart.
//!
//! Records that do not decode can never succeed; they are logged and treated
//! as handled.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use fleetsync_core::Error;
use fleetsync_core::metrics::record_event_processed;

use crate::error::{EventError, Result};
use crate::message::{DeviceGroupCommand, DoneNotification, EventRecord};
use crate::retry::RetryPolicy;

/// Source of raw records with offset commits.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Next record, `None` once the source is exhausted.
    async fn next(&self) -> fleetsync_core::Result<Option<EventRecord>>;

    /// Acknowledges every record up to and including `offset`.
    async fn commit(&self, offset: u64) -> fleetsync_core::Result<()>;
}

/// Runs one device-group command.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name reported in completion notices.
    fn name(&self) -> &str;

    /// Handles `command`. May run more than once for the same command.
    async fn handle(&self, command: &DeviceGroupCommand) -> fleetsync_core::Result<()>;
}

/// Destination of completion notices.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publishes `notification`.
    async fn send(&self, notification: &DoneNotification) -> fleetsync_core::Result<()>;
}

/// What to do with a record whose retries timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the consumer.
    Fatal,
    /// Continue without committing past the record.
    Skip,
}

/// Picks a [`FailurePolicy`] for a record that kept failing.
pub type FailureHandler =
    Arc<dyn Fn(&DeviceGroupCommand, Option<&Error>) -> FailurePolicy + Send + Sync>;

/// Counts of one consumer run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Records handled and acknowledged.
    pub processed: usize,
    /// Records skipped after their retries timed out.
    pub skipped: usize,
    /// Records that did not decode.
    pub malformed: usize,
    /// Last committed offset.
    pub committed: Option<u64>,
}

/// Consumes device-group commands with bounded retry.
pub struct EventConsumer {
    source: Arc<dyn EventSource>,
    handler: Arc<dyn EventHandler>,
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
    on_failure: FailureHandler,
}

impl std::fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConsumer")
            .field("handler", &self.handler.name())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl EventConsumer {
    /// Creates a consumer that treats every timed-out record as fatal.
    #[must_use]
    pub fn new(
        source: Arc<dyn EventSource>,
        handler: Arc<dyn EventHandler>,
        sink: Arc<dyn EventSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            handler,
            sink,
            retry,
            on_failure: Arc::new(|_, _| FailurePolicy::Fatal),
        }
    }

    /// Sets the failure handler.
    #[must_use]
    pub fn on_failure(
        mut self,
        handler: impl Fn(&DeviceGroupCommand, Option<&Error>) -> FailurePolicy + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Arc::new(handler);
        self
    }

    /// Consumes until the source is exhausted or `cancel` fires.
    ///
    /// A record already being retried when `cancel` fires is finished first.
    ///
    /// # Errors
    ///
    /// [`EventError::RetryTimeout`] if a record failed under the `Fatal`
    /// policy, [`EventError::Stream`] if reading or committing failed.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ConsumerReport> {
        let mut report = ConsumerReport::default();
        let mut frozen = false;

        loop {
            let record = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                record = self.source.next() => record?,
            };
            let Some(record) = record else { break };

            let command = match record.decode() {
                Ok(command) => command,
                Err(e) => {
                    tracing::warn!(offset = record.offset, error = %e, "dropping malformed event");
                    record_event_processed("malformed");
                    report.malformed += 1;
                    self.advance(&mut report, frozen, record.offset).await?;
                    continue;
                }
            };

            match self.retry.run(|| self.process(&command)).await {
                Ok(()) => {
                    record_event_processed("ok");
                    report.processed += 1;
                    self.advance(&mut report, frozen, record.offset).await?;
                }
                Err(exhausted) => {
                    let policy = (self.on_failure)(&command, exhausted.last_error.as_ref());
                    tracing::warn!(
                        offset = record.offset,
                        command = %command.command,
                        id = %command.id,
                        attempts = exhausted.attempts,
                        ?policy,
                        "event retries exhausted"
                    );
                    match policy {
                        FailurePolicy::Fatal => {
                            record_event_processed("fatal");
                            return Err(EventError::RetryTimeout {
                                offset: record.offset,
                                attempts: exhausted.attempts,
                                last_error: exhausted.last_error,
                            });
                        }
                        FailurePolicy::Skip => {
                            record_event_processed("skipped");
                            report.skipped += 1;
                            frozen = true;
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    async fn process(&self, command: &DeviceGroupCommand) -> fleetsync_core::Result<()> {
        self.handler.handle(command).await?;
        let done = DoneNotification::for_command(command, self.handler.name());
        self.sink.send(&done).await
    }

    async fn advance(&self, report: &mut ConsumerReport, frozen: bool, offset: u64) -> Result<()> {
        if frozen {
            return Ok(());
        }
        self.source.commit(offset).await?;
        report.committed = Some(offset);
        Ok(())
    }
}
