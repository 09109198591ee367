//! Observability metrics for fleetsync.
//!
//! Metrics are recorded through the `metrics` crate facade and exported by
//! the server binary in Prometheus format.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `fleetsync_warden_actions_total` | Counter | `action` | Corrective actions issued by the engine |
//! | `fleetsync_warden_errors_total` | Counter | `loop` | Item checks that failed |
//! | `fleetsync_warden_tick_seconds` | Histogram | - | Duration of one engine tick |
//! | `fleetsync_sync_messages_total` | Counter | `entity`, `kind` | Inbound state messages applied |
//! | `fleetsync_sync_dropped_total` | Counter | `reason` | Inbound messages dropped |
//! | `fleetsync_sync_pruned_total` | Counter | `entity` | Records removed by known-ids |
//! | `fleetsync_resync_commands_total` | Counter | `command` | Commands resent by the re-sync pass |
//! | `fleetsync_events_processed_total` | Counter | `result` | Notification events handled |

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: corrective actions issued by the reconciliation engine.
    pub const WARDEN_ACTIONS_TOTAL: &str = "fleetsync_warden_actions_total";
    /// Counter: item checks that returned an error.
    pub const WARDEN_ERRORS_TOTAL: &str = "fleetsync_warden_errors_total";
    /// Histogram: engine tick duration in seconds.
    pub const WARDEN_TICK_SECONDS: &str = "fleetsync_warden_tick_seconds";
    /// Counter: inbound state messages applied to the catalog.
    pub const SYNC_MESSAGES_TOTAL: &str = "fleetsync_sync_messages_total";
    /// Counter: inbound state messages dropped.
    pub const SYNC_DROPPED_TOTAL: &str = "fleetsync_sync_dropped_total";
    /// Counter: catalog records removed by known-ids messages.
    pub const SYNC_PRUNED_TOTAL: &str = "fleetsync_sync_pruned_total";
    /// Counter: commands resent by the periodic re-sync pass.
    pub const RESYNC_COMMANDS_TOTAL: &str = "fleetsync_resync_commands_total";
    /// Counter: notification events handled, by result.
    pub const EVENTS_PROCESSED_TOTAL: &str = "fleetsync_events_processed_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Corrective action kind (start, stop, deploy, remove).
    pub const ACTION: &str = "action";
    /// Engine loop name (db, processes).
    pub const LOOP: &str = "loop";
    /// Synced entity name as used in topics.
    pub const ENTITY: &str = "entity";
    /// Message kind (upsert, delete, known).
    pub const KIND: &str = "kind";
    /// Drop reason.
    pub const REASON: &str = "reason";
    /// Command name.
    pub const COMMAND: &str = "command";
    /// Result status.
    pub const RESULT: &str = "result";
}

/// Records one corrective action of the reconciliation engine.
pub fn record_warden_action(action: &'static str) {
    counter!(names::WARDEN_ACTIONS_TOTAL, labels::ACTION => action).increment(1);
}

/// Records a failed item check in one of the engine loops.
pub fn record_warden_error(loop_name: &'static str) {
    counter!(names::WARDEN_ERRORS_TOTAL, labels::LOOP => loop_name).increment(1);
}

/// Records an applied inbound state message.
pub fn record_sync_message(entity: &'static str, kind: &'static str) {
    counter!(
        names::SYNC_MESSAGES_TOTAL,
        labels::ENTITY => entity,
        labels::KIND => kind,
    )
    .increment(1);
}

/// Records a dropped inbound message.
pub fn record_sync_dropped(reason: &'static str) {
    counter!(names::SYNC_DROPPED_TOTAL, labels::REASON => reason).increment(1);
}

/// Records records pruned by a known-ids message.
pub fn record_sync_pruned(entity: &'static str, count: usize) {
    counter!(names::SYNC_PRUNED_TOTAL, labels::ENTITY => entity)
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Records a command resent by the re-sync pass.
pub fn record_resync_command(command: &'static str) {
    counter!(names::RESYNC_COMMANDS_TOTAL, labels::COMMAND => command).increment(1);
}

/// Records the outcome of one notification event.
pub fn record_event_processed(result: &'static str) {
    counter!(names::EVENTS_PROCESSED_TOTAL, labels::RESULT => result).increment(1);
}

/// RAII guard for timing operations.
///
/// Calls `on_drop` with the elapsed duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

/// Creates a timing guard recording one engine tick.
#[must_use]
pub fn time_warden_tick() -> TimingGuard<impl FnOnce(Duration)> {
    TimingGuard::new(|duration| {
        histogram!(names::WARDEN_TICK_SECONDS).record(duration.as_secs_f64());
    })
}
