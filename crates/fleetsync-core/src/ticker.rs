//! Fixed-rate periodic task runner.
//!
//! Both the reconciliation engine and the re-sync pass run on a single timer
//! task. A tick that fires while the previous tick's work is still running is
//! dropped, never queued, and cancellation stops re-arming the timer without
//! interrupting the work already in flight.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Spawns a task that runs `tick` every `period` until `cancel` fires.
///
/// The first tick runs immediately. Each tick's future is awaited to
/// completion before the timer is polled again.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(task = name, period_ms = period.as_millis(), "periodic task started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            tick().await;
        }

        tracing::info!(task = name, "periodic task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn ticks_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = Arc::clone(&count);
        let handle = spawn_periodic("test", Duration::from_secs(10), cancel.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        handle.await.unwrap();

        // ticks at t=0, t=10, t=20
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tick_drops_missed_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = Arc::clone(&count);
        let handle = spawn_periodic("slow", Duration::from_secs(10), cancel.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(35)).await;
            }
        });

        tokio::time::sleep(Duration::from_secs(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        // t=0 runs until t=35; the overdue tick fires once at t=35 and the rest of
        // the missed ticks are dropped. That run ends at t=70, after cancellation.
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
