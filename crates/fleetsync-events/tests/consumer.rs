//! Commit semantics of the notification consumer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use fleetsync_core::Error;
use fleetsync_events::memory::{InMemoryEventSource, RecordingSink};
use fleetsync_events::{
    DeviceGroupCommand, EventConsumer, EventError, EventHandler, FailurePolicy, RetryPolicy,
};

#[derive(Default)]
struct FlakyHandler {
    always_fail: HashSet<String>,
    fail_times: Mutex<HashMap<String, u32>>,
    handled: Mutex<Vec<String>>,
}

impl FlakyHandler {
    fn failing(ids: &[&str]) -> Self {
        Self {
            always_fail: ids.iter().map(|id| (*id).to_string()).collect(),
            ..Self::default()
        }
    }

    fn flaky(id: &str, times: u32) -> Self {
        Self {
            fail_times: Mutex::new(HashMap::from([(id.to_string(), times)])),
            ..Self::default()
        }
    }

    fn handled(&self) -> Vec<String> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for FlakyHandler {
    fn name(&self) -> &str {
        "device-groups"
    }

    async fn handle(&self, command: &DeviceGroupCommand) -> fleetsync_core::Result<()> {
        if self.always_fail.contains(&command.id) {
            return Err(Error::storage("catalog down"));
        }
        if let Some(left) = self.fail_times.lock().unwrap().get_mut(&command.id) {
            if *left > 0 {
                *left -= 1;
                return Err(Error::storage("catalog busy"));
            }
        }
        self.handled.lock().unwrap().push(command.id.clone());
        Ok(())
    }
}

fn command(id: &str) -> Vec<u8> {
    serde_json::to_vec(&DeviceGroupCommand {
        command: "sync".into(),
        id: id.into(),
        owner: "acme".into(),
        device_group: "pumps".into(),
    })
    .unwrap()
}

fn source(ids: &[&str]) -> Arc<InMemoryEventSource> {
    let source = Arc::new(InMemoryEventSource::new());
    for id in ids {
        source.push(command(id)).unwrap();
    }
    source
}

fn retry() -> RetryPolicy {
    RetryPolicy::exponential(
        Duration::from_millis(100),
        Duration::from_secs(2),
        Duration::from_secs(10),
    )
}

fn consumer(
    source: &Arc<InMemoryEventSource>,
    handler: &Arc<FlakyHandler>,
    sink: &Arc<RecordingSink>,
) -> EventConsumer {
    EventConsumer::new(source.clone(), handler.clone(), sink.clone(), retry())
}

#[tokio::test(start_paused = true)]
async fn handled_records_are_committed_and_acknowledged() {
    let source = source(&["dg-1", "dg-2", "dg-3"]);
    let handler = Arc::new(FlakyHandler::default());
    let sink = Arc::new(RecordingSink::new());

    let report = consumer(&source, &handler, &sink)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.committed, Some(2));
    assert_eq!(source.committed().unwrap(), Some(2));
    let sent = sink.sent().unwrap();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|n| n.handler == "device-groups" && n.command == "sync"));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let source = source(&["dg-1", "dg-2"]);
    let handler = Arc::new(FlakyHandler::flaky("dg-2", 3));
    let sink = Arc::new(RecordingSink::new());

    let report = consumer(&source, &handler, &sink)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(handler.handled(), vec!["dg-1", "dg-2"]);
}

#[tokio::test(start_paused = true)]
async fn skipped_failure_freezes_the_commit() {
    let source = source(&["dg-1", "dg-2", "dg-3"]);
    let handler = Arc::new(FlakyHandler::failing(&["dg-2"]));
    let sink = Arc::new(RecordingSink::new());

    let report = consumer(&source, &handler, &sink)
        .on_failure(|_, _| FailurePolicy::Skip)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped, 1);
    // dg-3 was handled, but the commit stays before dg-2 so it is redelivered
    assert_eq!(handler.handled(), vec!["dg-1", "dg-3"]);
    assert_eq!(source.committed().unwrap(), Some(0));
    assert_eq!(report.committed, Some(0));
}

#[tokio::test(start_paused = true)]
async fn fatal_failure_stops_the_consumer() {
    let source = source(&["dg-1", "dg-2", "dg-3"]);
    let handler = Arc::new(FlakyHandler::failing(&["dg-2"]));
    let sink = Arc::new(RecordingSink::new());

    let started = tokio::time::Instant::now();
    let err = consumer(&source, &handler, &sink)
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        EventError::RetryTimeout {
            offset, last_error, ..
        } => {
            assert_eq!(offset, 1);
            assert!(last_error.is_some_and(|e| e.is_transient()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(handler.handled(), vec!["dg-1"]);
    assert_eq!(source.committed().unwrap(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn failure_handler_sees_the_command() {
    let source = source(&["dg-1", "dg-2"]);
    let handler = Arc::new(FlakyHandler::failing(&["dg-1", "dg-2"]));
    let sink = Arc::new(RecordingSink::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);

    let report = consumer(&source, &handler, &sink)
        .on_failure(move |command, _| {
            recorder.lock().unwrap().push(command.id.clone());
            FailurePolicy::Skip
        })
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.skipped, 2);
    assert_eq!(report.committed, None);
    assert_eq!(*seen.lock().unwrap(), vec!["dg-1", "dg-2"]);
}

#[tokio::test(start_paused = true)]
async fn failing_sink_counts_as_a_failure() {
    let source = source(&["dg-1"]);
    let handler = Arc::new(FlakyHandler::default());
    let sink = Arc::new(RecordingSink::new());
    sink.set_failing(true);

    let report = consumer(&source, &handler, &sink)
        .on_failure(|_, _| FailurePolicy::Skip)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(source.committed().unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn malformed_records_are_dropped_and_committed() {
    let source = Arc::new(InMemoryEventSource::new());
    source.push(b"not json".to_vec()).unwrap();
    source.push(command("dg-1")).unwrap();
    let handler = Arc::new(FlakyHandler::default());
    let sink = Arc::new(RecordingSink::new());

    let report = consumer(&source, &handler, &sink)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.malformed, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(source.committed().unwrap(), Some(1));
}

#[tokio::test]
async fn cancelled_consumer_reads_nothing() {
    let source = source(&["dg-1"]);
    let handler = Arc::new(FlakyHandler::default());
    let sink = Arc::new(RecordingSink::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = consumer(&source, &handler, &sink).run(cancel).await.unwrap();
    assert_eq!(report.processed, 0);
    assert!(handler.handled().is_empty());
}
