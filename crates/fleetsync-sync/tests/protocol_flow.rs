//! End-to-end protocol tests over the in-memory broker.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleetsync_catalog::model::{
    Deployment, DeploymentMetadata, LastNetworkContact, ProcessInstance,
};
use fleetsync_catalog::{Database, InMemoryDatabase, RecordState, Table};
use fleetsync_sync::prelude::*;
use fleetsync_sync::{DeleteOutcome, NewDeployment, Resync, ResyncReport};
use fleetsync_test_utils::fixtures::{self, agent_payload, known_payload};
use fleetsync_test_utils::{TestContext, assert_absent, assert_record_state, init_test_logging};

struct Harness {
    ctx: TestContext,
    broker: Arc<InMemoryBroker>,
    lifecycle: Arc<PlaceholderLifecycle<InMemoryDatabase>>,
}

impl Harness {
    async fn new() -> Self {
        init_test_logging();
        let ctx = TestContext::with_network("n1");
        let broker = Arc::new(InMemoryBroker::new("memory"));
        let lifecycle = Arc::new(PlaceholderLifecycle::new(
            Arc::clone(&ctx.db),
            CommandPublisher::new(broker.clone()),
        ));
        let sync = Arc::new(StateSync::new(Arc::clone(&lifecycle)));
        StateSync::subscribe_all(sync, broker.as_ref(), None)
            .await
            .unwrap();
        Self {
            ctx,
            broker,
            lifecycle,
        }
    }

    async fn agent_sends(&self, suffix: &str, payload: impl Into<Vec<u8>>) {
        let topic = format!("processes/{}/state/{suffix}", self.ctx.network_id);
        let delivered = self.broker.deliver(&topic, payload.into()).await.unwrap();
        assert_eq!(delivered, 1, "no subscriber for {topic}");
    }

    fn db(&self) -> &InMemoryDatabase {
        &self.ctx.db
    }
}

fn request(name: &str) -> NewDeployment {
    NewDeployment {
        name: name.into(),
        xml: "<definitions/>".into(),
        svg: None,
        source: "api".into(),
    }
}

#[tokio::test]
async fn upsert_then_read_returns_the_record() {
    let h = Harness::new().await;
    let reported = fixtures::instance("n1", "i1", "def-1", "bk1", fixtures::minutes_ago(3));

    h.agent_sends("process-instance", agent_payload(&reported)).await;

    let mut stored: ProcessInstance =
        assert_record_state(h.db(), "n1", "i1", RecordState::Confirmed).await;
    assert_eq!(stored.network_id, "n1");
    stored.sync_info = reported.sync_info.clone();
    assert_eq!(stored, reported);

    h.agent_sends("process-instance/delete", "i1").await;
    assert_absent::<ProcessInstance>(h.db(), "n1", "i1").await;
}

#[tokio::test]
async fn known_ids_prune_only_unknown_records() {
    let h = Harness::new().await;
    for id in ["a", "b", "c"] {
        let record = fixtures::instance("n1", id, "def-1", id, fixtures::minutes_ago(1));
        h.agent_sends("process-instance", agent_payload(&record)).await;
    }
    h.db()
        .save(&fixtures::instance("n2", "a", "def-1", "a", fixtures::minutes_ago(1)))
        .await
        .unwrap();
    let before = h.db().raw(Table::Instances, "n1", "b").unwrap();

    h.agent_sends("process-instance/known", known_payload(&["b", "zz"]))
        .await;

    assert_absent::<ProcessInstance>(h.db(), "n1", "a").await;
    assert_absent::<ProcessInstance>(h.db(), "n1", "c").await;
    assert_eq!(h.db().raw(Table::Instances, "n1", "b").unwrap(), before);
    assert!(h.db().raw(Table::Instances, "n2", "a").unwrap().is_some());
}

#[tokio::test]
async fn malformed_messages_are_dropped_but_contact_is_recorded() {
    let h = Harness::new().await;

    h.agent_sends("process-instance", b"{not json".to_vec()).await;
    h.agent_sends("process-instance", br#"{"id":""}"#.to_vec()).await;
    h.agent_sends("process-instance/known", br#"{"ids":[]}"#.to_vec())
        .await;
    // no subscription covers unknown entities
    let dropped = h
        .broker
        .deliver("processes/n1/state/widget", b"{}".to_vec())
        .await
        .unwrap();
    assert_eq!(dropped, 0);

    assert_eq!(h.db().row_count(Table::Instances).unwrap(), 0);
    let contact: Option<LastNetworkContact> = h.db().read("n1", "n1").await.unwrap();
    assert!(contact.is_some());
}

#[tokio::test]
async fn placeholder_lifecycle_end_to_end() {
    let h = Harness::new().await;

    let placeholder = h
        .lifecycle
        .create_deployment("n1", request("pump"))
        .await
        .unwrap();
    assert_record_state::<Deployment>(h.db(), "n1", &placeholder.id, RecordState::Placeholder)
        .await;

    let mut reported = fixtures::deployment("n1", &placeholder.id);
    reported.name = "pump".into();
    h.agent_sends("deployment", agent_payload(&reported)).await;
    assert_record_state::<Deployment>(h.db(), "n1", &placeholder.id, RecordState::Confirmed).await;

    let outcome = h
        .lifecycle
        .delete_deployment("n1", &placeholder.id)
        .await
        .unwrap();
    assert_eq!(outcome, DeleteOutcome::MarkedForDelete);
    assert_record_state::<Deployment>(
        h.db(),
        "n1",
        &placeholder.id,
        RecordState::MarkedForDelete,
    )
    .await;

    h.agent_sends("deployment/known", known_payload(&[])).await;
    assert_absent::<Deployment>(h.db(), "n1", &placeholder.id).await;
    let metadata: Option<DeploymentMetadata> = h.db().read("n1", &placeholder.id).await.unwrap();
    assert!(metadata.is_none());
}

#[tokio::test]
async fn agent_delete_keeps_deployment_metadata_in_step() {
    let h = Harness::new().await;
    let mut ids = Vec::new();
    for name in ["retired", "lost"] {
        let placeholder = h
            .lifecycle
            .create_deployment("n1", request(name))
            .await
            .unwrap();
        h.agent_sends(
            "deployment",
            agent_payload(&fixtures::deployment("n1", &placeholder.id)),
        )
        .await;
        ids.push(placeholder.id);
    }
    let (retired, lost) = (&ids[0], &ids[1]);

    h.lifecycle.delete_deployment("n1", retired).await.unwrap();
    h.agent_sends("deployment/delete", retired.as_bytes().to_vec()).await;
    h.agent_sends("deployment/delete", lost.as_bytes().to_vec()).await;

    assert_absent::<Deployment>(h.db(), "n1", retired).await;
    assert_absent::<Deployment>(h.db(), "n1", lost).await;
    let metadata: Option<DeploymentMetadata> = h.db().read("n1", retired).await.unwrap();
    assert!(metadata.is_none());
    let metadata: DeploymentMetadata = h.db().read("n1", lost).await.unwrap().unwrap();
    assert!(metadata.sync_info.marked_as_missing);
}

#[tokio::test]
async fn confirmation_clears_stale_placeholders_of_the_same_type_only() {
    let h = Harness::new().await;
    let stale_deployment = h
        .lifecycle
        .create_deployment("n1", request("a"))
        .await
        .unwrap();
    let stale_instance = h
        .lifecycle
        .start_instance("n1", "d1", Some("bk1".into()), BTreeMap::new())
        .await
        .unwrap();

    let reported = fixtures::instance("n1", "engine-id", "def-1", "bk1", fixtures::minutes_ago(0));
    h.agent_sends("process-instance", agent_payload(&reported)).await;

    assert_absent::<ProcessInstance>(h.db(), "n1", &stale_instance.id).await;
    assert_record_state::<Deployment>(
        h.db(),
        "n1",
        &stale_deployment.id,
        RecordState::Placeholder,
    )
    .await;
}

#[tokio::test]
async fn resync_resends_only_pending_work() {
    let h = Harness::new().await;

    // confirmed and untouched: nothing to resend
    h.agent_sends("deployment", agent_payload(&fixtures::deployment("n1", "steady")))
        .await;

    // deleted through the API, agent offline
    h.agent_sends("deployment", agent_payload(&fixtures::deployment("n1", "doomed")))
        .await;
    h.lifecycle.delete_deployment("n1", "doomed").await.unwrap();

    // deployed through the API, then lost by the agent
    let lost = h
        .lifecycle
        .create_deployment("n1", request("lost"))
        .await
        .unwrap();
    h.agent_sends("deployment", agent_payload(&fixtures::deployment("n1", &lost.id)))
        .await;
    h.agent_sends("deployment/known", known_payload(&["steady", "doomed"]))
        .await;
    let metadata: DeploymentMetadata = h.db().read("n1", &lost.id).await.unwrap().unwrap();
    assert!(metadata.sync_info.marked_as_missing);

    h.broker.clear_published().unwrap();
    let resync = Resync::new(Arc::clone(&h.lifecycle), 2);
    let report = resync.run_once().await.unwrap();
    assert_eq!(
        report,
        ResyncReport {
            deletes_sent: 1,
            redeploys_sent: 1,
            ..ResyncReport::default()
        }
    );

    let deletes = h
        .broker
        .published_to("processes/n1/cmd/deployment/delete")
        .unwrap();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].payload_text(), "\"doomed\"");
    assert_eq!(
        h.broker
            .published_to("processes/n1/cmd/deployment")
            .unwrap()
            .len(),
        1
    );
    assert_record_state::<Deployment>(h.db(), "n1", &lost.id, RecordState::Placeholder).await;
}

#[tokio::test]
async fn resync_counts_failed_sends() {
    let h = Harness::new().await;
    let reported = fixtures::instance("n1", "i1", "def-1", "bk1", fixtures::minutes_ago(1));
    h.agent_sends("process-instance", agent_payload(&reported)).await;
    h.lifecycle.stop_instance("n1", "i1").await.unwrap();

    h.broker.set_failing(true);
    let report = Resync::new(Arc::clone(&h.lifecycle), 10)
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.failures, 1);
    assert_eq!(report.stops_sent, 0);

    h.broker.set_failing(false);
    let report = Resync::new(Arc::clone(&h.lifecycle), 10)
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.stops_sent, 1);
}
