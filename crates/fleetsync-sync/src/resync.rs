//! Periodic re-sync pass.
//!
//! Commands sent to a disconnected agent are lost. The pass resends them:
//! a delete for every `MarkedForDelete` deployment and instance, and the
//! original deploy command for every deployment flagged missing that the
//! reconciliation engine does not own.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use fleetsync_catalog::model::{Deployment, DeploymentMetadata, ProcessInstance};
use fleetsync_catalog::{CatalogEntity, Database, Query, stream_all};
use fleetsync_core::Result;
use fleetsync_core::metrics::record_resync_command;
use fleetsync_core::ticker::spawn_periodic;

use crate::lifecycle::PlaceholderLifecycle;
use crate::topics::CommandKind;

/// Counts of one re-sync pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResyncReport {
    /// Deployment deletes resent.
    pub deletes_sent: usize,
    /// Instance stops resent.
    pub stops_sent: usize,
    /// Missing deployments redeployed.
    pub redeploys_sent: usize,
    /// Missing deployments left to the reconciliation engine.
    pub skipped_owned: usize,
    /// Records whose command could not be sent.
    pub failures: usize,
}

/// Periodic re-sync of pending deletes and missing deployments.
#[derive(Debug)]
pub struct Resync<D> {
    lifecycle: Arc<PlaceholderLifecycle<D>>,
    page_size: usize,
}

impl<D: Database + 'static> Resync<D> {
    /// Creates a pass reading `page_size` records per catalog fetch.
    #[must_use]
    pub fn new(lifecycle: Arc<PlaceholderLifecycle<D>>, page_size: usize) -> Self {
        Self {
            lifecycle,
            page_size,
        }
    }

    /// Runs one pass.
    ///
    /// A failed command is counted and the pass moves on.
    ///
    /// # Errors
    ///
    /// Returns an error if a catalog page cannot be read.
    pub async fn run_once(&self) -> Result<ResyncReport> {
        let mut report = ResyncReport::default();
        let db = self.lifecycle.db().as_ref();
        let commands = self.lifecycle.commands();

        let mut deleted = stream_all::<D, Deployment>(db, Query::all().marked_for_delete(), self.page_size);
        while let Some(deployment) = deleted.next().await {
            let deployment = deployment?;
            let sent = commands
                .delete_deployment(&deployment.network_id, &deployment.id)
                .await;
            if tally(&mut report, sent, &deployment, CommandKind::DeleteDeployment) {
                report.deletes_sent += 1;
            }
        }

        let mut stopped = stream_all::<D, ProcessInstance>(db, Query::all().marked_for_delete(), self.page_size);
        while let Some(instance) = stopped.next().await {
            let instance = instance?;
            let sent = commands
                .stop_instance(&instance.network_id, &instance.id)
                .await;
            if tally(&mut report, sent, &instance, CommandKind::StopInstance) {
                report.stops_sent += 1;
            }
        }

        let mut missing = stream_all::<D, DeploymentMetadata>(db, Query::all().marked_as_missing(), self.page_size);
        while let Some(metadata) = missing.next().await {
            let metadata = metadata?;
            match self
                .lifecycle
                .delegate()
                .owns_deployment(&metadata.network_id, &metadata.id)
                .await
            {
                Ok(true) => {
                    report.skipped_owned += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(network_id = %metadata.network_id, deployment_id = %metadata.id, error = %e, "ownership lookup failed");
                    report.failures += 1;
                    continue;
                }
            }
            let sent = self
                .lifecycle
                .deploy(&metadata.network_id, metadata.command.clone())
                .await
                .map(|_| ());
            if tally(&mut report, sent, &metadata, CommandKind::Deploy) {
                report.redeploys_sent += 1;
            }
        }

        Ok(report)
    }

    /// Runs the pass every `period` until `cancel` fires.
    pub fn start(self: Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        spawn_periodic("resync", period, cancel, move || {
            let resync = Arc::clone(&self);
            async move {
                match resync.run_once().instrument(tracing::info_span!("resync")).await {
                    Ok(report) if report == ResyncReport::default() => {}
                    Ok(report) => tracing::info!(?report, "re-sync pass finished"),
                    Err(e) => tracing::warn!(error = %e, "re-sync pass aborted"),
                }
            }
        })
    }
}

fn tally<E: CatalogEntity>(
    report: &mut ResyncReport,
    sent: Result<()>,
    record: &E,
    command: CommandKind,
) -> bool {
    match sent {
        Ok(()) => {
            record_resync_command(command.as_str());
            true
        }
        Err(e) => {
            tracing::warn!(
                network_id = record.network_id(),
                id = record.id(),
                command = command.as_str(),
                error = %e,
                "re-sync command failed"
            );
            report.failures += 1;
            false
        }
    }
}
