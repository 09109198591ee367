//! The reconciliation engine.
//!
//! Every tick the engine audits the catalog in two sequential loops:
//!
//! - **`loop_db`**: every intent record must be backed by exactly one running
//!   instance. Missing instances are started (redeploying first if the
//!   deployment is gone), duplicates are stopped down to one survivor.
//! - **`loop_processes`**: every engine-started instance must still be backed
//!   by an intent record. Orphans are stopped.
//!
//! Nothing is touched until the drift has persisted for the age gate. Item
//! failures are logged and counted; the next tick retries them.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use fleetsync_core::metrics::{record_warden_action, record_warden_error, time_warden_tick};
use fleetsync_core::observability::warden_span;
use fleetsync_core::ticker::spawn_periodic;
use fleetsync_core::{Error, Result};

use crate::age::{is_mature, youngest};
use crate::error::RedeployError;
use crate::traits::{DesiredStateStore, Intent, RuntimeStateProvider, WardenTypes};

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardenConfig {
    /// Tick period.
    pub interval: Duration,
    /// How long drift must persist before the engine acts.
    pub age_gate: TimeDelta,
    /// Run `loop_db` on every tick.
    pub run_db_loop: bool,
    /// Run `loop_processes` on every tick.
    pub run_process_loop: bool,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            age_gate: TimeDelta::minutes(5),
            run_db_loop: true,
            run_process_loop: true,
        }
    }
}

/// The decision taken for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WardenOutcome {
    /// Drift is younger than the age gate.
    Immature,
    /// Desired and observed state agree.
    Healthy,
    /// Instance predates engine ownership and is never touched.
    Legacy,
    /// A start command was sent.
    Started,
    /// Duplicates were stopped.
    Stopped {
        /// Number of stop commands sent.
        count: usize,
    },
    /// The intent record was dropped.
    Removed,
    /// A redeploy is needed but failed; retried next tick.
    RetryLater,
    /// An instance without intent was stopped.
    OrphanStopped,
}

impl WardenOutcome {
    /// Metric label of the corrective action, `None` for no-ops.
    #[must_use]
    pub const fn action(self) -> Option<&'static str> {
        match self {
            Self::Started => Some("start"),
            Self::Stopped { .. } => Some("stop"),
            Self::Removed => Some("remove"),
            Self::OrphanStopped => Some("orphan_stop"),
            Self::Immature | Self::Healthy | Self::Legacy | Self::RetryLater => None,
        }
    }
}

/// Counts of one loop run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    /// Records examined.
    pub checked: usize,
    /// Corrective actions taken.
    pub actions: usize,
    /// Records whose check failed.
    pub errors: usize,
}

impl LoopReport {
    fn record(&mut self, loop_name: &'static str, outcome: Result<WardenOutcome>) {
        self.checked += 1;
        match outcome {
            Ok(outcome) => {
                if let Some(action) = outcome.action() {
                    self.actions += 1;
                    record_warden_action(action);
                }
            }
            Err(e) => {
                self.errors += 1;
                record_warden_error(loop_name);
                tracing::warn!(loop_name, error = %e, "warden check failed");
            }
        }
    }
}

/// Periodic reconciliation of desired against observed state.
pub struct Warden<T, P, S> {
    provider: Arc<P>,
    store: Arc<S>,
    config: WardenConfig,
    _types: PhantomData<fn() -> T>,
}

impl<T, P, S> std::fmt::Debug for Warden<T, P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Warden")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T, P, S> Warden<T, P, S>
where
    T: WardenTypes,
    P: RuntimeStateProvider<T> + 'static,
    S: DesiredStateStore<T> + 'static,
{
    /// Creates an engine.
    #[must_use]
    pub fn new(provider: Arc<P>, store: Arc<S>, config: WardenConfig) -> Self {
        Self {
            provider,
            store,
            config,
            _types: PhantomData,
        }
    }

    /// Returns the runtime provider.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns the intent store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the settings.
    #[must_use]
    pub const fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Stores an intent record.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn add(&self, info: &T::Info) -> Result<()> {
        self.store.set(info).await
    }

    /// Drops an intent record.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn remove(&self, info: &T::Info) -> Result<()> {
        self.store.remove(info).await
    }

    /// Drops every intent record `instance` satisfies. Returns how many.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn remove_by_instance(&self, instance: &T::Instance) -> Result<usize> {
        let infos = self.store.infos_for_instance(instance).await?;
        for info in &infos {
            self.store.remove(info).await?;
        }
        Ok(infos.len())
    }

    /// Drops every intent record that runs `deployment_id`. Returns how many.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn remove_deployment(&self, network_id: &str, deployment_id: &str) -> Result<usize> {
        let infos = self
            .store
            .infos_for_deployment(network_id, deployment_id)
            .await?;
        for info in &infos {
            self.store.remove(info).await?;
        }
        if !infos.is_empty() {
            tracing::info!(network_id, deployment_id, removed = infos.len(), "deployment intents removed");
        }
        Ok(infos.len())
    }

    /// Spawns the ticking task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if neither loop is enabled or the
    /// interval is zero.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        if !self.config.run_db_loop && !self.config.run_process_loop {
            return Err(Error::Configuration(
                "warden needs at least one of the db and process loops".into(),
            ));
        }
        if self.config.interval.is_zero() {
            return Err(Error::Configuration("warden interval must be positive".into()));
        }

        let interval = self.config.interval;
        Ok(spawn_periodic("warden", interval, cancel, move || {
            let warden = Arc::clone(&self);
            async move {
                warden.tick(Utc::now()).await;
            }
        }))
    }

    /// Runs the enabled loops once, sequentially.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let _timer = time_warden_tick();
        if self.config.run_db_loop {
            let report = self.loop_db(now).instrument(warden_span("loop_db")).await;
            log_report("loop_db", report);
        }
        if self.config.run_process_loop {
            let report = self
                .loop_processes(now)
                .instrument(warden_span("loop_processes"))
                .await;
            log_report("loop_processes", report);
        }
    }

    /// Checks every intent record.
    pub async fn loop_db(&self, now: DateTime<Utc>) -> LoopReport {
        let mut report = LoopReport::default();
        let mut infos = self.store.all_infos();
        while let Some(info) = infos.next().await {
            let outcome = match info {
                Ok(info) => self.check_warden_info(&info, now).await,
                Err(e) => Err(e),
            };
            report.record("loop_db", outcome);
        }
        report
    }

    /// Checks every observed instance.
    pub async fn loop_processes(&self, now: DateTime<Utc>) -> LoopReport {
        let mut report = LoopReport::default();
        let mut instances = self.provider.all_instances();
        while let Some(instance) = instances.next().await {
            let outcome = match instance {
                Ok(instance) => self.check_process_instance(&instance, now).await,
                Err(e) => Err(e),
            };
            report.record("loop_processes", outcome);
        }
        report
    }

    /// Audits one intent record.
    ///
    /// # Errors
    ///
    /// Returns provider or store failures; the record is left as it was.
    pub async fn check_warden_info(&self, info: &T::Info, now: DateTime<Utc>) -> Result<WardenOutcome> {
        if !is_mature(info.created_at(), now, self.config.age_gate) {
            return Ok(WardenOutcome::Immature);
        }
        let instances = self.provider.instances_for(info).await?;
        match instances.len() {
            0 => self.missing_instance(info, now).await,
            1 => Ok(WardenOutcome::Healthy),
            _ => self.duplicate_instances(info, &instances, now).await,
        }
    }

    /// Handles an intent record with no running instance.
    ///
    /// Without history the instance never ran: it is started, redeploying
    /// first if the deployment is gone. With history it ran and ended: a clean
    /// end retires the intent, an end with incidents restarts it.
    ///
    /// # Errors
    ///
    /// Returns provider or store failures.
    pub async fn missing_instance(&self, info: &T::Info, now: DateTime<Utc>) -> Result<WardenOutcome> {
        let histories = self.provider.histories_for(info).await?;

        let Some(history) = youngest(&histories, |h| self.provider.history_timestamp(h)) else {
            if !self.provider.deployment_exists(info).await? {
                match self.try_redeploy_process(info).await {
                    Ok(()) => {}
                    Err(RedeployError::Retryable(e)) => {
                        tracing::warn!(
                            network_id = info.network_id(),
                            deployment_id = info.deployment_id(),
                            error = %e,
                            "redeploy failed, retrying next tick"
                        );
                        return Ok(WardenOutcome::RetryLater);
                    }
                    Err(RedeployError::Terminal { reason }) => {
                        tracing::warn!(
                            network_id = info.network_id(),
                            business_key = info.business_key(),
                            %reason,
                            "deployment cannot be restored, dropping intent"
                        );
                        self.store.remove(info).await?;
                        return Ok(WardenOutcome::Removed);
                    }
                }
            }
            self.provider.start(info).await?;
            tracing::info!(
                network_id = info.network_id(),
                business_key = info.business_key(),
                "started missing instance"
            );
            return Ok(WardenOutcome::Started);
        };

        if !is_mature(self.provider.history_timestamp(history), now, self.config.age_gate) {
            return Ok(WardenOutcome::Immature);
        }

        let incidents = self.provider.incidents_for(history).await?;
        let Some(incident) = youngest(&incidents, |i| self.provider.incident_timestamp(i)) else {
            self.store.remove(info).await?;
            tracing::info!(
                network_id = info.network_id(),
                business_key = info.business_key(),
                "instance finished cleanly, intent retired"
            );
            return Ok(WardenOutcome::Removed);
        };

        if !is_mature(self.provider.incident_timestamp(incident), now, self.config.age_gate) {
            return Ok(WardenOutcome::Immature);
        }
        self.provider.start(info).await?;
        tracing::info!(
            network_id = info.network_id(),
            business_key = info.business_key(),
            incidents = incidents.len(),
            "restarted failed instance"
        );
        Ok(WardenOutcome::Started)
    }

    /// Stops every duplicate except the survivor: the oldest instance, ties
    /// broken by the smallest id.
    ///
    /// # Errors
    ///
    /// Returns the first stop failure.
    pub async fn duplicate_instances(
        &self,
        info: &T::Info,
        instances: &[T::Instance],
        now: DateTime<Utc>,
    ) -> Result<WardenOutcome> {
        let Some(young) = youngest(instances, |i| self.provider.instance_timestamp(i)) else {
            return Ok(WardenOutcome::Healthy);
        };
        if !is_mature(self.provider.instance_timestamp(young), now, self.config.age_gate) {
            return Ok(WardenOutcome::Immature);
        }

        let mut ordered: Vec<&T::Instance> = instances.iter().collect();
        ordered.sort_by(|a, b| {
            self.provider
                .instance_timestamp(a)
                .cmp(&self.provider.instance_timestamp(b))
                .then_with(|| self.provider.instance_id(a).cmp(self.provider.instance_id(b)))
        });

        let mut count = 0;
        for duplicate in ordered.iter().skip(1) {
            self.provider.stop(duplicate).await?;
            count += 1;
        }
        tracing::info!(
            network_id = info.network_id(),
            business_key = info.business_key(),
            survivor = self.provider.instance_id(ordered[0]),
            stopped = count,
            "stopped duplicate instances"
        );
        Ok(WardenOutcome::Stopped { count })
    }

    /// Audits one observed instance.
    ///
    /// An orphan loses any leftover intent and is also sent a stop.
    ///
    /// # Errors
    ///
    /// Returns provider or store failures.
    pub async fn check_process_instance(
        &self,
        instance: &T::Instance,
        now: DateTime<Utc>,
    ) -> Result<WardenOutcome> {
        if !self
            .provider
            .instance_is_created_with_warden_handling_intended(instance)
        {
            return Ok(WardenOutcome::Legacy);
        }
        if !self.store.infos_for_instance(instance).await?.is_empty() {
            return Ok(WardenOutcome::Healthy);
        }
        if !is_mature(self.provider.instance_timestamp(instance), now, self.config.age_gate) {
            return Ok(WardenOutcome::Immature);
        }

        self.remove_by_instance(instance).await?;
        self.provider.stop(instance).await?;
        tracing::info!(instance_id = self.provider.instance_id(instance), "stopped orphaned instance");
        Ok(WardenOutcome::OrphanStopped)
    }

    /// Restores the deployment `info` needs.
    ///
    /// # Errors
    ///
    /// [`RedeployError::Terminal`] if no payload is stored,
    /// [`RedeployError::Retryable`] if the lookup or the deploy fails.
    pub async fn try_redeploy_process(&self, info: &T::Info) -> std::result::Result<(), RedeployError> {
        let payload = self
            .store
            .deployment_payload(info)
            .await
            .map_err(RedeployError::Retryable)?;
        let Some(payload) = payload else {
            return Err(RedeployError::Terminal {
                reason: format!("no payload stored for deployment {}", info.deployment_id()),
            });
        };
        self.provider
            .deploy(info, &payload)
            .await
            .map_err(RedeployError::Retryable)?;
        record_warden_action("redeploy");
        tracing::info!(
            network_id = info.network_id(),
            deployment_id = info.deployment_id(),
            "redeployed missing deployment"
        );
        Ok(())
    }
}

fn log_report(loop_name: &'static str, report: LoopReport) {
    if report.actions > 0 || report.errors > 0 {
        tracing::info!(loop_name, checked = report.checked, actions = report.actions, errors = report.errors, "warden loop finished");
    } else {
        tracing::debug!(loop_name, checked = report.checked, "warden loop finished");
    }
}
