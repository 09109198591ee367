//! Catalog-backed engine capabilities.
//!
//! [`CatalogWarden`] reads observed state from the mirrored catalog tables,
//! keeps intent in the `warden_info` and `deployment_warden_info` tables, and
//! acts through the agent command topics. An instance satisfies a
//! [`WardenInfo`] when it runs on the same network with the same business key
//! and its definition belongs to the intended deployment. A definition the
//! agent has not reported yet counts as a match, so an unsynced instance is
//! never duplicated.
//!
//! Only instances whose business key carries [`WARDEN_KEY_PREFIX`] are engine
//! owned; every other instance is legacy and never touched.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use ulid::Ulid;

use fleetsync_catalog::model::{
    Deployment, DeploymentCommand, DeploymentMetadata, DeploymentWardenInfo,
    HistoricProcessInstance, Incident, ProcessDefinition, ProcessInstance, WardenInfo, fields,
};
use fleetsync_catalog::{Database, Query, RecordState, stream_all};
use fleetsync_core::{Result, validate_network_id};
use fleetsync_sync::{CommandPublisher, DeleteOutcome, PlaceholderLifecycle, StartCommand, WardenDelegate};

use crate::engine::{Warden, WardenConfig};
use crate::traits::{DesiredStateStore, Intent, RuntimeStateProvider, WardenTypes};

/// Business key prefix of engine-started instances.
pub const WARDEN_KEY_PREFIX: &str = "warden:";

/// Entity family of the catalog backend.
#[derive(Debug, Clone, Copy)]
pub struct CatalogTypes;

impl WardenTypes for CatalogTypes {
    type Info = WardenInfo;
    type Deployment = DeploymentCommand;
    type Instance = ProcessInstance;
    type History = HistoricProcessInstance;
    type Incident = Incident;
}

impl Intent for WardenInfo {
    fn network_id(&self) -> &str {
        &self.network_id
    }

    fn deployment_id(&self) -> &str {
        &self.process_deployment_id
    }

    fn business_key(&self) -> &str {
        &self.business_key
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.creation_time
    }
}

/// The engine over the catalog backend.
pub type CatalogEngine<D> = Warden<CatalogTypes, CatalogWarden<D>, CatalogWarden<D>>;

/// Builds an engine whose provider and store are both `warden`.
#[must_use]
pub fn catalog_engine<D: Database + 'static>(
    warden: Arc<CatalogWarden<D>>,
    config: WardenConfig,
) -> CatalogEngine<D> {
    Warden::new(Arc::clone(&warden), warden, config)
}

/// Runtime provider and intent store over one catalog.
pub struct CatalogWarden<D> {
    db: Arc<D>,
    lifecycle: PlaceholderLifecycle<D>,
    commands: CommandPublisher,
    page_size: usize,
}

impl<D> std::fmt::Debug for CatalogWarden<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogWarden")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl<D: Database + 'static> CatalogWarden<D> {
    /// Creates a backend. Its own lifecycle never defers to an engine.
    #[must_use]
    pub fn new(db: Arc<D>, commands: CommandPublisher, page_size: usize) -> Self {
        Self {
            lifecycle: PlaceholderLifecycle::new(Arc::clone(&db), commands.clone()),
            db,
            commands,
            page_size: page_size.max(1),
        }
    }

    /// Returns the catalog.
    #[must_use]
    pub const fn db(&self) -> &Arc<D> {
        &self.db
    }

    /// Starts a new engine-owned instance of `deployment_id`.
    ///
    /// The intent is stored first, then the start command is sent at once;
    /// the engine takes over if the command is lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the network id is invalid or the intent cannot be
    /// stored. A failed send is logged and left to the engine.
    pub async fn start_with_warden(
        &self,
        network_id: &str,
        deployment_id: &str,
        start_parameters: BTreeMap<String, serde_json::Value>,
    ) -> Result<WardenInfo> {
        validate_network_id(network_id)?;
        let info = WardenInfo {
            network_id: network_id.to_string(),
            process_deployment_id: deployment_id.to_string(),
            business_key: format!("{WARDEN_KEY_PREFIX}{}", Ulid::new()),
            creation_time: Utc::now(),
            start_parameters,
        };
        self.db.save(&info).await?;
        if let Err(e) = self.send_start(&info).await {
            tracing::warn!(network_id, deployment_id, error = %e, "initial start failed, engine will retry");
        }
        Ok(info)
    }

    /// Deploys `command` and keeps it present on the network.
    ///
    /// # Errors
    ///
    /// Returns an error if the network id is invalid, a catalog write fails or
    /// the command cannot be sent.
    pub async fn add_deployment(
        &self,
        network_id: &str,
        command: DeploymentCommand,
    ) -> Result<Deployment> {
        validate_network_id(network_id)?;
        let intent = DeploymentWardenInfo {
            network_id: network_id.to_string(),
            deployment_id: command.id.clone(),
            deployment: command.clone(),
        };
        self.db.save(&intent).await?;
        self.lifecycle.deploy(network_id, command).await
    }

    async fn send_start(&self, info: &WardenInfo) -> Result<()> {
        let command = StartCommand {
            deployment_id: info.process_deployment_id.clone(),
            business_key: info.business_key.clone(),
            variables: info.start_parameters.clone(),
        };
        self.commands.start_instance(&info.network_id, &command).await
    }

    async fn runs_deployment(
        &self,
        network_id: &str,
        definition_id: &str,
        deployment_id: &str,
    ) -> Result<bool> {
        if definition_id.is_empty() {
            return Ok(true);
        }
        let definition = self
            .db
            .read::<ProcessDefinition>(network_id, definition_id)
            .await?;
        Ok(definition.is_none_or(|d| d.deployment_id == deployment_id))
    }
}

#[async_trait]
impl<D: Database + 'static> RuntimeStateProvider<CatalogTypes> for CatalogWarden<D> {
    fn all_instances(&self) -> BoxStream<'_, Result<ProcessInstance>> {
        stream_all::<D, ProcessInstance>(self.db.as_ref(), Query::all(), self.page_size)
            .try_filter(|instance| {
                futures::future::ready(instance.sync_info.state() == RecordState::Confirmed)
            })
            .boxed()
    }

    /// Placeholder rows count, so an instance created through the API is seen
    /// before its agent confirms it. Warden starts write no placeholder.
    async fn instances_for(&self, info: &WardenInfo) -> Result<Vec<ProcessInstance>> {
        let candidates: Vec<ProcessInstance> = self
            .db
            .list_all(&Query::network(&info.network_id).field(fields::BUSINESS_KEY, info.business_key.as_str()))
            .await?;
        let mut matching = Vec::with_capacity(candidates.len());
        for instance in candidates {
            if instance.sync_info.marked_for_delete || instance.ended {
                continue;
            }
            if self
                .runs_deployment(&info.network_id, &instance.definition_id, &info.process_deployment_id)
                .await?
            {
                matching.push(instance);
            }
        }
        Ok(matching)
    }

    async fn histories_for(&self, info: &WardenInfo) -> Result<Vec<HistoricProcessInstance>> {
        let candidates: Vec<HistoricProcessInstance> = self
            .db
            .list_all(&Query::network(&info.network_id).field(fields::BUSINESS_KEY, info.business_key.as_str()))
            .await?;
        let mut matching = Vec::with_capacity(candidates.len());
        for history in candidates {
            if self
                .runs_deployment(
                    &info.network_id,
                    &history.process_definition_id,
                    &info.process_deployment_id,
                )
                .await?
            {
                matching.push(history);
            }
        }
        Ok(matching)
    }

    async fn incidents_for(&self, history: &HistoricProcessInstance) -> Result<Vec<Incident>> {
        self.db
            .list_all(&Query::network(&history.network_id).field(fields::PROCESS_INSTANCE_ID, history.id.as_str()))
            .await
    }

    fn instance_id<'a>(&self, instance: &'a ProcessInstance) -> &'a str {
        &instance.id
    }

    fn instance_timestamp(&self, instance: &ProcessInstance) -> DateTime<Utc> {
        instance.sync_info.sync_date
    }

    fn history_timestamp(&self, history: &HistoricProcessInstance) -> DateTime<Utc> {
        history.changed_at()
    }

    fn incident_timestamp(&self, incident: &Incident) -> DateTime<Utc> {
        incident.occurred_at()
    }

    fn instance_is_created_with_warden_handling_intended(&self, instance: &ProcessInstance) -> bool {
        instance.business_key.starts_with(WARDEN_KEY_PREFIX)
    }

    async fn deployment_exists(&self, info: &WardenInfo) -> Result<bool> {
        let deployment = self
            .db
            .read::<Deployment>(&info.network_id, &info.process_deployment_id)
            .await?;
        Ok(deployment.is_some_and(|d| !d.sync_info.marked_for_delete))
    }

    async fn start(&self, info: &WardenInfo) -> Result<()> {
        self.send_start(info).await
    }

    async fn stop(&self, instance: &ProcessInstance) -> Result<()> {
        let outcome = self
            .lifecycle
            .stop_instance(&instance.network_id, &instance.id)
            .await?;
        if outcome == DeleteOutcome::Deferred {
            self.commands
                .stop_instance(&instance.network_id, &instance.id)
                .await?;
        }
        Ok(())
    }

    async fn deploy(&self, info: &WardenInfo, deployment: &DeploymentCommand) -> Result<()> {
        self.lifecycle
            .deploy(&info.network_id, deployment.clone())
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl<D: Database + 'static> DesiredStateStore<CatalogTypes> for CatalogWarden<D> {
    fn all_infos(&self) -> BoxStream<'_, Result<WardenInfo>> {
        stream_all(self.db.as_ref(), Query::all(), self.page_size)
    }

    async fn infos_for_instance(&self, instance: &ProcessInstance) -> Result<Vec<WardenInfo>> {
        let Some(info) = self
            .db
            .read::<WardenInfo>(&instance.network_id, &instance.business_key)
            .await?
        else {
            return Ok(Vec::new());
        };
        let runs = self
            .runs_deployment(&instance.network_id, &instance.definition_id, &info.process_deployment_id)
            .await?;
        Ok(if runs { vec![info] } else { Vec::new() })
    }

    async fn infos_for_deployment(
        &self,
        network_id: &str,
        deployment_id: &str,
    ) -> Result<Vec<WardenInfo>> {
        self.db
            .list_all(&Query::network(network_id).field(fields::PROCESS_DEPLOYMENT_ID, deployment_id))
            .await
    }

    async fn get(&self, network_id: &str, business_key: &str) -> Result<Option<WardenInfo>> {
        self.db.read(network_id, business_key).await
    }

    async fn set(&self, info: &WardenInfo) -> Result<()> {
        self.db.save(info).await
    }

    async fn remove(&self, info: &WardenInfo) -> Result<()> {
        self.db
            .remove::<WardenInfo>(&info.network_id, &info.business_key)
            .await
            .map(|_| ())
    }

    async fn deployment_payload(&self, info: &WardenInfo) -> Result<Option<DeploymentCommand>> {
        if let Some(intent) = self
            .db
            .read::<DeploymentWardenInfo>(&info.network_id, &info.process_deployment_id)
            .await?
        {
            return Ok(Some(intent.deployment));
        }
        Ok(self
            .db
            .read::<DeploymentMetadata>(&info.network_id, &info.process_deployment_id)
            .await?
            .map(|metadata| metadata.command))
    }
}

#[async_trait]
impl<D: Database + 'static> WardenDelegate for CatalogEngine<D> {
    async fn owns_deployment(&self, network_id: &str, deployment_id: &str) -> Result<bool> {
        let intent = self
            .provider()
            .db()
            .read::<DeploymentWardenInfo>(network_id, deployment_id)
            .await?;
        if intent.is_some() {
            return Ok(true);
        }
        Ok(!self
            .store()
            .infos_for_deployment(network_id, deployment_id)
            .await?
            .is_empty())
    }

    async fn owns_instance(&self, network_id: &str, instance_id: &str) -> Result<bool> {
        let instance = self
            .provider()
            .db()
            .read::<ProcessInstance>(network_id, instance_id)
            .await?;
        match instance {
            Some(instance) => Ok(!self.store().infos_for_instance(&instance).await?.is_empty()),
            None => Ok(false),
        }
    }

    async fn remove_deployment(&self, network_id: &str, deployment_id: &str) -> Result<()> {
        let warden = self.provider();
        Warden::remove_deployment(self, network_id, deployment_id).await?;
        warden
            .db
            .remove::<DeploymentWardenInfo>(network_id, deployment_id)
            .await?;
        let outcome = warden
            .lifecycle
            .delete_deployment(network_id, deployment_id)
            .await?;
        if outcome == DeleteOutcome::Deferred {
            warden
                .commands
                .delete_deployment(network_id, deployment_id)
                .await?;
        }
        Ok(())
    }

    async fn remove_instance(&self, network_id: &str, instance_id: &str) -> Result<()> {
        let warden = self.provider();
        if let Some(instance) = warden
            .db
            .read::<ProcessInstance>(network_id, instance_id)
            .await?
        {
            self.remove_by_instance(&instance).await?;
        }
        let outcome = warden.lifecycle.stop_instance(network_id, instance_id).await?;
        if outcome == DeleteOutcome::Deferred {
            warden.commands.stop_instance(network_id, instance_id).await?;
        }
        Ok(())
    }
}
