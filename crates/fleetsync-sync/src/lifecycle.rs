//! Placeholder and tombstone bookkeeping.
//!
//! Records created through the API are stored as placeholders until the agent
//! reports them; records deleted through the API stay as `MarkedForDelete`
//! tombstones until the agent's known-ids no longer list them. Records owned by
//! the reconciliation engine are never deleted here; those deletes go to the
//! [`WardenDelegate`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ulid::Ulid;

use fleetsync_catalog::model::{
    Deployment, DeploymentCommand, DeploymentMetadata, ProcessInstance, SyncInfo, Synced,
};
use fleetsync_catalog::{Database, Query};
use fleetsync_core::{Result, validate_network_id};

use crate::commands::{CommandPublisher, StartCommand};

/// Receives deletes of records the reconciliation engine owns.
#[async_trait]
pub trait WardenDelegate: Send + Sync {
    /// Returns true if the engine keeps `deployment_id` present on the network.
    async fn owns_deployment(&self, network_id: &str, deployment_id: &str) -> Result<bool>;

    /// Returns true if the engine keeps `instance_id` running on the network.
    async fn owns_instance(&self, network_id: &str, instance_id: &str) -> Result<bool>;

    /// Drops the engine's intent for a deployment and deletes it.
    async fn remove_deployment(&self, network_id: &str, deployment_id: &str) -> Result<()>;

    /// Drops the engine's intent for an instance and stops it.
    async fn remove_instance(&self, network_id: &str, instance_id: &str) -> Result<()>;
}

/// Delegate used when no reconciliation engine is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWarden;

#[async_trait]
impl WardenDelegate for NoWarden {
    async fn owns_deployment(&self, _network_id: &str, _deployment_id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn owns_instance(&self, _network_id: &str, _instance_id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn remove_deployment(&self, _network_id: &str, _deployment_id: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_instance(&self, _network_id: &str, _instance_id: &str) -> Result<()> {
        Ok(())
    }
}

/// A deployment requested through the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeployment {
    /// Human readable name.
    pub name: String,
    /// BPMN XML.
    pub xml: String,
    /// Rendered diagram.
    pub svg: Option<String>,
    /// Source tag.
    pub source: String,
}

/// What an API delete did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The record is missing or engine-owned; the engine handled it.
    Deferred,
    /// An unconfirmed placeholder was dropped and the delete sent anyway.
    PlaceholderRemoved,
    /// The record now waits for the agent to confirm the delete.
    MarkedForDelete,
}

/// Placeholder lifecycle over a catalog and a command publisher.
pub struct PlaceholderLifecycle<D> {
    db: Arc<D>,
    commands: CommandPublisher,
    delegate: Arc<dyn WardenDelegate>,
}

impl<D> std::fmt::Debug for PlaceholderLifecycle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaceholderLifecycle")
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

impl<D: Database> PlaceholderLifecycle<D> {
    /// Creates a lifecycle without a reconciliation engine.
    #[must_use]
    pub fn new(db: Arc<D>, commands: CommandPublisher) -> Self {
        Self {
            db,
            commands,
            delegate: Arc::new(NoWarden),
        }
    }

    /// Routes deletes of engine-owned records to `delegate`.
    #[must_use]
    pub fn with_delegate(mut self, delegate: Arc<dyn WardenDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    /// Returns the catalog.
    #[must_use]
    pub const fn db(&self) -> &Arc<D> {
        &self.db
    }

    /// Returns the command publisher.
    #[must_use]
    pub const fn commands(&self) -> &CommandPublisher {
        &self.commands
    }

    /// Returns the engine delegate.
    #[must_use]
    pub fn delegate(&self) -> &dyn WardenDelegate {
        self.delegate.as_ref()
    }

    /// Creates a deployment with a fresh id and sends it to the agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the network id is invalid, the catalog write fails
    /// or the command cannot be sent.
    pub async fn create_deployment(
        &self,
        network_id: &str,
        request: NewDeployment,
    ) -> Result<Deployment> {
        validate_network_id(network_id)?;
        let command = DeploymentCommand {
            id: Ulid::new().to_string(),
            name: request.name,
            xml: request.xml,
            svg: request.svg,
            source: request.source,
        };
        self.deploy(network_id, command).await
    }

    /// Sends `command` and records a placeholder plus its metadata.
    ///
    /// An already confirmed deployment with the same id is left in place; only
    /// the command is resent.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog write fails or the command cannot be
    /// sent.
    pub async fn deploy(&self, network_id: &str, command: DeploymentCommand) -> Result<Deployment> {
        let now = Utc::now();
        let deployment = match self.db.read::<Deployment>(network_id, &command.id).await? {
            Some(existing) if !existing.sync_info.is_placeholder => existing,
            _ => {
                let placeholder = Deployment {
                    id: command.id.clone(),
                    name: command.name.clone(),
                    source: command.source.clone(),
                    deployment_time: None,
                    tenant_id: None,
                    network_id: network_id.to_string(),
                    sync_info: SyncInfo::placeholder(now),
                };
                self.db.save(&placeholder).await?;
                placeholder
            }
        };

        let metadata = match self
            .db
            .read::<DeploymentMetadata>(network_id, &command.id)
            .await?
        {
            Some(mut existing) => {
                existing.command = command.clone();
                existing
            }
            None => DeploymentMetadata {
                id: command.id.clone(),
                command: command.clone(),
                network_id: network_id.to_string(),
                sync_info: SyncInfo::confirmed(now),
            },
        };
        self.db.save(&metadata).await?;

        self.commands.deploy(network_id, &command).await?;
        tracing::info!(network_id, deployment_id = %command.id, "deployment sent");
        Ok(deployment)
    }

    /// Starts a new instance of `deployment_id` and records a placeholder.
    ///
    /// Without a business key the instance id is used as one.
    ///
    /// # Errors
    ///
    /// Returns an error if the network id is invalid, the catalog write fails
    /// or the command cannot be sent.
    pub async fn start_instance(
        &self,
        network_id: &str,
        deployment_id: &str,
        business_key: Option<String>,
        variables: BTreeMap<String, serde_json::Value>,
    ) -> Result<ProcessInstance> {
        validate_network_id(network_id)?;
        let id = Ulid::new().to_string();
        let business_key = business_key.unwrap_or_else(|| id.clone());
        let placeholder = ProcessInstance {
            id,
            definition_id: String::new(),
            business_key: business_key.clone(),
            ended: false,
            suspended: false,
            tenant_id: None,
            network_id: network_id.to_string(),
            sync_info: SyncInfo::placeholder(Utc::now()),
        };
        self.db.save(&placeholder).await?;

        let command = StartCommand {
            deployment_id: deployment_id.to_string(),
            business_key,
            variables,
        };
        self.commands.start_instance(network_id, &command).await?;
        tracing::info!(network_id, deployment_id, business_key = %command.business_key, "instance start sent");
        Ok(placeholder)
    }

    /// Stores an agent-reported record as confirmed.
    ///
    /// Clears every placeholder of the same entity type on the network first.
    /// A pending delete mark on the stored record survives the upsert.
    ///
    /// # Errors
    ///
    /// Returns an error if a catalog operation fails.
    pub async fn confirm<E: Synced>(&self, network_id: &str, mut record: E) -> Result<E> {
        record.set_network_id(network_id);
        let cleared = self.clear_placeholders::<E>(network_id).await?;

        let marked_for_delete = self
            .db
            .read::<E>(network_id, record.id())
            .await?
            .is_some_and(|stored| stored.sync_info().marked_for_delete);
        *record.sync_info_mut() = SyncInfo {
            marked_for_delete,
            ..SyncInfo::confirmed(Utc::now())
        };
        self.db.save(&record).await?;

        if cleared > 0 {
            tracing::debug!(network_id, table = E::TABLE.as_str(), cleared, "placeholders cleared");
        }
        Ok(record)
    }

    /// Confirms a deployment and clears its missing flag.
    ///
    /// # Errors
    ///
    /// Returns an error if a catalog operation fails.
    pub async fn confirm_deployment(
        &self,
        network_id: &str,
        deployment: Deployment,
    ) -> Result<Deployment> {
        let deployment = self.confirm(network_id, deployment).await?;
        if let Some(mut metadata) = self
            .db
            .read::<DeploymentMetadata>(network_id, &deployment.id)
            .await?
        {
            if metadata.sync_info.marked_as_missing {
                metadata.sync_info.marked_as_missing = false;
                metadata.sync_info.sync_date = Utc::now();
                self.db.save(&metadata).await?;
                tracing::info!(network_id, deployment_id = %deployment.id, "missing deployment is back");
            }
        }
        Ok(deployment)
    }

    async fn clear_placeholders<E: Synced>(&self, network_id: &str) -> Result<usize> {
        let placeholders: Vec<E> = self
            .db
            .list_all(&Query::network(network_id).placeholders())
            .await?;
        for placeholder in &placeholders {
            self.db.remove::<E>(network_id, placeholder.id()).await?;
        }
        Ok(placeholders.len())
    }

    /// Deletes a deployment through the API.
    ///
    /// # Errors
    ///
    /// Returns an error if a catalog operation, the delegate or the command
    /// publish fails.
    pub async fn delete_deployment(
        &self,
        network_id: &str,
        deployment_id: &str,
    ) -> Result<DeleteOutcome> {
        let stored = self.db.read::<Deployment>(network_id, deployment_id).await?;
        let Some(mut deployment) = stored else {
            self.delegate.remove_deployment(network_id, deployment_id).await?;
            return Ok(DeleteOutcome::Deferred);
        };
        if self.delegate.owns_deployment(network_id, deployment_id).await? {
            self.delegate.remove_deployment(network_id, deployment_id).await?;
            return Ok(DeleteOutcome::Deferred);
        }

        let outcome = if deployment.sync_info.mark_for_delete(Utc::now()) {
            self.db.save(&deployment).await?;
            DeleteOutcome::MarkedForDelete
        } else {
            self.db.remove::<Deployment>(network_id, deployment_id).await?;
            self.db
                .remove::<DeploymentMetadata>(network_id, deployment_id)
                .await?;
            DeleteOutcome::PlaceholderRemoved
        };
        self.commands
            .delete_deployment(network_id, deployment_id)
            .await?;
        tracing::info!(network_id, deployment_id, ?outcome, "deployment delete sent");
        Ok(outcome)
    }

    /// Stops an instance through the API.
    ///
    /// # Errors
    ///
    /// Returns an error if a catalog operation, the delegate or the command
    /// publish fails.
    pub async fn stop_instance(&self, network_id: &str, instance_id: &str) -> Result<DeleteOutcome> {
        let stored = self.db.read::<ProcessInstance>(network_id, instance_id).await?;
        let Some(mut instance) = stored else {
            self.delegate.remove_instance(network_id, instance_id).await?;
            return Ok(DeleteOutcome::Deferred);
        };
        if self.delegate.owns_instance(network_id, instance_id).await? {
            self.delegate.remove_instance(network_id, instance_id).await?;
            return Ok(DeleteOutcome::Deferred);
        }

        let outcome = if instance.sync_info.mark_for_delete(Utc::now()) {
            self.db.save(&instance).await?;
            DeleteOutcome::MarkedForDelete
        } else {
            self.db.remove::<ProcessInstance>(network_id, instance_id).await?;
            DeleteOutcome::PlaceholderRemoved
        };
        self.commands.stop_instance(network_id, instance_id).await?;
        tracing::info!(network_id, instance_id, ?outcome, "instance stop sent");
        Ok(outcome)
    }

    /// Updates deployment metadata after the agent dropped `removed`, through
    /// a delete message or a known-ids prune.
    ///
    /// Deployments deleted through the API lose their metadata; any other
    /// deployment the agent no longer has is flagged missing.
    ///
    /// # Errors
    ///
    /// Returns an error if a catalog operation fails.
    pub async fn on_deployments_pruned(&self, network_id: &str, removed: &[Deployment]) -> Result<()> {
        for deployment in removed {
            if deployment.sync_info.marked_for_delete {
                self.db
                    .remove::<DeploymentMetadata>(network_id, &deployment.id)
                    .await?;
                continue;
            }
            let Some(mut metadata) = self
                .db
                .read::<DeploymentMetadata>(network_id, &deployment.id)
                .await?
            else {
                continue;
            };
            if !metadata.sync_info.marked_as_missing {
                metadata.sync_info.marked_as_missing = true;
                metadata.sync_info.sync_date = Utc::now();
                self.db.save(&metadata).await?;
                tracing::warn!(network_id, deployment_id = %deployment.id, "deployment missing on agent");
            }
        }
        Ok(())
    }
}
