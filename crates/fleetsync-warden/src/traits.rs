//! Capability traits of the reconciliation engine.
//!
//! The engine is generic over a family of five entity types ([`WardenTypes`])
//! and talks to the outside world only through two traits:
//!
//! - [`RuntimeStateProvider`]: what the agents actually run, plus the
//!   corrective commands
//! - [`DesiredStateStore`]: the intent records the engine enforces

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use fleetsync_core::Result;

/// The entity family the engine reconciles.
pub trait WardenTypes: Send + Sync + 'static {
    /// Intent for one running instance.
    type Info: Intent + Clone + fmt::Debug + Send + Sync + 'static;
    /// Deployment payload used to redeploy.
    type Deployment: Send + Sync + 'static;
    /// Observed running instance.
    type Instance: Clone + fmt::Debug + Send + Sync + 'static;
    /// Observed finished or running instance history.
    type History: Send + Sync + 'static;
    /// Observed incident of a history.
    type Incident: Send + Sync + 'static;
}

/// Fields the engine reads from an intent record.
pub trait Intent {
    /// Network the instance should run on.
    fn network_id(&self) -> &str;

    /// Deployment to run.
    fn deployment_id(&self) -> &str;

    /// Business key identifying the intended instance.
    fn business_key(&self) -> &str;

    /// When the intent was created; gates the first corrective action.
    fn created_at(&self) -> DateTime<Utc>;
}

/// Observed runtime state and the commands that change it.
#[async_trait]
pub trait RuntimeStateProvider<T: WardenTypes>: Send + Sync {
    /// Streams every observed instance.
    fn all_instances(&self) -> BoxStream<'_, Result<T::Instance>>;

    /// Observed instances that satisfy `info`.
    async fn instances_for(&self, info: &T::Info) -> Result<Vec<T::Instance>>;

    /// Observed histories of instances that satisfied `info`.
    async fn histories_for(&self, info: &T::Info) -> Result<Vec<T::History>>;

    /// Incidents raised during `history`.
    async fn incidents_for(&self, history: &T::History) -> Result<Vec<T::Incident>>;

    /// Identifier of an instance, used to order duplicates.
    fn instance_id<'a>(&self, instance: &'a T::Instance) -> &'a str;

    /// Age reference of an instance.
    fn instance_timestamp(&self, instance: &T::Instance) -> DateTime<Utc>;

    /// Age reference of a history.
    fn history_timestamp(&self, history: &T::History) -> DateTime<Utc>;

    /// Age reference of an incident.
    fn incident_timestamp(&self, incident: &T::Incident) -> DateTime<Utc>;

    /// Returns false for legacy instances the engine must never touch.
    fn instance_is_created_with_warden_handling_intended(&self, instance: &T::Instance) -> bool;

    /// Returns true if the deployment `info` needs is present on its network.
    async fn deployment_exists(&self, info: &T::Info) -> Result<bool>;

    /// Starts an instance for `info`.
    async fn start(&self, info: &T::Info) -> Result<()>;

    /// Stops an instance.
    async fn stop(&self, instance: &T::Instance) -> Result<()>;

    /// Deploys `deployment` on the network of `info`.
    async fn deploy(&self, info: &T::Info, deployment: &T::Deployment) -> Result<()>;
}

/// Persistence of intent records.
#[async_trait]
pub trait DesiredStateStore<T: WardenTypes>: Send + Sync {
    /// Streams every intent record.
    fn all_infos(&self) -> BoxStream<'_, Result<T::Info>>;

    /// Intent records an observed instance satisfies.
    async fn infos_for_instance(&self, instance: &T::Instance) -> Result<Vec<T::Info>>;

    /// Intent records that run `deployment_id` on `network_id`.
    async fn infos_for_deployment(&self, network_id: &str, deployment_id: &str)
    -> Result<Vec<T::Info>>;

    /// Reads one intent record.
    async fn get(&self, network_id: &str, business_key: &str) -> Result<Option<T::Info>>;

    /// Inserts or replaces an intent record.
    async fn set(&self, info: &T::Info) -> Result<()>;

    /// Removes an intent record.
    async fn remove(&self, info: &T::Info) -> Result<()>;

    /// Deployment payload to redeploy for `info`, if one is stored.
    async fn deployment_payload(&self, info: &T::Info) -> Result<Option<T::Deployment>>;
}
