//! Catalog entity model.
//!
//! The catalog mirrors what each network reports about itself (deployments,
//! definitions, instances, histories, incidents) and stores the cloud-side
//! intent records of the reconciliation engine. Every row is keyed by
//! `(network_id, id)`.
//!
//! Mirrored rows carry a [`SyncInfo`] that tracks where the record is in the
//! placeholder lifecycle:
//!
//! ```text
//! Placeholder ──confirm──▶ Confirmed ──api delete──▶ MarkedForDelete ──known-ids──▶ (gone)
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Logical catalog tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Mirrored deployments.
    Deployments,
    /// Mirrored process definitions.
    Definitions,
    /// Mirrored historic process instances.
    Histories,
    /// Mirrored incidents.
    Incidents,
    /// Mirrored running process instances.
    Instances,
    /// Original deploy commands issued by the cloud.
    DeploymentMetadata,
    /// Last time each network reported anything.
    LastNetworkContact,
    /// Desired running instances owned by the reconciliation engine.
    WardenInfo,
    /// Desired deployments owned by the reconciliation engine.
    DeploymentWardenInfo,
}

impl Table {
    /// Returns the table name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deployments => "deployments",
            Self::Definitions => "definitions",
            Self::Histories => "histories",
            Self::Incidents => "incidents",
            Self::Instances => "instances",
            Self::DeploymentMetadata => "deployment_metadata",
            Self::LastNetworkContact => "last_network_contact",
            Self::WardenInfo => "warden_info",
            Self::DeploymentWardenInfo => "deployment_warden_info",
        }
    }
}

/// A record stored in the catalog.
pub trait CatalogEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table the record lives in.
    const TABLE: Table;

    /// Network the record belongs to.
    fn network_id(&self) -> &str;

    /// Record identifier, unique within its network and table.
    fn id(&self) -> &str;
}

/// Lifecycle position of a mirrored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Inserted optimistically while a command is in flight.
    Placeholder,
    /// Reported by the agent.
    Confirmed,
    /// Confirmed and soft-deleted, waiting for the agent to drop it.
    MarkedForDelete,
}

/// Placeholder and tombstone bookkeeping carried by mirrored records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncInfo {
    /// Record was written by the cloud before the agent confirmed it.
    pub is_placeholder: bool,
    /// Record was deleted through the API; the agent has not confirmed yet.
    pub marked_for_delete: bool,
    /// The agent no longer has a record the catalog expected it to have.
    pub marked_as_missing: bool,
    /// When the record was last written.
    pub sync_date: DateTime<Utc>,
}

impl SyncInfo {
    /// Bookkeeping for a record reported by the agent.
    #[must_use]
    pub fn confirmed(now: DateTime<Utc>) -> Self {
        Self {
            sync_date: now,
            ..Self::default()
        }
    }

    /// Bookkeeping for a record inserted ahead of agent confirmation.
    #[must_use]
    pub fn placeholder(now: DateTime<Utc>) -> Self {
        Self {
            is_placeholder: true,
            sync_date: now,
            ..Self::default()
        }
    }

    /// Returns the lifecycle position.
    #[must_use]
    pub const fn state(&self) -> RecordState {
        if self.is_placeholder {
            RecordState::Placeholder
        } else if self.marked_for_delete {
            RecordState::MarkedForDelete
        } else {
            RecordState::Confirmed
        }
    }

    /// Soft-deletes a confirmed record.
    ///
    /// Returns false and leaves the record untouched for placeholders, which
    /// can never carry the delete mark.
    pub fn mark_for_delete(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_placeholder {
            return false;
        }
        self.marked_for_delete = true;
        self.sync_date = now;
        true
    }
}

/// A mirrored record with placeholder bookkeeping.
pub trait Synced: CatalogEntity {
    /// Returns the bookkeeping fields.
    fn sync_info(&self) -> &SyncInfo;

    /// Returns the bookkeeping fields mutably.
    fn sync_info_mut(&mut self) -> &mut SyncInfo;

    /// Assigns the network taken from the topic the record arrived on.
    fn set_network_id(&mut self, network_id: &str);
}

macro_rules! synced_entity {
    ($ty:ty, $table:expr) => {
        impl CatalogEntity for $ty {
            const TABLE: Table = $table;

            fn network_id(&self) -> &str {
                &self.network_id
            }

            fn id(&self) -> &str {
                &self.id
            }
        }

        impl Synced for $ty {
            fn sync_info(&self) -> &SyncInfo {
                &self.sync_info
            }

            fn sync_info_mut(&mut self) -> &mut SyncInfo {
                &mut self.sync_info
            }

            fn set_network_id(&mut self, network_id: &str) {
                network_id.clone_into(&mut self.network_id);
            }
        }
    };
}

/// A deployment as reported by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Deployment id.
    pub id: String,
    /// Human readable name.
    #[serde(default)]
    pub name: String,
    /// Deployment source tag.
    #[serde(default)]
    pub source: String,
    /// When the agent deployed it.
    #[serde(default)]
    pub deployment_time: Option<DateTime<Utc>>,
    /// Engine tenant, if any.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Owning network.
    #[serde(default)]
    pub network_id: String,
    /// Placeholder bookkeeping.
    #[serde(flatten)]
    pub sync_info: SyncInfo,
}

synced_entity!(Deployment, Table::Deployments);

/// A process definition as reported by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDefinition {
    /// Definition id.
    pub id: String,
    /// Definition key (BPMN process id).
    #[serde(default)]
    pub key: String,
    /// Human readable name.
    #[serde(default)]
    pub name: String,
    /// Definition version.
    #[serde(default)]
    pub version: i64,
    /// Deployment the definition belongs to.
    #[serde(default)]
    pub deployment_id: String,
    /// Resource name inside the deployment.
    #[serde(default)]
    pub resource: String,
    /// Whether the definition is suspended.
    #[serde(default)]
    pub suspended: bool,
    /// Engine tenant, if any.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Owning network.
    #[serde(default)]
    pub network_id: String,
    /// Placeholder bookkeeping.
    #[serde(flatten)]
    pub sync_info: SyncInfo,
}

synced_entity!(ProcessDefinition, Table::Definitions);

/// A running process instance as reported by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstance {
    /// Instance id.
    pub id: String,
    /// Definition the instance runs.
    #[serde(default)]
    pub definition_id: String,
    /// Business key the instance was started with.
    #[serde(default)]
    pub business_key: String,
    /// Whether the instance has ended.
    #[serde(default)]
    pub ended: bool,
    /// Whether the instance is suspended.
    #[serde(default)]
    pub suspended: bool,
    /// Engine tenant, if any.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Owning network.
    #[serde(default)]
    pub network_id: String,
    /// Placeholder bookkeeping.
    #[serde(flatten)]
    pub sync_info: SyncInfo,
}

synced_entity!(ProcessInstance, Table::Instances);

/// A finished or running instance from the agent's history service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricProcessInstance {
    /// History id (equals the process instance id).
    pub id: String,
    /// Definition the instance ran.
    #[serde(default)]
    pub process_definition_id: String,
    /// Definition key.
    #[serde(default)]
    pub process_definition_key: String,
    /// Definition name.
    #[serde(default)]
    pub process_definition_name: String,
    /// Business key the instance was started with.
    #[serde(default)]
    pub business_key: String,
    /// Start time.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// End time, unset while running.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Run duration.
    #[serde(default)]
    pub duration_in_millis: Option<i64>,
    /// Why the instance was deleted, if it was.
    #[serde(default)]
    pub delete_reason: Option<String>,
    /// Engine state (`ACTIVE`, `COMPLETED`, `EXTERNALLY_TERMINATED`, ...).
    #[serde(default)]
    pub state: String,
    /// Owning network.
    #[serde(default)]
    pub network_id: String,
    /// Placeholder bookkeeping.
    #[serde(flatten)]
    pub sync_info: SyncInfo,
}

synced_entity!(HistoricProcessInstance, Table::Histories);

impl HistoricProcessInstance {
    /// Last state change of the history: its end, else its start, else its sync.
    #[must_use]
    pub fn changed_at(&self) -> DateTime<Utc> {
        self.end_time
            .or(self.start_time)
            .unwrap_or(self.sync_info.sync_date)
    }
}

/// An incident raised by a process instance on an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Incident id.
    pub id: String,
    /// Process instance that raised it.
    #[serde(default)]
    pub process_instance_id: String,
    /// Definition of that instance.
    #[serde(default)]
    pub process_definition_id: String,
    /// External task that failed, if any.
    #[serde(default)]
    pub external_task_id: Option<String>,
    /// Worker that reported it, if any.
    #[serde(default)]
    pub worker_id: Option<String>,
    /// Failure message.
    #[serde(default)]
    pub error_message: String,
    /// When the incident occurred.
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    /// Deployment name for display.
    #[serde(default)]
    pub deployment_name: Option<String>,
    /// Owning network.
    #[serde(default)]
    pub network_id: String,
    /// Placeholder bookkeeping.
    #[serde(flatten)]
    pub sync_info: SyncInfo,
}

synced_entity!(Incident, Table::Incidents);

impl Incident {
    /// When the incident occurred, falling back to when it was mirrored.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.time.unwrap_or(self.sync_info.sync_date)
    }
}

/// Deploy command payload sent to an agent.
///
/// Kept in [`DeploymentMetadata`] and [`DeploymentWardenInfo`] so a
/// deployment the agent lost can be sent again unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCommand {
    /// Deployment id the agent must use.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// BPMN XML to deploy.
    pub xml: String,
    /// Rendered diagram, if available.
    #[serde(default)]
    pub svg: Option<String>,
    /// Source tag recorded on the deployment.
    #[serde(default)]
    pub source: String,
}

/// Cloud-side record of a deployment issued through the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetadata {
    /// Deployment id.
    pub id: String,
    /// The command originally sent.
    pub command: DeploymentCommand,
    /// Owning network.
    pub network_id: String,
    /// Placeholder bookkeeping; `marked_as_missing` drives redeploys.
    #[serde(flatten)]
    pub sync_info: SyncInfo,
}

synced_entity!(DeploymentMetadata, Table::DeploymentMetadata);

/// Last time a network reported anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastNetworkContact {
    /// Network id, also the record id.
    pub network_id: String,
    /// Time of the last inbound state message.
    pub time: DateTime<Utc>,
}

impl CatalogEntity for LastNetworkContact {
    const TABLE: Table = Table::LastNetworkContact;

    fn network_id(&self) -> &str {
        &self.network_id
    }

    fn id(&self) -> &str {
        &self.network_id
    }
}

/// Desired state: one business key on one network should have exactly one
/// running instance of one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WardenInfo {
    /// Network the instance should run on.
    pub network_id: String,
    /// Deployment to start.
    pub process_deployment_id: String,
    /// Business key identifying the intended instance; the record id.
    pub business_key: String,
    /// When the engine took ownership.
    pub creation_time: DateTime<Utc>,
    /// Variables forwarded with every start command.
    #[serde(default)]
    pub start_parameters: BTreeMap<String, serde_json::Value>,
}

impl CatalogEntity for WardenInfo {
    const TABLE: Table = Table::WardenInfo;

    fn network_id(&self) -> &str {
        &self.network_id
    }

    fn id(&self) -> &str {
        &self.business_key
    }
}

/// Desired state: a deployment the engine keeps present on a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentWardenInfo {
    /// Network the deployment should exist on.
    pub network_id: String,
    /// Deployment id; the record id.
    pub deployment_id: String,
    /// Payload to redeploy with.
    pub deployment: DeploymentCommand,
}

impl CatalogEntity for DeploymentWardenInfo {
    const TABLE: Table = Table::DeploymentWardenInfo;

    fn network_id(&self) -> &str {
        &self.network_id
    }

    fn id(&self) -> &str {
        &self.deployment_id
    }
}

/// JSON field names used in catalog queries.
pub mod fields {
    /// [`super::SyncInfo::is_placeholder`].
    pub const IS_PLACEHOLDER: &str = "isPlaceholder";
    /// [`super::SyncInfo::marked_for_delete`].
    pub const MARKED_FOR_DELETE: &str = "markedForDelete";
    /// [`super::SyncInfo::marked_as_missing`].
    pub const MARKED_AS_MISSING: &str = "markedAsMissing";
    /// Business key on instances, histories and warden info.
    pub const BUSINESS_KEY: &str = "businessKey";
    /// Deployment id on definitions.
    pub const DEPLOYMENT_ID: &str = "deploymentId";
    /// Deployment id on warden info.
    pub const PROCESS_DEPLOYMENT_ID: &str = "processDeploymentId";
    /// Instance id on incidents.
    pub const PROCESS_INSTANCE_ID: &str = "processInstanceId";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_payload_without_bookkeeping_deserializes() {
        let payload = r#"{"id":"inst-1","definitionId":"def-1","businessKey":"bk1","ended":false,"suspended":false}"#;
        let instance: ProcessInstance = serde_json::from_str(payload).unwrap();
        assert_eq!(instance.business_key, "bk1");
        assert_eq!(instance.network_id, "");
        assert_eq!(instance.sync_info.state(), RecordState::Confirmed);
    }

    #[test]
    fn sync_info_is_flattened_into_the_row() {
        let deployment = Deployment {
            id: "d1".into(),
            name: "pump control".into(),
            source: String::new(),
            deployment_time: None,
            tenant_id: None,
            network_id: "n1".into(),
            sync_info: SyncInfo::placeholder(Utc::now()),
        };
        let value = serde_json::to_value(&deployment).unwrap();
        assert_eq!(value[fields::IS_PLACEHOLDER], serde_json::Value::Bool(true));
        assert_eq!(value[fields::MARKED_FOR_DELETE], serde_json::Value::Bool(false));
    }

    #[test]
    fn placeholders_cannot_be_marked_for_delete() {
        let now = Utc::now();
        let mut placeholder = SyncInfo::placeholder(now);
        assert!(!placeholder.mark_for_delete(now));
        assert_eq!(placeholder.state(), RecordState::Placeholder);

        let mut confirmed = SyncInfo::confirmed(now);
        assert!(confirmed.mark_for_delete(now));
        assert_eq!(confirmed.state(), RecordState::MarkedForDelete);
    }

    #[test]
    fn history_change_time_prefers_end_time() {
        let start = Utc::now() - chrono::Duration::hours(2);
        let end = start + chrono::Duration::minutes(30);
        let mut history = HistoricProcessInstance {
            id: "h1".into(),
            process_definition_id: "def-1".into(),
            process_definition_key: "pump".into(),
            process_definition_name: "pump".into(),
            business_key: "bk1".into(),
            start_time: Some(start),
            end_time: Some(end),
            duration_in_millis: None,
            delete_reason: None,
            state: "COMPLETED".into(),
            network_id: "n1".into(),
            sync_info: SyncInfo::confirmed(Utc::now()),
        };
        assert_eq!(history.changed_at(), end);
        history.end_time = None;
        assert_eq!(history.changed_at(), start);
    }
}
