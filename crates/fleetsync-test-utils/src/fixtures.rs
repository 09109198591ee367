//! Pre-built test fixtures for common test scenarios.
//!
//! Provides factory functions to create catalog records with sensible
//! defaults. Mirrored records come back confirmed; tweak the returned value
//! for other lifecycle states.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use fleetsync_catalog::InMemoryDatabase;
use fleetsync_catalog::model::{
    Deployment, DeploymentCommand, DeploymentWardenInfo, HistoricProcessInstance, Incident,
    ProcessDefinition, ProcessInstance, SyncInfo, WardenInfo, fields,
};

/// Test context with an in-memory catalog and a unique network.
pub struct TestContext {
    /// Shared catalog.
    pub db: Arc<InMemoryDatabase>,
    /// Network identifier.
    pub network_id: String,
}

impl TestContext {
    /// Creates a new test context with a unique network id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            db: Arc::new(InMemoryDatabase::new()),
            network_id: format!("test-net-{}", ulid::Ulid::new().to_string().to_lowercase()),
        }
    }

    /// Creates a context for a specific network.
    #[must_use]
    pub fn with_network(network_id: impl Into<String>) -> Self {
        Self {
            db: Arc::new(InMemoryDatabase::new()),
            network_id: network_id.into(),
        }
    }

    /// Returns the state topic for `entity` on this context's network.
    #[must_use]
    pub fn state_topic(&self, entity: &str) -> String {
        format!("processes/{}/state/{entity}", self.network_id)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns `now - minutes`.
pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}

/// Deploy command with a trivial BPMN body.
pub fn deployment_command(id: &str) -> DeploymentCommand {
    DeploymentCommand {
        id: id.to_string(),
        name: format!("{id} process"),
        xml: format!("<definitions id=\"{id}\"/>"),
        svg: None,
        source: "test".to_string(),
    }
}

/// Confirmed deployment.
pub fn deployment(network_id: &str, id: &str) -> Deployment {
    Deployment {
        id: id.to_string(),
        name: format!("{id} process"),
        source: "test".to_string(),
        deployment_time: Some(Utc::now()),
        tenant_id: None,
        network_id: network_id.to_string(),
        sync_info: SyncInfo::confirmed(Utc::now()),
    }
}

/// Confirmed process definition belonging to `deployment_id`.
pub fn definition(network_id: &str, id: &str, deployment_id: &str) -> ProcessDefinition {
    ProcessDefinition {
        id: id.to_string(),
        key: format!("{id}-key"),
        name: format!("{id} definition"),
        version: 1,
        deployment_id: deployment_id.to_string(),
        resource: format!("{deployment_id}.bpmn"),
        suspended: false,
        tenant_id: None,
        network_id: network_id.to_string(),
        sync_info: SyncInfo::confirmed(Utc::now()),
    }
}

/// Confirmed running instance synced at `synced_at`.
pub fn instance(
    network_id: &str,
    id: &str,
    definition_id: &str,
    business_key: &str,
    synced_at: DateTime<Utc>,
) -> ProcessInstance {
    ProcessInstance {
        id: id.to_string(),
        definition_id: definition_id.to_string(),
        business_key: business_key.to_string(),
        ended: false,
        suspended: false,
        tenant_id: None,
        network_id: network_id.to_string(),
        sync_info: SyncInfo::confirmed(synced_at),
    }
}

/// Confirmed history of a finished instance.
pub fn history(
    network_id: &str,
    id: &str,
    definition_id: &str,
    business_key: &str,
    ended_at: DateTime<Utc>,
) -> HistoricProcessInstance {
    HistoricProcessInstance {
        id: id.to_string(),
        process_definition_id: definition_id.to_string(),
        process_definition_key: format!("{definition_id}-key"),
        process_definition_name: format!("{definition_id} definition"),
        business_key: business_key.to_string(),
        start_time: Some(ended_at - Duration::minutes(1)),
        end_time: Some(ended_at),
        duration_in_millis: Some(60_000),
        delete_reason: None,
        state: "COMPLETED".to_string(),
        network_id: network_id.to_string(),
        sync_info: SyncInfo::confirmed(Utc::now()),
    }
}

/// Confirmed incident raised by `process_instance_id` at `time`.
pub fn incident(
    network_id: &str,
    id: &str,
    process_instance_id: &str,
    time: DateTime<Utc>,
) -> Incident {
    Incident {
        id: id.to_string(),
        process_instance_id: process_instance_id.to_string(),
        process_definition_id: String::new(),
        external_task_id: None,
        worker_id: None,
        error_message: "boom".to_string(),
        time: Some(time),
        deployment_name: None,
        network_id: network_id.to_string(),
        sync_info: SyncInfo::confirmed(Utc::now()),
    }
}

/// Intent for one running instance.
pub fn warden_info(
    network_id: &str,
    deployment_id: &str,
    business_key: &str,
    creation_time: DateTime<Utc>,
) -> WardenInfo {
    WardenInfo {
        network_id: network_id.to_string(),
        process_deployment_id: deployment_id.to_string(),
        business_key: business_key.to_string(),
        creation_time,
        start_parameters: BTreeMap::new(),
    }
}

/// Intent for one deployment.
pub fn deployment_warden_info(network_id: &str, deployment_id: &str) -> DeploymentWardenInfo {
    DeploymentWardenInfo {
        network_id: network_id.to_string(),
        deployment_id: deployment_id.to_string(),
        deployment: deployment_command(deployment_id),
    }
}

/// Encodes a record the way an agent publishes it: without the network id
/// and without placeholder bookkeeping.
pub fn agent_payload<T: Serialize>(record: &T) -> Vec<u8> {
    let mut value = serde_json::to_value(record).expect("serializable record");
    if let Some(object) = value.as_object_mut() {
        for key in [
            fields::IS_PLACEHOLDER,
            fields::MARKED_FOR_DELETE,
            fields::MARKED_AS_MISSING,
            "syncDate",
            "networkId",
        ] {
            object.remove(key);
        }
    }
    serde_json::to_vec(&value).expect("serializable value")
}

/// Encodes a known-ids payload.
pub fn known_payload(ids: &[&str]) -> Vec<u8> {
    serde_json::to_vec(ids).expect("serializable ids")
}
