//! Outbound commands to agents.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use fleetsync_catalog::model::DeploymentCommand;
use fleetsync_core::Result;

use crate::topics::CommandKind;
use crate::transport::Broker;

/// Payload of a start command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCommand {
    /// Deployment whose process to start.
    pub deployment_id: String,
    /// Business key of the new instance.
    pub business_key: String,
    /// Process variables.
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
}

/// Publishes commands on the per-network command topics.
#[derive(Clone)]
pub struct CommandPublisher {
    broker: Arc<dyn Broker>,
}

impl std::fmt::Debug for CommandPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPublisher")
            .field("broker", &self.broker.name())
            .finish()
    }
}

impl CommandPublisher {
    /// Creates a publisher on `broker`.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Sends a deploy command.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or the publish fails.
    pub async fn deploy(&self, network_id: &str, command: &DeploymentCommand) -> Result<()> {
        let payload = serde_json::to_vec(command)?;
        self.send(network_id, CommandKind::Deploy, payload).await
    }

    /// Sends a delete-deployment command.
    ///
    /// # Errors
    ///
    /// Returns an error if the publish fails.
    pub async fn delete_deployment(&self, network_id: &str, deployment_id: &str) -> Result<()> {
        let payload = serde_json::to_vec(deployment_id)?;
        self.send(network_id, CommandKind::DeleteDeployment, payload).await
    }

    /// Sends a start-instance command.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or the publish fails.
    pub async fn start_instance(&self, network_id: &str, command: &StartCommand) -> Result<()> {
        let payload = serde_json::to_vec(command)?;
        self.send(network_id, CommandKind::StartInstance, payload).await
    }

    /// Sends a stop-instance command.
    ///
    /// # Errors
    ///
    /// Returns an error if the publish fails.
    pub async fn stop_instance(&self, network_id: &str, instance_id: &str) -> Result<()> {
        let payload = serde_json::to_vec(instance_id)?;
        self.send(network_id, CommandKind::StopInstance, payload).await
    }

    async fn send(&self, network_id: &str, kind: CommandKind, payload: Vec<u8>) -> Result<()> {
        let topic = kind.topic(network_id);
        self.broker.publish(&topic, Bytes::from(payload)).await?;
        tracing::debug!(network_id, command = kind.as_str(), %topic, "command sent");
        Ok(())
    }
}
