//! Topic layout of the state-sync protocol.
//!
//! Agents publish their state under
//! `processes/<networkId>/state/<entity>[/delete|/known]` and receive commands
//! under `processes/<networkId>/cmd/<entity>[/start|/delete]`. Subscriptions
//! may be shared across cloud replicas with a `$share/<group>/` prefix, which
//! brokers strip before delivery but some echo back; parsing accepts both.

use std::fmt;

use fleetsync_core::{Error, Result, validate_network_id};

/// First segment of every protocol topic.
pub const ROOT: &str = "processes";

const STATE: &str = "state";
const CMD: &str = "cmd";
const SHARE_PREFIX: &str = "$share/";

/// Entity types synchronized by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    /// Deployments.
    Deployment,
    /// Incidents.
    Incident,
    /// Process definitions.
    ProcessDefinition,
    /// Running process instances.
    ProcessInstance,
    /// Historic process instances.
    ProcessInstanceHistory,
}

impl EntityType {
    /// Every synchronized entity type.
    pub const ALL: [Self; 5] = [
        Self::Deployment,
        Self::Incident,
        Self::ProcessDefinition,
        Self::ProcessInstance,
        Self::ProcessInstanceHistory,
    ];

    /// Returns the topic segment.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Incident => "incident",
            Self::ProcessDefinition => "process-definition",
            Self::ProcessInstance => "process-instance",
            Self::ProcessInstanceHistory => "process-instance-history",
        }
    }

    /// Parses a topic segment.
    #[must_use]
    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == segment)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three message kinds of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Full record, replace-or-insert.
    Upsert,
    /// Bare id, remove one record.
    Delete,
    /// Complete id set, remove everything else.
    Known,
}

impl StateKind {
    /// Every message kind.
    pub const ALL: [Self; 3] = [Self::Upsert, Self::Delete, Self::Known];

    /// Returns the metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
            Self::Known => "known",
        }
    }

    const fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Upsert => None,
            Self::Delete => Some("delete"),
            Self::Known => Some("known"),
        }
    }
}

/// A parsed inbound state topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTopic {
    /// Network that published the message.
    pub network_id: String,
    /// Entity the message is about.
    pub entity: EntityType,
    /// Message kind.
    pub kind: StateKind,
}

impl StateTopic {
    /// Creates a state topic.
    #[must_use]
    pub fn new(network_id: impl Into<String>, entity: EntityType, kind: StateKind) -> Self {
        Self {
            network_id: network_id.into(),
            entity,
            kind,
        }
    }

    /// Parses a topic as delivered by the broker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTopic`] if the topic is not a state topic of a
    /// known entity with a valid network id.
    pub fn parse(topic: &str) -> Result<Self> {
        let path = strip_share_prefix(topic);
        let segments: Vec<&str> = path.split('/').collect();

        let (network_id, entity, suffix) = match segments.as_slice() {
            [ROOT, network_id, STATE, entity] => (*network_id, *entity, None),
            [ROOT, network_id, STATE, entity, suffix] => (*network_id, *entity, Some(*suffix)),
            _ => return Err(Error::invalid_topic(topic, "not a state topic")),
        };

        validate_network_id(network_id).map_err(|e| Error::invalid_topic(topic, e.to_string()))?;
        let entity = EntityType::from_segment(entity)
            .ok_or_else(|| Error::invalid_topic(topic, format!("unknown entity '{entity}'")))?;
        let kind = match suffix {
            None => StateKind::Upsert,
            Some("delete") => StateKind::Delete,
            Some("known") => StateKind::Known,
            Some(other) => {
                return Err(Error::invalid_topic(topic, format!("unknown suffix '{other}'")));
            }
        };

        Ok(Self::new(network_id, entity, kind))
    }

    /// Formats the topic an agent publishes on.
    #[must_use]
    pub fn format(&self) -> String {
        let base = format!(
            "{ROOT}/{}/{STATE}/{}",
            self.network_id,
            self.entity.as_str()
        );
        match self.kind.suffix() {
            Some(suffix) => format!("{base}/{suffix}"),
            None => base,
        }
    }
}

/// Commands the cloud sends to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Deploy a BPMN payload.
    Deploy,
    /// Delete a deployment.
    DeleteDeployment,
    /// Start a process instance.
    StartInstance,
    /// Stop a process instance.
    StopInstance,
}

impl CommandKind {
    /// Returns the metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::DeleteDeployment => "delete_deployment",
            Self::StartInstance => "start_instance",
            Self::StopInstance => "stop_instance",
        }
    }

    const fn path(self) -> &'static str {
        match self {
            Self::Deploy => "deployment",
            Self::DeleteDeployment => "deployment/delete",
            Self::StartInstance => "deployment/start",
            Self::StopInstance => "process-instance/delete",
        }
    }

    /// Formats the command topic for one network.
    #[must_use]
    pub fn topic(self, network_id: &str) -> String {
        format!("{ROOT}/{network_id}/{CMD}/{}", self.path())
    }
}

/// Subscription filter for one entity and kind across every network.
///
/// With a `share_group` the filter becomes a shared subscription so each
/// message is delivered to one replica of the group.
#[must_use]
pub fn state_filter(entity: EntityType, kind: StateKind, share_group: Option<&str>) -> String {
    let filter = StateTopic::new("+", entity, kind).format();
    match share_group {
        Some(group) => format!("{SHARE_PREFIX}{group}/{filter}"),
        None => filter,
    }
}

/// Every state subscription the cloud side needs.
#[must_use]
pub fn all_state_filters(share_group: Option<&str>) -> Vec<String> {
    EntityType::ALL
        .into_iter()
        .flat_map(|entity| {
            StateKind::ALL
                .into_iter()
                .map(move |kind| state_filter(entity, kind, share_group))
        })
        .collect()
}

/// Removes a `$share/<group>/` prefix, if present.
#[must_use]
pub fn strip_share_prefix(topic: &str) -> &str {
    topic
        .strip_prefix(SHARE_PREFIX)
        .and_then(|rest| rest.split_once('/'))
        .map_or(topic, |(_, path)| path)
}
