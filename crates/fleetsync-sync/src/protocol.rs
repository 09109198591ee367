//! Inbound handlers of the set-reconciliation protocol.
//!
//! [`StateSync`] owns one route per entity type, built explicitly in
//! [`StateSync::new`]. Each delivered message is parsed, routed by its topic
//! and applied to the catalog:
//!
//! | kind    | payload               | effect                                 |
//! |---------|-----------------------|----------------------------------------|
//! | upsert  | full JSON record      | clear placeholders, store as confirmed |
//! | delete  | bare id               | remove that record                     |
//! | known   | JSON array of ids     | remove every record not in the array   |
//!
//! Malformed topics and payloads are logged and dropped. Storage failures are
//! logged too; the agent's next known-ids message repairs the catalog.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::Instrument;

use fleetsync_catalog::Database;
use fleetsync_catalog::model::{
    Deployment, HistoricProcessInstance, Incident, LastNetworkContact, ProcessDefinition,
    ProcessInstance, Synced,
};
use fleetsync_core::metrics::{record_sync_dropped, record_sync_message, record_sync_pruned};
use fleetsync_core::observability::network_span;
use fleetsync_core::{Error, Result};

use crate::lifecycle::PlaceholderLifecycle;
use crate::topics::{EntityType, StateKind, StateTopic, all_state_filters};
use crate::transport::{Broker, InboundMessage, MessageHandler};

/// Applies the three message kinds for one entity type.
#[async_trait]
pub trait EntityRoute: Send + Sync {
    /// Replaces or inserts the record in `payload`.
    async fn upsert(&self, network_id: &str, payload: &[u8]) -> Result<()>;

    /// Removes one record.
    async fn delete(&self, network_id: &str, id: &str) -> Result<bool>;

    /// Removes every record not in `known`. Returns how many were removed.
    async fn known(&self, network_id: &str, known: &HashSet<String>) -> Result<usize>;
}

/// Route for an entity with no side effects beyond its own table.
pub struct TypedRoute<D, E> {
    lifecycle: Arc<PlaceholderLifecycle<D>>,
    _entity: PhantomData<fn() -> E>,
}

impl<D, E> TypedRoute<D, E> {
    /// Creates a route.
    #[must_use]
    pub fn new(lifecycle: Arc<PlaceholderLifecycle<D>>) -> Self {
        Self {
            lifecycle,
            _entity: PhantomData,
        }
    }
}

fn decode_record<E: Synced>(payload: &[u8]) -> Result<E> {
    let record: E = serde_json::from_slice(payload)?;
    if record.id().is_empty() {
        return Err(Error::InvalidId {
            message: format!("{} record without id", E::TABLE.as_str()),
        });
    }
    Ok(record)
}

#[async_trait]
impl<D: Database + 'static, E: Synced> EntityRoute for TypedRoute<D, E> {
    async fn upsert(&self, network_id: &str, payload: &[u8]) -> Result<()> {
        let record = decode_record::<E>(payload)?;
        self.lifecycle.confirm(network_id, record).await?;
        Ok(())
    }

    async fn delete(&self, network_id: &str, id: &str) -> Result<bool> {
        self.lifecycle.db().remove::<E>(network_id, id).await
    }

    async fn known(&self, network_id: &str, known: &HashSet<String>) -> Result<usize> {
        let removed: Vec<E> = self.lifecycle.db().remove_unknown(network_id, known).await?;
        Ok(removed.len())
    }
}

/// Deployment route: keeps deployment metadata in step with the mirror.
pub struct DeploymentRoute<D> {
    lifecycle: Arc<PlaceholderLifecycle<D>>,
}

impl<D> DeploymentRoute<D> {
    /// Creates a route.
    #[must_use]
    pub fn new(lifecycle: Arc<PlaceholderLifecycle<D>>) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl<D: Database + 'static> EntityRoute for DeploymentRoute<D> {
    async fn upsert(&self, network_id: &str, payload: &[u8]) -> Result<()> {
        let deployment = decode_record::<Deployment>(payload)?;
        self.lifecycle.confirm_deployment(network_id, deployment).await?;
        Ok(())
    }

    async fn delete(&self, network_id: &str, id: &str) -> Result<bool> {
        let db = self.lifecycle.db();
        let Some(deployment) = db.read::<Deployment>(network_id, id).await? else {
            return Ok(false);
        };
        db.remove::<Deployment>(network_id, id).await?;
        self.lifecycle
            .on_deployments_pruned(network_id, std::slice::from_ref(&deployment))
            .await?;
        Ok(true)
    }

    async fn known(&self, network_id: &str, known: &HashSet<String>) -> Result<usize> {
        let removed: Vec<Deployment> = self.lifecycle.db().remove_unknown(network_id, known).await?;
        self.lifecycle
            .on_deployments_pruned(network_id, &removed)
            .await?;
        Ok(removed.len())
    }
}

/// Parses a delete payload: the id, raw or as a JSON string.
///
/// # Errors
///
/// Returns an error if the payload is not UTF-8 or the id is empty.
pub fn parse_id_payload(payload: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(payload).map_err(|e| Error::InvalidInput(e.to_string()))?;
    let text = text.trim();
    let id = if text.starts_with('"') {
        serde_json::from_str::<String>(text)?
    } else {
        text.to_string()
    };
    if id.is_empty() {
        return Err(Error::InvalidId {
            message: "empty id in delete payload".into(),
        });
    }
    Ok(id)
}

/// Parses a known-ids payload: a JSON array of ids.
///
/// # Errors
///
/// Returns an error if the payload is not a JSON array of strings.
pub fn parse_known_payload(payload: &[u8]) -> Result<HashSet<String>> {
    let ids: Vec<String> = serde_json::from_slice(payload)?;
    Ok(ids.into_iter().collect())
}

/// Inbound state handler for every entity type.
pub struct StateSync<D> {
    lifecycle: Arc<PlaceholderLifecycle<D>>,
    routes: HashMap<EntityType, Box<dyn EntityRoute>>,
}

impl<D> std::fmt::Debug for StateSync<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entities: Vec<&str> = self.routes.keys().map(|e| e.as_str()).collect();
        entities.sort_unstable();
        f.debug_struct("StateSync")
            .field("routes", &entities)
            .finish_non_exhaustive()
    }
}

impl<D: Database + 'static> StateSync<D> {
    /// Creates the handler with one route per entity type.
    #[must_use]
    pub fn new(lifecycle: Arc<PlaceholderLifecycle<D>>) -> Self {
        let mut routes: HashMap<EntityType, Box<dyn EntityRoute>> = HashMap::new();
        routes.insert(
            EntityType::Deployment,
            Box::new(DeploymentRoute::new(Arc::clone(&lifecycle))),
        );
        routes.insert(
            EntityType::ProcessDefinition,
            Box::new(TypedRoute::<D, ProcessDefinition>::new(Arc::clone(&lifecycle))),
        );
        routes.insert(
            EntityType::ProcessInstance,
            Box::new(TypedRoute::<D, ProcessInstance>::new(Arc::clone(&lifecycle))),
        );
        routes.insert(
            EntityType::ProcessInstanceHistory,
            Box::new(TypedRoute::<D, HistoricProcessInstance>::new(Arc::clone(
                &lifecycle,
            ))),
        );
        routes.insert(
            EntityType::Incident,
            Box::new(TypedRoute::<D, Incident>::new(Arc::clone(&lifecycle))),
        );
        Self { lifecycle, routes }
    }

    /// Subscribes `handler` to every state topic on `broker`.
    ///
    /// # Errors
    ///
    /// Returns the first subscription failure.
    pub async fn subscribe_all(
        handler: Arc<Self>,
        broker: &dyn Broker,
        share_group: Option<&str>,
    ) -> Result<()> {
        for filter in all_state_filters(share_group) {
            broker
                .subscribe(&filter, Arc::clone(&handler) as Arc<dyn MessageHandler>)
                .await?;
        }
        tracing::info!(broker = broker.name(), share_group, "state topics subscribed");
        Ok(())
    }

    /// Applies one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic or payload is malformed or a catalog
    /// operation fails.
    pub async fn apply(&self, message: &InboundMessage) -> Result<()> {
        let topic = StateTopic::parse(&message.topic)?;
        let span = network_span(topic.kind.as_str(), &topic.network_id);
        self.apply_topic(&topic, &message.payload).instrument(span).await
    }

    async fn apply_topic(&self, topic: &StateTopic, payload: &[u8]) -> Result<()> {
        let network_id = topic.network_id.as_str();
        self.touch(network_id).await;

        let route = self.routes.get(&topic.entity).ok_or_else(|| Error::Internal {
            message: format!("no route for {}", topic.entity),
        })?;

        match topic.kind {
            StateKind::Upsert => route.upsert(network_id, payload).await?,
            StateKind::Delete => {
                let id = parse_id_payload(payload)?;
                let removed = route.delete(network_id, &id).await?;
                tracing::debug!(network_id, entity = %topic.entity, id = %id, removed, "delete applied");
            }
            StateKind::Known => {
                let known = parse_known_payload(payload)?;
                let removed = route.known(network_id, &known).await?;
                record_sync_pruned(topic.entity.as_str(), removed);
                if removed > 0 {
                    tracing::info!(network_id, entity = %topic.entity, removed, known = known.len(), "pruned unknown records");
                }
            }
        }
        record_sync_message(topic.entity.as_str(), topic.kind.as_str());
        Ok(())
    }

    async fn touch(&self, network_id: &str) {
        let contact = LastNetworkContact {
            network_id: network_id.to_string(),
            time: Utc::now(),
        };
        if let Err(e) = self.lifecycle.db().save(&contact).await {
            tracing::warn!(network_id, error = %e, "failed to record network contact");
        }
    }
}

fn drop_reason(error: &Error) -> &'static str {
    match error {
        Error::InvalidTopic { .. } => "malformed_topic",
        Error::Serialization { .. } | Error::InvalidId { .. } | Error::InvalidInput(_) => {
            "malformed_payload"
        }
        Error::Storage { .. } => "storage",
        _ => "other",
    }
}

#[async_trait]
impl<D: Database + 'static> MessageHandler for StateSync<D> {
    async fn handle(&self, message: InboundMessage) {
        let span = tracing::debug_span!("state_message", topic = %message.topic);
        if let Err(e) = self.apply(&message).instrument(span).await {
            let reason = drop_reason(&e);
            record_sync_dropped(reason);
            tracing::warn!(topic = %message.topic, reason, error = %e, "state message dropped");
        }
    }
}
