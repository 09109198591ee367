//! MQTT broker connection.
//!
//! [`MqttBroker::connect`] waits for the broker's `CONNACK` before returning,
//! so an unreachable broker is a startup failure. After that a background
//! task drives the event loop: it forwards inbound publishes to a delivery
//! task and re-subscribes every filter when a reconnect loses the session.
//! The event loop never awaits a handler or a full request queue, so
//! handlers may publish without stalling the connection.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fleetsync_core::{Error, Result};

use super::{Broker, InboundMessage, MessageHandler, topic_matches};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 64;

/// Connection settings for one MQTT broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// MQTT client id.
    pub client_id: String,
    /// Optional username and password.
    pub credentials: Option<(String, String)>,
    /// Keep-alive interval.
    pub keep_alive: Duration,
}

impl MqttConfig {
    /// Creates a config with a 30 second keep-alive and no credentials.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
        }
    }

    /// Parses a `host:port` endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the endpoint has no valid port.
    pub fn from_endpoint(endpoint: &str, client_id: impl Into<String>) -> Result<Self> {
        let (host, port) = endpoint
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::Configuration(format!("broker '{endpoint}' has no port")))?;
        if host.is_empty() {
            return Err(Error::Configuration(format!("broker '{endpoint}' has no host")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::Configuration(format!("broker '{endpoint}' port: {e}")))?;
        Ok(Self::new(host, port, client_id))
    }

    /// Sets username and password.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(false);
        if let Some((user, password)) = &self.credentials {
            options.set_credentials(user, password);
        }
        options
    }
}

struct Subscription {
    filter: String,
    handler: Arc<dyn MessageHandler>,
}

type Subscriptions = Arc<RwLock<Vec<Subscription>>>;

/// Converts a lock poison error to a transport error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::transport("subscription lock poisoned")
}

/// A live connection to one MQTT broker.
pub struct MqttBroker {
    name: String,
    client: AsyncClient,
    subscriptions: Subscriptions,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for MqttBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBroker")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl MqttBroker {
    /// Connects to the broker and starts the event loop task.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the broker does not acknowledge the
    /// connection within ten seconds.
    pub async fn connect(config: &MqttConfig) -> Result<Self> {
        let name = config.endpoint();
        let (client, mut event_loop) = AsyncClient::new(config.options(), REQUEST_CAPACITY);

        tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| Error::transport(format!("{name}: no CONNACK within {CONNECT_TIMEOUT:?}")))?
            .map_err(|e| Error::transport(format!("{name}: {e}")))?;
        tracing::info!(broker = %name, client_id = %config.client_id, "connected to MQTT broker");

        let subscriptions: Subscriptions = Arc::default();
        let cancel = CancellationToken::new();
        let (inbound, deliveries) = mpsc::unbounded_channel();
        let delivery = tokio::spawn(deliver(name.clone(), Arc::clone(&subscriptions), deliveries));
        let driver = tokio::spawn(drive(
            name.clone(),
            client.clone(),
            event_loop,
            Arc::clone(&subscriptions),
            inbound,
            cancel.clone(),
        ));

        Ok(Self {
            name,
            client,
            subscriptions,
            cancel,
            tasks: Mutex::new(vec![driver, delivery]),
        })
    }

    /// Disconnects, drops every subscription and stops the background tasks.
    ///
    /// Later calls only repeat the disconnect.
    pub async fn shutdown(&self) {
        match self.subscriptions.write() {
            Ok(mut subs) => subs.clear(),
            Err(_) => tracing::warn!(broker = %self.name, "subscription lock poisoned at shutdown"),
        }
        if let Err(e) = self.client.disconnect().await {
            tracing::warn!(broker = %self.name, error = %e, "MQTT disconnect failed");
        }
        self.cancel.cancel();
        let tasks = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(broker = %self.name, error = %e, "MQTT background task failed");
            }
        }
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> std::result::Result<(), rumqttc::ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = event_loop.poll().await? {
            return Ok(());
        }
    }
}

async fn drive(
    name: String,
    client: AsyncClient,
    mut event_loop: EventLoop,
    subscriptions: Subscriptions,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage::new(publish.topic, publish.payload);
                if inbound.send(message).is_err() {
                    tracing::error!(broker = %name, "delivery task gone, dropping message");
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                tracing::info!(broker = %name, session_present = ack.session_present, "MQTT reconnected");
                if !ack.session_present {
                    resubscribe(&name, &client, &subscriptions);
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(broker = %name, error = %e, "MQTT connection error, reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
    tracing::info!(broker = %name, "MQTT event loop stopped");
}

/// Hands inbound messages to their handlers one at a time, in arrival order.
///
/// Ends once the event loop drops its sender.
async fn deliver(
    name: String,
    subscriptions: Subscriptions,
    mut deliveries: mpsc::UnboundedReceiver<InboundMessage>,
) {
    while let Some(message) = deliveries.recv().await {
        dispatch(&name, &subscriptions, message).await;
    }
}

async fn dispatch(name: &str, subscriptions: &Subscriptions, message: InboundMessage) {
    let handlers: Vec<Arc<dyn MessageHandler>> = match subscriptions.read() {
        Ok(subs) => subs
            .iter()
            .filter(|s| topic_matches(&s.filter, &message.topic))
            .map(|s| Arc::clone(&s.handler))
            .collect(),
        Err(_) => {
            tracing::error!(broker = %name, "subscription lock poisoned, dropping message");
            return;
        }
    };

    if handlers.is_empty() {
        tracing::debug!(broker = %name, topic = %message.topic, "no handler for message");
    }
    for handler in handlers {
        handler.handle(message.clone()).await;
    }
}

/// Queues a subscribe for every filter without waiting for request capacity.
/// A filter that does not fit is logged and picked up again on the next reconnect.
fn resubscribe(name: &str, client: &AsyncClient, subscriptions: &Subscriptions) {
    let filters: Vec<String> = match subscriptions.read() {
        Ok(subs) => subs.iter().map(|s| s.filter.clone()).collect(),
        Err(_) => return,
    };
    for filter in filters {
        if let Err(e) = client.try_subscribe(&filter, QoS::ExactlyOnce) {
            tracing::warn!(broker = %name, filter = %filter, error = %e, "MQTT resubscribe failed");
        }
    }
}

#[async_trait]
impl Broker for MqttBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(topic, QoS::ExactlyOnce, false, payload.to_vec())
            .await
            .map_err(|e| Error::transport(format!("{}: publish to {topic}: {e}", self.name)))
    }

    async fn subscribe(&self, filter: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.subscriptions
            .write()
            .map_err(poison_err)?
            .push(Subscription {
                filter: filter.to_string(),
                handler,
            });
        self.client
            .subscribe(filter, QoS::ExactlyOnce)
            .await
            .map_err(|e| Error::transport(format!("{}: subscribe to {filter}: {e}", self.name)))?;
        tracing::debug!(broker = %self.name, filter, "subscribed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoints() {
        let config = MqttConfig::from_endpoint("broker.local:1883", "fleetsync-0").unwrap();
        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 1883);
        assert_eq!(config.endpoint(), "broker.local:1883");

        assert!(MqttConfig::from_endpoint("broker.local", "c").is_err());
        assert!(MqttConfig::from_endpoint(":1883", "c").is_err());
        assert!(MqttConfig::from_endpoint("broker.local:http", "c").is_err());
    }

    #[test]
    fn credentials_are_optional() {
        let config = MqttConfig::new("h", 1883, "c").with_credentials("user", "secret");
        assert_eq!(config.credentials, Some(("user".into(), "secret".into())));
    }

    struct Gated {
        gate: Arc<tokio::sync::Semaphore>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MessageHandler for Gated {
        async fn handle(&self, message: InboundMessage) {
            let _permit = self.gate.acquire().await.unwrap();
            self.seen.lock().unwrap().push(message.topic);
        }
    }

    fn subscribed(filter: &str, handler: Arc<dyn MessageHandler>) -> Subscriptions {
        Arc::new(RwLock::new(vec![Subscription {
            filter: filter.to_string(),
            handler,
        }]))
    }

    #[tokio::test]
    async fn blocked_handler_does_not_hold_up_inbound_messages() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(Gated {
            gate: Arc::clone(&gate),
            seen: Arc::clone(&seen),
        });
        let (inbound, deliveries) = mpsc::unbounded_channel();
        let task = tokio::spawn(deliver("test".into(), subscribed("n1/#", handler), deliveries));

        for topic in ["n1/a", "n1/b", "n1/c"] {
            inbound.send(InboundMessage::new(topic, Bytes::new())).unwrap();
        }
        tokio::task::yield_now().await;
        assert!(seen.lock().unwrap().is_empty());

        gate.add_permits(3);
        drop(inbound);
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["n1/a", "n1/b", "n1/c"]);
    }

    #[tokio::test]
    async fn resubscribe_returns_when_the_request_queue_is_full() {
        let (client, _event_loop) = AsyncClient::new(MqttConfig::new("localhost", 1883, "c").options(), 1);
        client.try_publish("n1/x", QoS::AtMostOnce, false, Vec::new()).unwrap();
        let handler = Arc::new(Gated {
            gate: Arc::new(tokio::sync::Semaphore::new(0)),
            seen: Arc::default(),
        });
        let subscriptions = subscribed("n1/#", handler);
        subscriptions.write().unwrap().push(Subscription {
            filter: "n2/#".into(),
            handler: Arc::new(Gated {
                gate: Arc::new(tokio::sync::Semaphore::new(0)),
                seen: Arc::default(),
            }),
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            resubscribe("test", &client, &subscriptions);
        })
        .await
        .unwrap();
        assert!(client.try_subscribe("n3/#", QoS::AtMostOnce).is_err());
    }
}
