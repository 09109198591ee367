//! fleetsync service binary.
//!
//! Connects every configured MQTT broker, subscribes the state-sync handler
//! to the agents' state topics and runs the reconciliation engine and the
//! re-sync pass until interrupted.
//!
//! ## Endpoints
//!
//! - `GET /health` - Shallow liveness check (always 200)
//! - `GET /ready` - 200 once subscriptions and loops are running
//! - `GET /metrics` - Prometheus exposition
//!
//! See [`fleetsync_server::Config`] for the environment variables.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use fleetsync_catalog::InMemoryDatabase;
use fleetsync_core::observability::init_logging;
use fleetsync_server::{AppState, Config, metrics, router, serve};
use fleetsync_sync::transport::fanout::FanoutBroker;
use fleetsync_sync::transport::mqtt::{MqttBroker, MqttConfig};
use fleetsync_sync::{Broker, CommandPublisher, PlaceholderLifecycle, Resync, StateSync, WardenDelegate};
use fleetsync_warden::{CatalogWarden, catalog_engine};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_logging(config.log_format);

    let metrics_handle = metrics::init_metrics()?;

    tracing::info!(
        http_port = config.http_port,
        brokers = ?config.mqtt.brokers,
        share_group = ?config.mqtt.share_group,
        warden_interval_secs = config.warden.interval.as_secs(),
        resync_interval_secs = config.resync_interval.as_secs(),
        "Starting fleetsync"
    );

    let mut brokers = Vec::with_capacity(config.mqtt.brokers.len());
    for (index, endpoint) in config.mqtt.brokers.iter().enumerate() {
        let client_id = format!("{}-{index}", config.mqtt.client_id);
        let mut mqtt = MqttConfig::from_endpoint(endpoint, client_id)?;
        if let Some((user, password)) = &config.mqtt.credentials {
            mqtt = mqtt.with_credentials(user, password);
        }
        let broker = MqttBroker::connect(&mqtt)
            .await
            .with_context(|| format!("failed to connect to {endpoint}"))?;
        brokers.push(Arc::new(broker));
    }

    let outcome = run(&config, &brokers, AppState::new(metrics_handle)).await;

    for broker in &brokers {
        broker.shutdown().await;
    }

    tracing::info!("fleetsync stopped");
    outcome
}

async fn run(config: &Config, brokers: &[Arc<MqttBroker>], state: AppState) -> Result<()> {
    let fanout: Arc<dyn Broker> = Arc::new(FanoutBroker::new(
        brokers
            .iter()
            .map(|b| Arc::clone(b) as Arc<dyn Broker>)
            .collect(),
    )?);
    let commands = CommandPublisher::new(Arc::clone(&fanout));

    tracing::warn!("catalog is held in memory; state is rebuilt from agents after a restart");
    let db = Arc::new(InMemoryDatabase::new());

    let backend = Arc::new(CatalogWarden::new(
        Arc::clone(&db),
        commands.clone(),
        config.page_size,
    ));
    let engine = Arc::new(catalog_engine(backend, config.warden.clone()));
    let lifecycle = Arc::new(
        PlaceholderLifecycle::new(Arc::clone(&db), commands)
            .with_delegate(Arc::clone(&engine) as Arc<dyn WardenDelegate>),
    );

    let sync = Arc::new(StateSync::new(Arc::clone(&lifecycle)));
    StateSync::subscribe_all(sync, fanout.as_ref(), config.mqtt.share_group.as_deref()).await?;

    let cancel = CancellationToken::new();
    let warden_task = Arc::clone(&engine).start(cancel.child_token())?;
    let resync_task = Arc::new(Resync::new(lifecycle, config.page_size))
        .start(config.resync_interval, cancel.child_token());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(address = %addr, "Starting health server");
    let http_task = tokio::spawn(serve(listener, router(state.clone()), cancel.child_token()));

    state.mark_ready();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");
    cancel.cancel();

    if let Err(e) = warden_task.await {
        tracing::warn!(error = %e, "reconciliation task failed");
    }
    if let Err(e) = resync_task.await {
        tracing::warn!(error = %e, "re-sync task failed");
    }
    http_task.await.context("HTTP task failed")??;

    Ok(())
}
