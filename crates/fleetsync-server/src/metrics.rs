//! Prometheus export of the fleetsync metrics.

use std::sync::OnceLock;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use fleetsync_core::metrics::names;
use fleetsync_core::{Error, Result};

use crate::server::AppState;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global Prometheus recorder and describes every metric.
///
/// Safe to call multiple times; later calls return the first handle.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Configuration(format!("failed to install prometheus recorder: {e}")))?;
    describe_metrics();

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

fn describe_metrics() {
    describe_counter!(
        names::WARDEN_ACTIONS_TOTAL,
        "Corrective actions issued by the reconciliation engine"
    );
    describe_counter!(
        names::WARDEN_ERRORS_TOTAL,
        "Engine item checks that failed"
    );
    describe_histogram!(
        names::WARDEN_TICK_SECONDS,
        "Duration of one reconciliation tick in seconds"
    );
    describe_counter!(
        names::SYNC_MESSAGES_TOTAL,
        "Inbound state messages applied to the catalog"
    );
    describe_counter!(names::SYNC_DROPPED_TOTAL, "Inbound state messages dropped");
    describe_counter!(
        names::SYNC_PRUNED_TOTAL,
        "Catalog records removed by known-ids messages"
    );
    describe_counter!(
        names::RESYNC_COMMANDS_TOTAL,
        "Commands resent by the periodic re-sync pass"
    );
    describe_counter!(
        names::EVENTS_PROCESSED_TOTAL,
        "Notification events handled"
    );
}

/// `GET /metrics`
pub async fn serve_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
