//! Prometheus metrics endpoint for the Hayloft services.
//!
//! Installs the global `metrics` recorder and serves the rendered snapshot at
//! `GET /metrics`. Any service binary can opt in with `--metrics-listen`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;

/// Error type for metrics installation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The global metrics recorder has already been installed.
    #[error("metrics recorder already installed")]
    AlreadyInstalled,
}

/// Cheaply cloneable handle to the installed Prometheus recorder.
#[derive(Clone, Debug)]
pub struct MetricsHandle {
    inner: Arc<PrometheusHandle>,
}

impl MetricsHandle {
    /// Render the current metrics snapshot in Prometheus text format.
    pub fn render(&self) -> String {
        self.inner.render()
    }
}

// The OnceLock makes double-install an Err instead of the panic some versions
// of the exporter produce.
static RECORDER_HANDLE: std::sync::OnceLock<MetricsHandle> = std::sync::OnceLock::new();

/// Install the global Prometheus metrics recorder.
///
/// Call once at startup, before any `metrics` macros fire.
///
/// # Errors
///
/// Returns [`MetricsError::AlreadyInstalled`] on a second call in the same
/// process.
pub fn install_recorder() -> Result<MetricsHandle, MetricsError> {
    let mut first = false;
    let handle = RECORDER_HANDLE.get_or_init(|| {
        first = true;
        let prom_handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("first recorder install should succeed");
        MetricsHandle {
            inner: Arc::new(prom_handle),
        }
    });

    if first {
        Ok(handle.clone())
    } else {
        Err(MetricsError::AlreadyInstalled)
    }
}

/// Spawn an HTTP server answering `GET /metrics` on `addr`.
///
/// Bind failures are logged and the task resolves immediately; metrics are an
/// observation surface and never take a service down.
pub fn serve_metrics(handle: MetricsHandle, addr: SocketAddr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(%addr, error = %e, "failed to bind metrics listener");
                return;
            }
        };
        tracing::info!(%addr, "metrics listening");

        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server error");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_reports_already_installed() {
        // First call wins; every later call (including ones from other tests
        // in this process) gets AlreadyInstalled.
        let first = install_recorder();
        let second = install_recorder();
        assert!(first.is_ok() || matches!(first, Err(MetricsError::AlreadyInstalled)));
        assert!(matches!(second, Err(MetricsError::AlreadyInstalled)));
    }

    #[tokio::test]
    async fn rendered_snapshot_contains_registered_counters() {
        let handle = match install_recorder() {
            Ok(handle) => handle,
            Err(_) => RECORDER_HANDLE.get().expect("recorder installed").clone(),
        };

        metrics::counter!("hayloft_test_counter_total").increment(3);
        let snapshot = handle.render();
        assert!(
            snapshot.contains("hayloft_test_counter_total"),
            "counter missing from snapshot: {snapshot}"
        );
    }
}
