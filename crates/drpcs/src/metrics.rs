//! Prometheus metrics plus `/health` and `/ready` probes on a side listener.

use axum::extract::State;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Serialize)]
struct Probe {
    status: &'static str,
    ready: bool,
}

/// Readiness flag shared between the server and the probe endpoints.
///
/// Starts ready; the binary flips it off once shutdown begins so load
/// balancers stop routing new upgrades.
#[derive(Clone, Default)]
pub struct HealthState {
    draining: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a ready health state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set readiness.
    pub fn set_ready(&self, ready: bool) {
        self.draining.store(!ready, Ordering::Relaxed);
    }

    /// Whether new connections should be routed here.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.draining.load(Ordering::Relaxed)
    }
}

/// Installs the global Prometheus recorder and serves it on `addr`.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or binding fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    health_state: HealthState,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let app = Router::new()
        .route("/metrics", get(render))
        .with_state(handle)
        .merge(
            Router::new()
                .route(
                    "/health",
                    get(|| async {
                        Json(Probe {
                            status: "healthy",
                            ready: true,
                        })
                    }),
                )
                .route("/ready", get(readiness))
                .with_state(health_state),
        );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// 200 while ready, 503 while draining.
async fn readiness(State(state): State<HealthState>) -> (StatusCode, Json<Probe>) {
    let ready = state.is_ready();
    let (code, status) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    };
    (code, Json(Probe { status, ready }))
}

/// Connection count gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("drpc_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("drpc_connections_active").decrement(1.0);
    }

    /// Set the active subscriptions gauge for the whole process.
    pub fn subscriptions_active(count: usize) {
        metrics::gauge!("drpc_subscriptions_active").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Increment the inbound-messages counter for the given message kind.
    pub fn messages_received_total(kind: &'static str) {
        metrics::counter!("drpc_messages_received_total", "type" => kind).increment(1);
    }

    /// Record a connection close with the given reason label.
    pub fn connections_closed_total(reason: &'static str) {
        metrics::counter!("drpc_connections_closed_total", "reason" => reason).increment(1);
    }

    /// Record a refused connection attempt with the given reason label.
    pub fn connections_rejected_total(reason: &'static str) {
        metrics::counter!("drpc_connections_rejected_total", "reason" => reason).increment(1);
    }

    /// Increment the coalesced delta messages counter.
    pub fn deltas_sent_total() {
        metrics::counter!("drpc_deltas_sent_total").increment(1);
    }

    /// Record a mutation outcome (`success`, `error`).
    pub fn mutations_total(outcome: &'static str) {
        metrics::counter!("drpc_mutations_total", "outcome" => outcome).increment(1);
    }

    /// Record bytes sent to clients.
    pub fn payload_bytes_out_total(bytes: u64) {
        metrics::counter!("drpc_payload_bytes_total", "direction" => "out").increment(bytes);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record a stream or mutation endpoint latency in seconds.
    pub fn endpoint_latency_seconds(kind: &'static str, value: f64) {
        metrics::histogram!("drpc_endpoint_latency_seconds", "kind" => kind).record(value);
    }
}
