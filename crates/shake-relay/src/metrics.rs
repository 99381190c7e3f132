use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// # Errors
///
/// Returns an error if installing the recorder or binding the HTTP server fails.
pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check handler - returns 200 while the process is up.
async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// Event counters.
pub mod counters {
    /// Record an accepted connection by outcome (`authorized`, `rejected`, `failed`).
    pub fn connections_total(outcome: &'static str) {
        metrics::counter!("shake_relay_connections_total", "outcome" => outcome).increment(1);
    }

    /// Record a decoded message by action label.
    pub fn messages_total(action: &'static str) {
        metrics::counter!("shake_relay_messages_total", "action" => action).increment(1);
    }

    /// Record a message dropped before dispatch, by reason.
    pub fn messages_dropped_total(reason: &'static str) {
        metrics::counter!("shake_relay_messages_dropped_total", "reason" => reason).increment(1);
    }

    /// Increment the suppressed-alarms counter.
    pub fn alarms_suppressed_total() {
        metrics::counter!("shake_relay_alarms_suppressed_total").increment(1);
    }

    /// Increment the zone-definitions counter.
    pub fn zones_defined_total() {
        metrics::counter!("shake_relay_zones_defined_total").increment(1);
    }

    /// Record a downstream send by topic and status (`sent` or `failed`).
    pub fn forwards_total(topic: &'static str, status: &'static str) {
        metrics::counter!("shake_relay_forwards_total", "topic" => topic, "status" => status)
            .increment(1);
    }
}
