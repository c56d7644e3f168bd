//! Metrics collection and exposition.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize the Prometheus exporter and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus recorder");

    tracing::info!("Metrics server listening on http://{}", addr);
}

/// Record one relayed request from ingress to response written.
pub fn request_completed(tenant: &str, method: &str, status: u16, started: Instant) {
    let labels = [
        ("tenant", tenant.to_string()),
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];

    counter!("relay_requests_total", &labels).increment(1);
    histogram!("relay_request_duration_seconds", &labels).record(started.elapsed().as_secs_f64());
}

/// Record a request handed to a connector.
pub fn request_dispatched(tenant: &str) {
    counter!("relay_dispatched_total", "tenant" => tenant.to_string()).increment(1);
}

/// Record a body staged in the body store instead of travelling inline.
pub fn body_outsourced(direction: &'static str, bytes: u64) {
    counter!("relay_body_outsourced_total", "direction" => direction).increment(1);
    counter!("relay_body_outsourced_bytes_total", "direction" => direction).increment(bytes);
}

/// Update the live connector count for a tenant.
pub fn connector_count(tenant: &str, count: f64) {
    gauge!("relay_connectors_active", "tenant" => tenant.to_string()).set(count);
}

/// Record an acknowledgement consumed by its registered callback.
pub fn ack_consumed() {
    counter!("relay_acks_total", "kind" => "consumed").increment(1);
}

/// Record an acknowledgement sent by the connector side.
pub fn ack_sent() {
    counter!("relay_acks_total", "kind" => "sent").increment(1);
}
