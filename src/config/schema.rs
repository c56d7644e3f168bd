//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! relay server. All types derive Serde traits for deserialization
//! from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ingress::RelaySettings;
use crate::protocol::TenantConfig;

/// Root configuration for the relay server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Relay pipeline tunables.
    pub relay: RelaySection,

    /// Tenants this server routes for.
    pub tenants: Vec<TenantEntry>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl RelayConfig {
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            request_expiration: self
                .relay
                .request_expiration_secs
                .map(Duration::from_secs),
            max_inline_body_bytes: self.relay.max_inline_body_bytes,
            spool_memory_limit: self.relay.spool_memory_limit_bytes,
        }
    }
}

/// Edge listener configuration.
///
/// One listener serves everything: tenant traffic, the connector hub
/// upgrade, and the `/_relay` return path.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// `host:port` the edge binds.
    pub bind_address: String,

    /// Cap on concurrently served connections. Hub sessions count too,
    /// so size this above the expected connector population.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Relay pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelaySection {
    /// Deadline for a relayed call in seconds; unset disables it.
    pub request_expiration_secs: Option<u64>,

    /// Largest body delivered inline with the envelope.
    pub max_inline_body_bytes: u64,

    /// Bytes the ingress spool buffers in memory before spilling.
    pub spool_memory_limit_bytes: usize,

    /// Root directory of the body store.
    pub body_store_path: String,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            request_expiration_secs: Some(30),
            max_inline_body_bytes: 1024 * 1024,
            spool_memory_limit_bytes: 256 * 1024,
            body_store_path: "./body-store".to_string(),
        }
    }
}

/// One tenant and its connection policy overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TenantEntry {
    /// Tenant name; the first path segment of its public URLs.
    pub name: String,

    /// Keep-alive interval pushed to connectors, in milliseconds.
    #[serde(default)]
    pub keep_alive_interval_ms: Option<u64>,

    /// Lower bound of the reconnect backoff, in milliseconds.
    #[serde(default)]
    pub reconnect_minimum_delay_ms: Option<u64>,

    /// Upper bound of the reconnect backoff, in milliseconds.
    #[serde(default)]
    pub reconnect_maximum_delay_ms: Option<u64>,

    /// Force tracing for every request of this tenant.
    #[serde(default)]
    pub enable_tracing: Option<bool>,
}

impl TenantEntry {
    pub fn tenant_config(&self) -> TenantConfig {
        TenantConfig {
            keep_alive_interval_ms: self.keep_alive_interval_ms,
            reconnect_minimum_delay_ms: self.reconnect_minimum_delay_ms,
            reconnect_maximum_delay_ms: self.reconnect_maximum_delay_ms,
            enable_tracing: self.enable_tracing,
        }
    }
}

/// Logging and metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing filter used when `RUST_LOG` is not set. Accepts any
    /// `EnvFilter` directive, e.g. `"info"` or `"backhaul=debug"`.
    pub log_level: String,

    /// Expose a Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// `host:port` the scrape endpoint binds. Kept off the public
    /// listener so it is never relayed.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "backhaul=info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
