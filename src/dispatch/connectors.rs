//! Per-tenant connector bookkeeping and round-robin selection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::observability::metrics;
use crate::protocol::{ConnectionId, ServerFrame};

/// Outbound half of one hub session.
#[derive(Debug)]
pub struct ConnectorHandle {
    connection_id: ConnectionId,
    tenant: String,
    binary_size_limit: Option<u64>,
    sender: mpsc::Sender<ServerFrame>,
}

impl ConnectorHandle {
    pub fn new(
        connection_id: ConnectionId,
        tenant: impl Into<String>,
        binary_size_limit: Option<u64>,
        sender: mpsc::Sender<ServerFrame>,
    ) -> Self {
        Self {
            connection_id,
            tenant: tenant.into(),
            binary_size_limit,
            sender,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn binary_size_limit(&self) -> Option<u64> {
        self.binary_size_limit
    }

    /// Push a frame down this session.
    pub async fn transmit(&self, frame: ServerFrame) -> Result<(), TransportError> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

#[derive(Debug, Default)]
struct TenantConnectors {
    cursor: AtomicUsize,
    connectors: RwLock<Vec<Arc<ConnectorHandle>>>,
}

/// Which connectors are currently subscribed for each tenant.
#[derive(Debug)]
pub struct ConnectorRegistry {
    tenants: DashMap<String, Arc<TenantConnectors>>,
    default_binary_threshold: u64,
}

impl ConnectorRegistry {
    pub fn new(default_binary_threshold: u64) -> Self {
        Self {
            tenants: DashMap::new(),
            default_binary_threshold,
        }
    }

    /// Register a live hub session for `tenant`.
    pub fn subscribe(&self, tenant: &str, handle: ConnectorHandle) -> Arc<ConnectorHandle> {
        let key = tenant.to_ascii_lowercase();
        let handle = Arc::new(handle);
        let slot = self.tenants.entry(key).or_default().clone();
        slot.connectors
            .write()
            .expect("connector list lock poisoned")
            .push(Arc::clone(&handle));
        metrics::connector_count(tenant, self.subscribed_count(tenant) as f64);
        handle
    }

    /// Drop a hub session, e.g. because the socket closed.
    pub fn unsubscribe(&self, tenant: &str, connection_id: &ConnectionId) {
        let key = tenant.to_ascii_lowercase();
        if let Some(slot) = self.tenants.get(&key) {
            slot.connectors
                .write()
                .expect("connector list lock poisoned")
                .retain(|c| c.connection_id() != connection_id);
        }
        metrics::connector_count(tenant, self.subscribed_count(tenant) as f64);
    }

    /// Pick the next connector for `tenant`, round-robin.
    pub fn select(&self, tenant: &str) -> Option<Arc<ConnectorHandle>> {
        let key = tenant.to_ascii_lowercase();
        let slot = self.tenants.get(&key)?;
        let connectors = slot
            .connectors
            .read()
            .expect("connector list lock poisoned");
        if connectors.is_empty() {
            return None;
        }
        let index = slot.cursor.fetch_add(1, Ordering::Relaxed) % connectors.len();
        Some(Arc::clone(&connectors[index]))
    }

    pub fn subscribed_count(&self, tenant: &str) -> usize {
        let key = tenant.to_ascii_lowercase();
        self.tenants
            .get(&key)
            .map(|slot| {
                slot.connectors
                    .read()
                    .expect("connector list lock poisoned")
                    .len()
            })
            .unwrap_or(0)
    }

    /// Largest body that may travel inline to this tenant right now:
    /// the smallest limit advertised by any subscribed connector,
    /// bounded by the server-wide default.
    pub fn binary_size_threshold(&self, tenant: &str) -> u64 {
        let key = tenant.to_ascii_lowercase();
        let advertised = self.tenants.get(&key).and_then(|slot| {
            slot.connectors
                .read()
                .expect("connector list lock poisoned")
                .iter()
                .filter_map(|c| c.binary_size_limit())
                .min()
        });
        match advertised {
            Some(limit) => limit.min(self.default_binary_threshold),
            None => self.default_binary_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str, limit: Option<u64>) -> (ConnectorHandle, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(4);
        (
            ConnectorHandle::new(ConnectionId::from(id.to_string()), "t1", limit, tx),
            rx,
        )
    }

    #[test]
    fn round_robin_cycles_through_connectors() {
        let registry = ConnectorRegistry::new(1024);
        let (a, _rx_a) = handle("a", None);
        let (b, _rx_b) = handle("b", None);
        registry.subscribe("t1", a);
        registry.subscribe("t1", b);

        let picks: Vec<String> = (0..4)
            .map(|_| registry.select("t1").unwrap().connection_id().to_string())
            .collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn select_on_empty_tenant_is_none() {
        let registry = ConnectorRegistry::new(1024);
        assert!(registry.select("t1").is_none());

        let (a, _rx) = handle("a", None);
        registry.subscribe("t1", a);
        registry.unsubscribe("t1", &ConnectionId::from("a".to_string()));
        assert!(registry.select("t1").is_none());
    }

    #[test]
    fn threshold_is_min_of_advertised_and_default() {
        let registry = ConnectorRegistry::new(1024);
        assert_eq!(registry.binary_size_threshold("t1"), 1024);

        let (a, _rx_a) = handle("a", Some(4096));
        registry.subscribe("t1", a);
        assert_eq!(registry.binary_size_threshold("t1"), 1024);

        let (b, _rx_b) = handle("b", Some(512));
        registry.subscribe("t1", b);
        assert_eq!(registry.binary_size_threshold("t1"), 512);
    }

    #[test]
    fn tenant_names_are_case_insensitive() {
        let registry = ConnectorRegistry::new(1024);
        let (a, _rx) = handle("a", None);
        registry.subscribe("T1", a);
        assert_eq!(registry.subscribed_count("t1"), 1);
        assert!(registry.select("t1").is_some());
    }
}
