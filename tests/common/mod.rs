//! Shared utilities for integration testing: a full in-process relay
//! (server, broker consumers, body store) plus connector helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

use backhaul::connector::{
    ConnectionEvents, ConnectorConnection, ConnectorOptions, HttpOutbound, TargetError,
    TargetHandler,
};
use backhaul::coordination::{AcknowledgeCoordinator, ResponseCoordinator};
use backhaul::ingress::{Interceptors, RelaySettings};
use backhaul::protocol::{BodyContent, ConnectionId, RelayRequest, TargetResponse, TenantConfig, TenantId};
use backhaul::store::FsBodyStore;
use backhaul::tenant::{InMemoryTenantRegistry, Tenant};
use backhaul::RelayApp;

/// One in-process relay server bound to a local port.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub base_url: Url,
    pub responses: ResponseCoordinator,
    pub acknowledges: AcknowledgeCoordinator,
    store_root: PathBuf,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    consumers: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

pub async fn start_relay(
    tenants: &[(&str, TenantConfig)],
    settings: RelaySettings,
    interceptors: Interceptors,
) -> TestRelay {
    start_relay_at(None, tenants, settings, interceptors).await
}

/// Start a relay, optionally on a fixed address (for restart tests).
pub async fn start_relay_at(
    addr: Option<SocketAddr>,
    tenants: &[(&str, TenantConfig)],
    settings: RelaySettings,
    interceptors: Interceptors,
) -> TestRelay {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBodyStore::open(dir.path()).await.unwrap();
    let app = RelayApp::new(store, settings);

    let shutdown = CancellationToken::new();
    let consumers = app.spawn_consumers(shutdown.clone());

    let registry = Arc::new(InMemoryTenantRegistry::new(tenants.iter().map(
        |(name, config)| Tenant {
            id: TenantId::new(),
            name: name.to_string(),
            config: config.clone(),
        },
    )));

    let responses = app.responses.clone();
    let acknowledges = app.acknowledges.clone();
    let router = app.router(registry, Arc::new(interceptors));

    let bind = addr.unwrap_or_else(|| "127.0.0.1:0".parse().unwrap());
    let listener = TcpListener::bind(bind).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestRelay {
        addr,
        base_url: Url::parse(&format!("http://{addr}/")).unwrap(),
        responses,
        acknowledges,
        store_root: dir.path().to_path_buf(),
        shutdown,
        server,
        consumers,
        _dir: dir,
    }
}

impl TestRelay {
    /// Kill the server abruptly, as a crash would.
    pub async fn stop(self) {
        self.server.abort();
        let _ = self.server.await;
        self.shutdown.cancel();
        let _ = self.consumers.await;
    }

    pub fn staged_request_bodies(&self) -> usize {
        std::fs::read_dir(self.store_root.join("request"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn staged_response_bodies(&self) -> usize {
        std::fs::read_dir(self.store_root.join("response"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Start a connector serving `tenant` against an in-process relay.
pub async fn start_connector(
    base_url: &Url,
    tenant: &str,
    handler: Arc<dyn TargetHandler>,
    binary_size_limit: Option<u64>,
) -> ConnectorConnection {
    let options = ConnectorOptions {
        server_url: base_url.clone(),
        tenant: tenant.to_string(),
        connector_name: "test-connector".to_string(),
        binary_size_limit,
    };
    let outbound = Arc::new(HttpOutbound::new(base_url.clone()));
    let connection = ConnectorConnection::new(options, handler, outbound);
    connection.start().await.unwrap();
    connection
}

/// Answers `/ping` with `pong` and echoes the request body elsewhere.
pub struct EchoTarget;

#[async_trait]
impl TargetHandler for EchoTarget {
    async fn handle(&self, request: &RelayRequest) -> Result<TargetResponse, TargetError> {
        let body = match request.path.as_str() {
            "/ping" => bytes::Bytes::from_static(b"pong"),
            _ => request.body.as_inline().cloned().unwrap_or_default(),
        };
        Ok(TargetResponse {
            request_id: request.request_id,
            origin_id: request.origin_id,
            status: 200,
            headers: vec![("content-type".into(), "application/octet-stream".into())],
            body_size: body.len() as u64,
            body: BodyContent::inline(body),
            failed: false,
            expired: false,
            error_message: None,
        })
    }
}

/// Sleeps before answering; for expiration tests.
pub struct SlowTarget(pub Duration);

#[async_trait]
impl TargetHandler for SlowTarget {
    async fn handle(&self, request: &RelayRequest) -> Result<TargetResponse, TargetError> {
        tokio::time::sleep(self.0).await;
        EchoTarget.handle(request).await
    }
}

/// Records every request it sees, then echoes.
#[derive(Default)]
pub struct RecordingTarget {
    pub seen: Arc<Mutex<Vec<RelayRequest>>>,
}

#[async_trait]
impl TargetHandler for RecordingTarget {
    async fn handle(&self, request: &RelayRequest) -> Result<TargetResponse, TargetError> {
        self.seen.lock().unwrap().push(request.clone());
        EchoTarget.handle(request).await
    }
}

/// Collects connection lifecycle events as strings.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, kind: &str, id: Option<&ConnectionId>) {
        let id = id.map(|c| c.as_str().to_string()).unwrap_or_default();
        self.events.lock().unwrap().push(format!("{kind}:{id}"));
    }
}

#[async_trait]
impl ConnectionEvents for EventLog {
    async fn connected(&self, connection_id: &ConnectionId) {
        self.push("connected", Some(connection_id));
    }

    async fn reconnecting(&self, connection_id: Option<&ConnectionId>) {
        self.push("reconnecting", connection_id);
    }

    async fn reconnected(&self, connection_id: &ConnectionId) {
        self.push("reconnected", Some(connection_id));
    }

    async fn disconnected(&self, connection_id: Option<&ConnectionId>) {
        self.push("disconnected", connection_id);
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Tenant config with fast reconnects, so tests stay quick.
pub fn fast_tenant_config() -> TenantConfig {
    TenantConfig {
        keep_alive_interval_ms: Some(1_000),
        reconnect_minimum_delay_ms: Some(50),
        reconnect_maximum_delay_ms: Some(200),
        enable_tracing: None,
    }
}
