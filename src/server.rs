//! Wiring of one relay server instance.
//!
//! Everything here is plain constructor plumbing: build the stores,
//! coordinators, registries, and broker once at startup, then assemble
//! the axum router around them. Tests reuse the same assembly to run a
//! full in-process relay.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::coordination::{AcknowledgeCoordinator, ResponseCoordinator};
use crate::dispatch::hub::{hub_handler, HubState};
use crate::dispatch::{ConnectorRegistry, RequestCoordinator};
use crate::ingress::{relay_middleware, Interceptors, RelaySettings, RelayState};
use crate::protocol::OriginId;
use crate::store::FsBodyStore;
use crate::tenant::TenantRegistry;
use crate::transport::{ingestion_router, IngestionState, InMemoryBroker};

/// The long-lived pieces of one server instance.
pub struct RelayApp {
    pub origin_id: OriginId,
    pub store: FsBodyStore,
    pub broker: Arc<InMemoryBroker>,
    pub connectors: Arc<ConnectorRegistry>,
    pub responses: ResponseCoordinator,
    pub acknowledges: AcknowledgeCoordinator,
    pub requests: Arc<RequestCoordinator>,
    pub settings: RelaySettings,
}

impl RelayApp {
    pub fn new(store: FsBodyStore, settings: RelaySettings) -> Self {
        let origin_id = OriginId::new();
        let broker = Arc::new(InMemoryBroker::new());
        let connectors = Arc::new(ConnectorRegistry::new(settings.max_inline_body_bytes));
        let responses = ResponseCoordinator::new(store.clone());
        let acknowledges = AcknowledgeCoordinator::new();
        let requests = Arc::new(RequestCoordinator::new(
            Arc::clone(&connectors),
            acknowledges.clone(),
            store.clone(),
        ));

        Self {
            origin_id,
            store,
            broker,
            connectors,
            responses,
            acknowledges,
            requests,
            settings,
        }
    }

    /// Bind this origin's broker queues and start draining them into
    /// the coordinators.
    pub fn spawn_consumers(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let consumers = self.broker.bind_origin(self.origin_id);
        tokio::spawn(consumers.run(
            self.responses.clone(),
            self.acknowledges.clone(),
            shutdown,
        ))
    }

    /// Assemble the public router: relay middleware wrapping the hub,
    /// the ingestion return path, and a health probe.
    pub fn router(
        &self,
        tenants: Arc<dyn TenantRegistry>,
        interceptors: Arc<Interceptors>,
    ) -> Router {
        let relay_state = RelayState {
            origin_id: self.origin_id,
            tenants: Arc::clone(&tenants),
            requests: Arc::clone(&self.requests),
            responses: self.responses.clone(),
            store: self.store.clone(),
            interceptors,
            settings: self.settings.clone(),
        };
        let hub_state = HubState {
            connectors: Arc::clone(&self.connectors),
            tenants,
        };
        let ingestion_state = IngestionState {
            broker: self.broker.clone(),
            store: self.store.clone(),
        };

        let relay_api = Router::new()
            .route("/hub/{tenant_name}", get(hub_handler))
            .with_state(hub_state)
            .merge(ingestion_router(ingestion_state));

        Router::new()
            .nest("/_relay", relay_api)
            .route("/healthz", get(|| async { "ok" }))
            .fallback(|| async { (StatusCode::NOT_FOUND, "no such route") })
            .layer(middleware::from_fn_with_state(
                relay_state,
                relay_middleware,
            ))
            .layer(TraceLayer::new_for_http())
    }
}
