//! Request delivery: connector selection plus acknowledgement setup.

use std::sync::Arc;

use uuid::Uuid;

use crate::coordination::{AckRegistration, AcknowledgeCoordinator};
use crate::error::TransportError;
use crate::observability::metrics;
use crate::protocol::{ConnectionId, RelayRequest, ServerFrame};
use crate::store::FsBodyStore;

/// Result of a successful dispatch.
#[derive(Debug)]
pub struct Delivery {
    pub connection_id: ConnectionId,
    /// Present when the request body was staged: keeps the acknowledge
    /// slot alive until the ingress worker is done with the request.
    pub ack_registration: Option<AckRegistration>,
}

/// Routes a relay request to one of the connectors currently
/// subscribed to its tenant.
pub struct RequestCoordinator {
    connectors: Arc<crate::dispatch::ConnectorRegistry>,
    acknowledges: AcknowledgeCoordinator,
    store: FsBodyStore,
}

impl RequestCoordinator {
    pub fn new(
        connectors: Arc<crate::dispatch::ConnectorRegistry>,
        acknowledges: AcknowledgeCoordinator,
        store: FsBodyStore,
    ) -> Self {
        Self {
            connectors,
            acknowledges,
            store,
        }
    }

    /// Deliver `request` to one subscribed connector.
    ///
    /// If the chosen connector drops between selection and transmit,
    /// one other connector is tried; a second failure surfaces as a
    /// transport error. Nothing is persisted, in-flight requests live
    /// only in memory.
    pub async fn deliver(&self, mut request: RelayRequest) -> Result<Delivery, TransportError> {
        let tenant = request.tenant_name.clone();
        let id = request.request_id;

        let ack_registration = if request.body.is_outsourced() {
            let acknowledge_id = Uuid::new_v4().to_string();
            request.acknowledge_id = Some(acknowledge_id);
            let store = self.store.clone();
            let registration = self
                .acknowledges
                .register(id, move |ack| {
                    metrics::ack_consumed();
                    tokio::spawn(async move {
                        store.delete_request_body(ack.request_id).await;
                    });
                })
                .map_err(|err| TransportError::Publish(err.to_string()))?;
            Some(registration)
        } else {
            None
        };

        let connector = self
            .connectors
            .select(&tenant)
            .ok_or_else(|| TransportError::NoConnector(tenant.clone()))?;

        let frame = ServerFrame::RequestTarget {
            request: request.clone(),
        };
        let connection_id = match connector.transmit(frame).await {
            Ok(()) => connector.connection_id().clone(),
            Err(TransportError::ChannelClosed) => {
                // The session died under us; drop it and try one other.
                self.connectors
                    .unsubscribe(connector.tenant(), connector.connection_id());
                let retry = self
                    .connectors
                    .select(&tenant)
                    .ok_or_else(|| TransportError::NoConnector(tenant.clone()))?;
                retry
                    .transmit(ServerFrame::RequestTarget { request })
                    .await?;
                retry.connection_id().clone()
            }
            Err(other) => return Err(other),
        };

        tracing::debug!(
            request_id = %id,
            tenant = %tenant,
            connection_id = %connection_id,
            "request dispatched"
        );
        metrics::request_dispatched(&tenant);

        Ok(Delivery {
            connection_id,
            ack_registration,
        })
    }

    /// See [`crate::dispatch::ConnectorRegistry::binary_size_threshold`].
    pub fn binary_size_threshold(&self, tenant: &str) -> u64 {
        self.connectors.binary_size_threshold(tenant)
    }
}
