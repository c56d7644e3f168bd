//! Server side of the connector hub.
//!
//! Connectors dial `GET /_relay/hub/{tenantName}` and upgrade to a
//! WebSocket. The first frame must be a `Hello`; the server answers
//! with `Accepted` (carrying the connection id) followed by the
//! tenant's `Configure`. After that the session only carries
//! server-to-connector frames; responses and acknowledgements travel
//! the broker return path instead.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;

use crate::dispatch::{ConnectorHandle, ConnectorRegistry};
use crate::protocol::{ConnectionId, ConnectorFrame, ServerFrame};
use crate::tenant::{Tenant, TenantRegistry};

/// How long a fresh socket may take to present its `Hello`.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound frames queued per session before the dispatcher blocks.
const SESSION_QUEUE_DEPTH: usize = 64;

#[derive(Clone)]
pub struct HubState {
    pub connectors: Arc<ConnectorRegistry>,
    pub tenants: Arc<dyn TenantRegistry>,
}

/// `GET /_relay/hub/{tenantName}` — connector entry point.
pub async fn hub_handler(
    Path(tenant_name): Path<String>,
    State(state): State<HubState>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(tenant) = state.tenants.load_by_name(&tenant_name).await else {
        return (StatusCode::NOT_FOUND, "unknown tenant").into_response();
    };
    ws.on_upgrade(move |socket| run_session(socket, tenant, state))
}

async fn run_session(mut socket: WebSocket, tenant: Tenant, state: HubState) {
    // 1. The connector introduces itself before anything else flows.
    let hello = match tokio::time::timeout(HELLO_TIMEOUT, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<ConnectorFrame>(text.as_str()) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(tenant = %tenant.name, error = %err, "undecodable hello frame, closing session");
                return;
            }
        },
        Ok(Some(Ok(_))) | Ok(Some(Err(_))) | Ok(None) => {
            tracing::warn!(tenant = %tenant.name, "hub session closed before hello");
            return;
        }
        Err(_) => {
            tracing::warn!(tenant = %tenant.name, "hello timed out, closing session");
            return;
        }
    };

    let ConnectorFrame::Hello {
        connector_name,
        binary_size_limit,
        resume_connection_id,
    } = hello;

    // 2. A connector resuming after a reconnect keeps its identity.
    let connection_id = resume_connection_id.unwrap_or_else(ConnectionId::mint);

    // 3. Register the outbound half with the dispatcher.
    let (tx, mut outbound) = mpsc::channel::<ServerFrame>(SESSION_QUEUE_DEPTH);
    let handle = state.connectors.subscribe(
        &tenant.name,
        ConnectorHandle::new(connection_id.clone(), &tenant.name, binary_size_limit, tx),
    );

    tracing::info!(
        tenant = %tenant.name,
        connector = %connector_name,
        connection_id = %connection_id,
        "connector connected"
    );

    // 4. Accept, then push the tenant's connection policy.
    let accepted = ServerFrame::Accepted {
        connection_id: connection_id.clone(),
    };
    let configure = ServerFrame::Configure {
        config: tenant.config.clone(),
    };
    for frame in [accepted, configure] {
        if send_frame(&mut socket, &frame).await.is_err() {
            state.connectors.unsubscribe(&tenant.name, &connection_id);
            return;
        }
    }

    // 5. Pump until either side goes away. Inbound traffic is only
    //    ping/pong/close; axum answers pings on its own.
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(connection_id = %connection_id, error = %err, "hub socket error");
                        break;
                    }
                }
            }
        }
    }

    state.connectors.unsubscribe(&tenant.name, &connection_id);
    drop(handle);
    tracing::info!(
        tenant = %tenant.name,
        connection_id = %connection_id,
        "connector disconnected"
    );
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).expect("hub frames always serialize");
    socket.send(Message::Text(json.into())).await
}
