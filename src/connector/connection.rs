//! Reconnecting hub session.
//!
//! # State machine
//! ```text
//! Disconnected ──start──▶ Connecting ──ok──▶ Connected ──stop──▶ Disconnected
//!     ▲                      │                  │
//!     │                      ▼                  ▼
//!     └──────────── Reconnecting ◀──── session dropped
//! ```
//!
//! The connect loop is iterative with exponential backoff bounded by
//! the tenant-configured delays; only shutdown breaks it. A session
//! that the server closes cleanly ends the connection; anything else
//! enters the reconnect path, presenting the previous connection id so
//! the hub can preserve the connector's identity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::connector::backoff::reconnect_delay;
use crate::connector::handler::{TargetError, TargetHandler};
use crate::connector::outbound::OutboundTransport;
use crate::observability::metrics;
use crate::protocol::{
    AcknowledgeRequest, BodyContent, ConnectionId, ConnectorFrame, RelayRequest, ServerFrame,
    TargetResponse, TenantConfig,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RESPONSE_INLINE_LIMIT: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid hub url: {0}")]
    InvalidUrl(String),
    #[error("websocket failure: {0}")]
    WebSocket(String),
    #[error("hub closed during handshake")]
    HandshakeFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Connection policy, overridable by `Configure` frames.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub keep_alive: Duration,
    pub minimum_delay: Duration,
    pub maximum_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(15),
            minimum_delay: Duration::from_secs(1),
            maximum_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn apply(&mut self, config: &TenantConfig) {
        if let Some(ms) = config.keep_alive_interval_ms {
            self.keep_alive = Duration::from_millis(ms);
        }
        if let Some(ms) = config.reconnect_minimum_delay_ms {
            self.minimum_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = config.reconnect_maximum_delay_ms {
            self.maximum_delay = Duration::from_millis(ms);
        }
    }
}

/// Lifecycle notifications, awaited before the state machine proceeds.
#[async_trait]
pub trait ConnectionEvents: Send + Sync {
    async fn connected(&self, _connection_id: &ConnectionId) {}
    async fn reconnecting(&self, _connection_id: Option<&ConnectionId>) {}
    async fn reconnected(&self, _connection_id: &ConnectionId) {}
    async fn disconnected(&self, _connection_id: Option<&ConnectionId>) {}
}

struct NoopEvents;

impl ConnectionEvents for NoopEvents {}

#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    /// HTTP(S) base of the edge server; the hub url is derived from it.
    pub server_url: Url,
    pub tenant: String,
    pub connector_name: String,
    /// Largest inline body this connector accepts or produces.
    pub binary_size_limit: Option<u64>,
}

struct Inner {
    options: ConnectorOptions,
    handler: Arc<dyn TargetHandler>,
    outbound: Arc<dyn OutboundTransport>,
    events: Arc<dyn ConnectionEvents>,
    policy: RwLock<ReconnectPolicy>,
    force_tracing: AtomicBool,
    state: Mutex<LifecycleState>,
    connection_id: Mutex<Option<ConnectionId>>,
    shutdown: CancellationToken,
}

impl Inner {
    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    fn current_connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
            .lock()
            .expect("connection id lock poisoned")
            .clone()
    }
}

/// The connector's end of the hub.
pub struct ConnectorConnection {
    inner: Arc<Inner>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectorConnection {
    pub fn new(
        options: ConnectorOptions,
        handler: Arc<dyn TargetHandler>,
        outbound: Arc<dyn OutboundTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                handler,
                outbound,
                events: Arc::new(NoopEvents),
                policy: RwLock::new(ReconnectPolicy::default()),
                force_tracing: AtomicBool::new(false),
                state: Mutex::new(LifecycleState::Disconnected),
                connection_id: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn ConnectionEvents>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("events must be installed before the connection starts");
        inner.events = events;
        self
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock().expect("state lock poisoned")
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.inner.current_connection_id()
    }

    pub fn tracing_enabled(&self) -> bool {
        self.inner.force_tracing.load(Ordering::Relaxed)
    }

    /// Open the hub session and start serving requests.
    ///
    /// Connect failures are retried with backoff until either the
    /// session opens or [`stop`](Self::stop) is called; a stop during
    /// the initial connect returns without error.
    pub async fn start(&self) -> Result<(), HubError> {
        hub_url(&self.inner.options)?;

        self.inner.set_state(LifecycleState::Connecting);
        let Some((stream, connection_id)) = connect_with_retry(&self.inner).await else {
            self.inner.set_state(LifecycleState::Disconnected);
            return Ok(());
        };

        *self
            .inner
            .connection_id
            .lock()
            .expect("connection id lock poisoned") = Some(connection_id.clone());
        self.inner.set_state(LifecycleState::Connected);
        tracing::info!(connection_id = %connection_id, "connector connected");
        self.inner.events.connected(&connection_id).await;

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(run(inner, stream));
        *self.task.lock().await = Some(task);
        Ok(())
    }

    /// Tear the session down. Safe to call more than once.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.inner.set_state(LifecycleState::Disconnected);
    }
}

fn hub_url(options: &ConnectorOptions) -> Result<Url, HubError> {
    let mut url = options
        .server_url
        .join(&format!("_relay/hub/{}", options.tenant))
        .map_err(|err| HubError::InvalidUrl(err.to_string()))?;
    let scheme = match url.scheme() {
        "http" => "ws".to_string(),
        "https" => "wss".to_string(),
        other => other.to_string(),
    };
    url.set_scheme(&scheme)
        .map_err(|_| HubError::InvalidUrl(format!("cannot derive ws scheme for {url}")))?;
    Ok(url)
}

enum SessionEnd {
    /// `stop` was called.
    Shutdown,
    /// The server closed the session deliberately.
    Graceful,
    /// The transport died; reconnect.
    Dropped,
}

async fn run(inner: Arc<Inner>, stream: WsStream) {
    let mut stream = Some(stream);
    loop {
        let Some(session) = stream.take() else { break };
        match run_session(&inner, session).await {
            SessionEnd::Shutdown => break,
            SessionEnd::Graceful => {
                tracing::info!("hub closed the session, not reconnecting");
                break;
            }
            SessionEnd::Dropped => {
                if inner.shutdown.is_cancelled() {
                    break;
                }
                let previous = inner.current_connection_id();
                inner.set_state(LifecycleState::Reconnecting);
                tracing::warn!(connection_id = ?previous.as_ref().map(|c| c.as_str()), "connector reconnecting");
                inner.events.reconnecting(previous.as_ref()).await;

                let Some((new_stream, new_id)) = connect_with_retry(&inner).await else {
                    break;
                };
                match &previous {
                    Some(old) if *old == new_id => {
                        tracing::debug!(connection_id = %new_id, "hub session resumed with the same connection id");
                    }
                    _ => {
                        tracing::info!(connection_id = %new_id, "hub session resumed under a new connection id");
                    }
                }
                *inner
                    .connection_id
                    .lock()
                    .expect("connection id lock poisoned") = Some(new_id.clone());
                inner.set_state(LifecycleState::Connected);
                inner.events.reconnected(&new_id).await;
                stream = Some(new_stream);
            }
        }
    }

    inner.set_state(LifecycleState::Disconnected);
    let connection_id = inner.current_connection_id();
    tracing::info!(connection_id = ?connection_id.as_ref().map(|c| c.as_str()), "connector disconnected");
    inner.events.disconnected(connection_id.as_ref()).await;
}

async fn run_session(inner: &Arc<Inner>, stream: WsStream) -> SessionEnd {
    let (mut sink, mut reader) = stream.split();

    let mut keep_alive = inner.policy.read().expect("policy lock poisoned").keep_alive;
    let mut ticker = interval(keep_alive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_contact = Instant::now();

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            _ = ticker.tick() => {
                if last_contact.elapsed() > keep_alive * 3 {
                    tracing::warn!("keep-alive window missed, dropping the session");
                    return SessionEnd::Dropped;
                }
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    return SessionEnd::Dropped;
                }
            }
            frame = reader.next() => {
                match frame {
                    None => return SessionEnd::Dropped,
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "hub socket error");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(Message::Close(_))) => return SessionEnd::Graceful,
                    Some(Ok(Message::Text(text))) => {
                        last_contact = Instant::now();
                        match serde_json::from_str::<ServerFrame>(text.as_str()) {
                            Ok(ServerFrame::RequestTarget { request }) => {
                                tokio::spawn(handle_request(Arc::clone(inner), request));
                            }
                            Ok(ServerFrame::Configure { config }) => {
                                apply_configure(inner, &config);
                                let updated = inner.policy.read().expect("policy lock poisoned").keep_alive;
                                if updated != keep_alive {
                                    keep_alive = updated;
                                    ticker = interval(keep_alive);
                                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                                }
                            }
                            Ok(ServerFrame::Accepted { connection_id }) => {
                                tracing::debug!(connection_id = %connection_id, "unexpected accepted frame mid-session");
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "dropping undecodable hub frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        last_contact = Instant::now();
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn apply_configure(inner: &Inner, config: &TenantConfig) {
    inner
        .policy
        .write()
        .expect("policy lock poisoned")
        .apply(config);
    if let Some(enabled) = config.enable_tracing {
        inner.force_tracing.store(enabled, Ordering::Relaxed);
    }
    tracing::debug!(?config, "tenant configuration applied");
}

async fn connect_with_retry(inner: &Arc<Inner>) -> Option<(WsStream, ConnectionId)> {
    let url = hub_url(&inner.options).ok()?;
    let mut attempt = 0u32;
    loop {
        if inner.shutdown.is_cancelled() {
            return None;
        }
        match connect_once(inner, &url).await {
            Ok(connected) => return Some(connected),
            Err(err) => {
                attempt += 1;
                let (minimum, maximum) = {
                    let policy = inner.policy.read().expect("policy lock poisoned");
                    (policy.minimum_delay, policy.maximum_delay)
                };
                let delay = reconnect_delay(attempt, minimum, maximum);
                tracing::debug!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "hub connect failed, retrying");
                tokio::select! {
                    _ = inner.shutdown.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

async fn connect_once(inner: &Inner, url: &Url) -> Result<(WsStream, ConnectionId), HubError> {
    let (mut stream, _) = connect_async(url.as_str())
        .await
        .map_err(|err| HubError::WebSocket(err.to_string()))?;

    let hello = ConnectorFrame::Hello {
        connector_name: inner.options.connector_name.clone(),
        binary_size_limit: inner.options.binary_size_limit,
        resume_connection_id: inner.current_connection_id(),
    };
    let json = serde_json::to_string(&hello).expect("hub frames always serialize");
    stream
        .send(Message::Text(json.into()))
        .await
        .map_err(|err| HubError::WebSocket(err.to_string()))?;

    let handshake = async {
        while let Some(frame) = stream.next().await {
            let frame = frame.map_err(|err| HubError::WebSocket(err.to_string()))?;
            if let Message::Text(text) = frame {
                match serde_json::from_str::<ServerFrame>(text.as_str()) {
                    Ok(ServerFrame::Accepted { connection_id }) => return Ok(connection_id),
                    Ok(ServerFrame::Configure { config }) => apply_configure(inner, &config),
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping undecodable handshake frame");
                    }
                }
            }
        }
        Err(HubError::HandshakeFailed)
    };
    let connection_id = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
        .await
        .map_err(|_| HubError::HandshakeFailed)??;

    Ok((stream, connection_id))
}

/// One hub invocation: fetch the body if it was outsourced,
/// acknowledge it, call the target, ship the response back.
async fn handle_request(inner: Arc<Inner>, mut request: RelayRequest) {
    // Tenant-forced tracing ORs into the request's own flag.
    request.enable_tracing =
        request.enable_tracing || inner.force_tracing.load(Ordering::Relaxed);
    let request_id = request.request_id;

    if request.body.is_outsourced() {
        match inner.outbound.fetch_request_body(request_id).await {
            Ok(data) => {
                request.body = BodyContent::inline(data);
                if let Some(acknowledge_id) = request.acknowledge_id.clone() {
                    let ack = AcknowledgeRequest {
                        request_id,
                        origin_id: request.origin_id,
                        acknowledge_id,
                    };
                    match inner.outbound.publish_acknowledge(&ack).await {
                        Ok(()) => {
                            tracing::debug!(request_id = %request_id, "ack sent");
                            metrics::ack_sent();
                        }
                        Err(err) => {
                            tracing::warn!(request_id = %request_id, error = %err, "failed to send ack");
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(request_id = %request_id, error = %err, "failed to fetch outsourced body");
                publish_response(&inner, TargetResponse::failure(&request, err.to_string())).await;
                return;
            }
        }
    }

    let response = tokio::select! {
        _ = inner.shutdown.cancelled() => return,
        result = inner.handler.handle(&request) => match result {
            Ok(response) => response,
            Err(TargetError::Timeout) => TargetResponse::timed_out(&request),
            Err(TargetError::Unreachable(message)) => TargetResponse::failure(&request, message),
        }
    };

    publish_response(&inner, response).await;
}

async fn publish_response(inner: &Inner, mut response: TargetResponse) {
    let limit = inner
        .options
        .binary_size_limit
        .unwrap_or(DEFAULT_RESPONSE_INLINE_LIMIT);
    let oversized = response
        .body
        .as_inline()
        .map(|data| data.len() as u64 > limit)
        .unwrap_or(false);

    if oversized {
        if let Some(data) = response.body.as_inline().cloned() {
            let len = data.len() as u64;
            match inner
                .outbound
                .store_response_body(response.request_id, data)
                .await
            {
                Ok(()) => {
                    response.body = BodyContent::Outsourced;
                    metrics::body_outsourced("response", len);
                }
                Err(err) => {
                    // Leave the body inline; the server accepts either.
                    tracing::warn!(request_id = %response.request_id, error = %err, "failed to stage response body");
                }
            }
        }
    }

    match inner.outbound.publish_response(&response).await {
        Ok(()) => {
            tracing::debug!(request_id = %response.request_id, status = response.status, "response published");
        }
        Err(err) => {
            tracing::warn!(request_id = %response.request_id, error = %err, "failed to publish response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_url_swaps_to_websocket_scheme() {
        let options = ConnectorOptions {
            server_url: Url::parse("http://edge.example:8080/").unwrap(),
            tenant: "t1".into(),
            connector_name: "c1".into(),
            binary_size_limit: None,
        };
        let url = hub_url(&options).unwrap();
        assert_eq!(url.as_str(), "ws://edge.example:8080/_relay/hub/t1");

        let tls = ConnectorOptions {
            server_url: Url::parse("https://edge.example/").unwrap(),
            ..options
        };
        assert_eq!(hub_url(&tls).unwrap().scheme(), "wss");
    }

    #[test]
    fn configure_overrides_policy_and_tracing() {
        let mut policy = ReconnectPolicy::default();
        policy.apply(&TenantConfig {
            keep_alive_interval_ms: Some(5_000),
            reconnect_minimum_delay_ms: Some(250),
            reconnect_maximum_delay_ms: None,
            enable_tracing: Some(true),
        });
        assert_eq!(policy.keep_alive, Duration::from_secs(5));
        assert_eq!(policy.minimum_delay, Duration::from_millis(250));
        assert_eq!(policy.maximum_delay, Duration::from_secs(30));
    }
}
