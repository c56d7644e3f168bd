//! In-memory broker: per-origin channels plus the consumer loop that
//! feeds the coordinators.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::coordination::{AcknowledgeCoordinator, ResponseCoordinator};
use crate::error::TransportError;
use crate::protocol::{AcknowledgeRequest, OriginId, TargetResponse};
use crate::transport::ServerTransport;

const QUEUE_DEPTH: usize = 256;

#[derive(Debug)]
struct OriginChannels {
    responses: mpsc::Sender<Bytes>,
    acknowledges: mpsc::Sender<Bytes>,
}

/// Broker keeping one pair of non-durable queues per bound origin.
///
/// Frames are raw JSON bytes so the consumer side exercises the same
/// decode-and-drop path a real broker client would.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    origins: Arc<DashMap<OriginId, OriginChannels>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the queues for `origin` and hand back their consuming ends.
    /// Rebinding an origin replaces the previous queues.
    pub fn bind_origin(&self, origin: OriginId) -> OriginConsumers {
        let (response_tx, responses) = mpsc::channel(QUEUE_DEPTH);
        let (ack_tx, acknowledges) = mpsc::channel(QUEUE_DEPTH);
        self.origins.insert(
            origin,
            OriginChannels {
                responses: response_tx,
                acknowledges: ack_tx,
            },
        );
        OriginConsumers {
            origin,
            responses,
            acknowledges,
        }
    }

    fn publish(
        channel: Option<&mpsc::Sender<Bytes>>,
        origin: OriginId,
        frame: Bytes,
        what: &'static str,
    ) -> Result<(), TransportError> {
        match channel {
            Some(sender) => sender.try_send(frame).map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => {
                    TransportError::Publish(format!("{what} queue for origin {origin} is full"))
                }
                mpsc::error::TrySendError::Closed(_) => {
                    TransportError::Publish(format!("{what} queue for origin {origin} is closed"))
                }
            }),
            None => {
                // The owning instance is gone; its caller will time out.
                tracing::warn!(origin = %origin, "dropping {what} for unknown origin");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ServerTransport for InMemoryBroker {
    async fn dispatch_response(&self, response: TargetResponse) -> Result<(), TransportError> {
        let origin = response.origin_id;
        let frame = serde_json::to_vec(&response)
            .map_err(|err| TransportError::Publish(err.to_string()))?;
        let channels = self.origins.get(&origin);
        Self::publish(
            channels.as_deref().map(|c| &c.responses),
            origin,
            frame.into(),
            "response",
        )
    }

    async fn dispatch_acknowledge(&self, ack: AcknowledgeRequest) -> Result<(), TransportError> {
        let origin = ack.origin_id;
        let frame =
            serde_json::to_vec(&ack).map_err(|err| TransportError::Publish(err.to_string()))?;
        let channels = self.origins.get(&origin);
        Self::publish(
            channels.as_deref().map(|c| &c.acknowledges),
            origin,
            frame.into(),
            "acknowledge",
        )
    }
}

/// Consuming ends of one origin's queues.
pub struct OriginConsumers {
    origin: OriginId,
    responses: mpsc::Receiver<Bytes>,
    acknowledges: mpsc::Receiver<Bytes>,
}

impl OriginConsumers {
    /// Drain both queues into the coordinators until shutdown.
    ///
    /// Undecodable frames are logged and dropped; the consumer never
    /// dies because of one bad payload.
    pub async fn run(
        mut self,
        responses: ResponseCoordinator,
        acknowledges: AcknowledgeCoordinator,
        shutdown: CancellationToken,
    ) {
        tracing::debug!(origin = %self.origin, "broker consumers started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = self.responses.recv() => {
                    let Some(frame) = frame else { break };
                    match serde_json::from_slice::<TargetResponse>(&frame) {
                        Ok(response) => responses.process(response).await,
                        Err(err) => {
                            tracing::warn!(origin = %self.origin, error = %err, "dropping undecodable response frame");
                        }
                    }
                }
                frame = self.acknowledges.recv() => {
                    let Some(frame) = frame else { break };
                    match serde_json::from_slice::<AcknowledgeRequest>(&frame) {
                        Ok(ack) => acknowledges.process(ack),
                        Err(err) => {
                            tracing::warn!(origin = %self.origin, error = %err, "dropping undecodable acknowledge frame");
                        }
                    }
                }
            }
        }
        tracing::debug!(origin = %self.origin, "broker consumers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BodyContent, RequestId};
    use crate::store::FsBodyStore;

    fn response(origin: OriginId, id: RequestId) -> TargetResponse {
        TargetResponse {
            request_id: id,
            origin_id: origin,
            status: 204,
            headers: Vec::new(),
            body: BodyContent::Empty,
            body_size: 0,
            failed: false,
            expired: false,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn response_round_trips_through_the_broker() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBodyStore::open(dir.path()).await.unwrap();
        let response_coordinator = ResponseCoordinator::new(store);
        let ack_coordinator = AcknowledgeCoordinator::new();

        let broker = InMemoryBroker::new();
        let origin = OriginId::new();
        let consumers = broker.bind_origin(origin);
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(consumers.run(
            response_coordinator.clone(),
            ack_coordinator.clone(),
            shutdown.clone(),
        ));

        let id = RequestId::new();
        let pending = response_coordinator.register(id).unwrap();
        broker.dispatch_response(response(origin, id)).await.unwrap();

        let received = pending.wait().await.unwrap();
        assert_eq!(received.response.status, 204);

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_to_unknown_origin_is_dropped_not_an_error() {
        let broker = InMemoryBroker::new();
        broker
            .dispatch_response(response(OriginId::new(), RequestId::new()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn undecodable_frame_does_not_kill_the_consumer() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBodyStore::open(dir.path()).await.unwrap();
        let response_coordinator = ResponseCoordinator::new(store);
        let ack_coordinator = AcknowledgeCoordinator::new();

        let broker = InMemoryBroker::new();
        let origin = OriginId::new();
        let consumers = broker.bind_origin(origin);
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(consumers.run(
            response_coordinator.clone(),
            ack_coordinator.clone(),
            shutdown.clone(),
        ));

        // Push garbage straight into the queue.
        let sender = broker.origins.get(&origin).unwrap().responses.clone();
        sender.send(Bytes::from_static(b"not json")).await.unwrap();

        // A valid frame afterwards still gets through.
        let id = RequestId::new();
        let pending = response_coordinator.register(id).unwrap();
        broker.dispatch_response(response(origin, id)).await.unwrap();
        assert!(pending.wait().await.is_ok());

        shutdown.cancel();
        worker.await.unwrap();
    }
}
