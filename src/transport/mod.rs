//! Broker-side transport.
//!
//! Responses and acknowledgements do not return over the hub session:
//! the connector posts them to whichever server instance it can reach,
//! and the broker routes them to the instance that owns the waiter
//! (`response.{origin}` / `acknowledge.{origin}` channels). Frames are
//! JSON, non-durable: a dead origin's traffic is dropped, the caller
//! times out.

mod ingestion;
mod memory;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::protocol::{AcknowledgeRequest, TargetResponse};

pub use ingestion::{ingestion_router, IngestionState};
pub use memory::{InMemoryBroker, OriginConsumers};

/// Dispatch side of the broker.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Publish a response to the origin that owns its request.
    async fn dispatch_response(&self, response: TargetResponse) -> Result<(), TransportError>;

    /// Publish an acknowledgement to the origin that owns its request.
    async fn dispatch_acknowledge(&self, ack: AcknowledgeRequest) -> Result<(), TransportError>;
}
