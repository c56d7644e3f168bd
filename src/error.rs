//! Error taxonomy for the relay core.
//!
//! Recovery is local to the ingress pipeline: transport failures become
//! 503 at the edge, an elapsed deadline becomes 408, a caller abort is
//! logged and dropped. Coordinators and connectors never translate
//! errors into HTTP shapes themselves.

use thiserror::Error;

use crate::protocol::RequestId;

/// Failures moving an envelope between processes.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no connector subscribed for tenant '{0}'")]
    NoConnector(String),
    #[error("connector channel closed before the request was transmitted")]
    ChannelClosed,
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Failures staging or retrieving an outsourced body.
#[derive(Debug, Error)]
pub enum BodyStoreError {
    #[error("body store i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("no staged body for request {0}")]
    Missing(RequestId),
}

/// Anything the ingress pipeline can surface.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    BodyStore(#[from] BodyStoreError),
    /// The request deadline elapsed while waiting on the connector.
    #[error("request expired before a response arrived")]
    Expired,
    /// The caller went away mid-request; nothing is written back.
    #[error("client aborted the request")]
    ClientAborted,
    /// A waiter slot already exists for this id.
    #[error("a waiter is already registered for request {0}")]
    DuplicateWaiter(RequestId),
    /// The waiter slot was removed before a response arrived.
    #[error("waiter for request {0} was released before a response arrived")]
    WaiterGone(RequestId),
    /// An interceptor or the request factory failed; surfaces as 500.
    #[error("internal relay failure: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}
