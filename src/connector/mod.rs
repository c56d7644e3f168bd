//! Target-side connector.
//!
//! A connector runs next to the private target, dials out to the edge
//! server's hub, and keeps the session alive across failures. Inbound
//! `RequestTarget` frames are handed to the local [`TargetHandler`];
//! responses and acknowledgements return via the HTTP broker path, not
//! the hub.

mod backoff;
mod connection;
mod handler;
mod outbound;

pub use backoff::reconnect_delay;
pub use connection::{
    ConnectionEvents, ConnectorConnection, ConnectorOptions, HubError, LifecycleState,
    ReconnectPolicy,
};
pub use handler::{HttpTargetHandler, TargetError, TargetHandler};
pub use outbound::{HttpOutbound, OutboundTransport};
