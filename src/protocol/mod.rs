//! Wire-level data model shared by the edge server and connectors.
//!
//! Everything that crosses a process boundary lives here: the relay
//! request/response envelopes, acknowledgements, tenant configuration
//! pushed over the hub, and the hub frames themselves. All frames are
//! JSON; inline body payloads are base64-encoded.

pub mod ids;
pub mod message;

pub use ids::{ConnectionId, OriginId, RequestId, TenantId};
pub use message::{
    AcknowledgeRequest, BodyContent, ConnectorFrame, RelayRequest, ServerFrame, TargetResponse,
    TenantConfig,
};
