//! Server-to-connector delivery.
//!
//! The registry tracks which connectors are subscribed per tenant and
//! owns the outbound half of each hub session. The coordinator picks a
//! connector (round-robin per tenant), handles the staged-body
//! acknowledgement bookkeeping, and pushes the request frame. The hub
//! module is the axum WebSocket endpoint connectors dial into.

mod connectors;
mod coordinator;
pub mod hub;

pub use connectors::{ConnectorHandle, ConnectorRegistry};
pub use coordinator::{Delivery, RequestCoordinator};
