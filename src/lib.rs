//! Reverse HTTP relay library.
//!
//! A public edge server accepts HTTP calls at `/{tenant}/…` and
//! forwards them over a persistent WebSocket hub to connector
//! processes running next to private targets behind NAT. Responses and
//! acknowledgements come back via the broker return path and are
//! correlated to the waiting caller by request id.

// Core subsystems
pub mod config;
pub mod coordination;
pub mod dispatch;
pub mod ingress;
pub mod protocol;
pub mod server;
pub mod store;
pub mod tenant;
pub mod transport;

// Target side
pub mod connector;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::RelayConfig;
pub use error::RelayError;
pub use lifecycle::Shutdown;
pub use server::RelayApp;
