//! Ingress pipeline.
//!
//! One axum middleware layer orchestrates the life of a relayed call:
//! parse the tenant out of the path, buffer the body, run interceptors,
//! dispatch to a connector, wait for the correlated response, run the
//! response interceptors, write back. Unknown tenants fall through to
//! the inner router so non-relay endpoints coexist on the same host.

mod interceptor;
mod middleware;
mod spool;
mod writer;

pub use interceptor::{
    ClientRequestInterceptor, Interceptors, RelayContext, TargetResponseInterceptor,
};
pub use middleware::{relay_middleware, RelaySettings, RelayState};
pub use spool::{DrainedBody, SpoolFile};
pub use writer::is_hop_by_hop;
