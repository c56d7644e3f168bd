//! In-memory registries matching asynchronous arrivals to waiting
//! workers by request id.
//!
//! Both coordinators follow the same shape: a sharded map of single-use
//! slots keyed by `RequestId`, a registration guard that frees the slot
//! on drop, and a `process` entry point fed by the broker consumers.
//! Operations on distinct ids never contend on a single lock.

mod acknowledge;
mod response;

pub use acknowledge::{AckRegistration, AcknowledgeCoordinator};
pub use response::{PendingResponse, ReceivedResponse, ResponseCoordinator};
