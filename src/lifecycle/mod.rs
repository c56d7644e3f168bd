//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Cancel consumers → Exit
//! ```
//!
//! # Design Decisions
//! - One cancellation tree: consumers and sessions get child tokens
//! - Ordered shutdown: stop accept, cancel broker consumers, close

pub mod shutdown;

pub use shutdown::Shutdown;
