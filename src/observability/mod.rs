//! Logging and metrics.
//!
//! Structured logging goes through `tracing`; every component emits its
//! own events (request received/dispatched, response received/written,
//! connector lifecycle, ack sent/consumed). This module only holds the
//! metrics helpers and the exporter bootstrap.

pub mod metrics;
