//! Tenant lookup.
//!
//! A tenant is a named routing bucket grouping one or more connectors.
//! The core only ever reads: lookup by name, case-insensitive. There is
//! no write path here.

mod registry;

pub use registry::{InMemoryTenantRegistry, Tenant, TenantRegistry};
