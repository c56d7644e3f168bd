use std::collections::HashMap;

use async_trait::async_trait;

use crate::protocol::{TenantConfig, TenantId};

/// A resolved tenant.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub config: TenantConfig,
}

/// Lookup of tenant configuration by name.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Resolve a tenant by name, case-insensitive. `None` means the
    /// request is not a relay URL and falls through to the next handler.
    async fn load_by_name(&self, name: &str) -> Option<Tenant>;
}

/// Registry seeded once from configuration.
#[derive(Debug, Default)]
pub struct InMemoryTenantRegistry {
    tenants: HashMap<String, Tenant>,
}

impl InMemoryTenantRegistry {
    pub fn new(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        let tenants = tenants
            .into_iter()
            .map(|t| (t.name.to_ascii_lowercase(), t))
            .collect();
        Self { tenants }
    }

    /// Convenience for tests and single-tenant setups.
    pub fn with_tenant(name: &str, config: TenantConfig) -> Self {
        Self::new([Tenant {
            id: TenantId::new(),
            name: name.to_string(),
            config,
        }])
    }
}

#[async_trait]
impl TenantRegistry for InMemoryTenantRegistry {
    async fn load_by_name(&self, name: &str) -> Option<Tenant> {
        self.tenants.get(&name.to_ascii_lowercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let registry = InMemoryTenantRegistry::with_tenant("Acme", TenantConfig::default());
        assert!(registry.load_by_name("acme").await.is_some());
        assert!(registry.load_by_name("ACME").await.is_some());
        assert!(registry.load_by_name("other").await.is_none());
    }
}
