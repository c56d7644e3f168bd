//! Configuration validation logic.

use std::collections::HashSet;

use crate::config::schema::RelayConfig;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

/// Validate a RelayConfig for semantic correctness.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // 1. Tenant names must be usable as the first path segment and
    //    must not collide with the internal /_relay surface.
    let mut seen: HashSet<String> = HashSet::new();
    for tenant in &config.tenants {
        if tenant.name.is_empty() {
            errors.push(ValidationError("tenant name must not be empty".to_string()));
            continue;
        }
        if tenant.name.starts_with('_') || tenant.name.contains('/') {
            errors.push(ValidationError(format!(
                "tenant name '{}' must not start with '_' or contain '/'",
                tenant.name
            )));
        }
        if !seen.insert(tenant.name.to_ascii_lowercase()) {
            errors.push(ValidationError(format!(
                "duplicate tenant name '{}'",
                tenant.name
            )));
        }

        // 2. Reconnect delay bounds must be ordered.
        if let (Some(min), Some(max)) = (
            tenant.reconnect_minimum_delay_ms,
            tenant.reconnect_maximum_delay_ms,
        ) {
            if min > max {
                errors.push(ValidationError(format!(
                    "tenant '{}': reconnect_minimum_delay_ms must be <= reconnect_maximum_delay_ms",
                    tenant.name
                )));
            }
        }
    }

    // 3. Size thresholds.
    if config.relay.max_inline_body_bytes == 0 {
        errors.push(ValidationError(
            "relay.max_inline_body_bytes must be > 0".to_string(),
        ));
    }
    if config.relay.spool_memory_limit_bytes == 0 {
        errors.push(ValidationError(
            "relay.spool_memory_limit_bytes must be > 0".to_string(),
        ));
    }

    if config.relay.request_expiration_secs == Some(0) {
        tracing::warn!("relay.request_expiration_secs is 0, every request will time out immediately");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::*;

    fn tenant(name: &str) -> TenantEntry {
        TenantEntry {
            name: name.into(),
            keep_alive_interval_ms: None,
            reconnect_minimum_delay_ms: None,
            reconnect_maximum_delay_ms: None,
            enable_tracing: None,
        }
    }

    #[test]
    fn test_valid_config() {
        let mut config = RelayConfig::default();
        config.tenants.push(tenant("acme"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_duplicate_tenant_names() {
        let mut config = RelayConfig::default();
        config.tenants.push(tenant("acme"));
        config.tenants.push(tenant("ACME"));

        let errs = validate_config(&config).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].0.contains("duplicate tenant name"));
    }

    #[test]
    fn test_reserved_tenant_name() {
        let mut config = RelayConfig::default();
        config.tenants.push(tenant("_relay"));

        let errs = validate_config(&config).unwrap_err();
        assert!(errs[0].0.contains("must not start with '_'"));
    }

    #[test]
    fn test_inverted_reconnect_bounds() {
        let mut config = RelayConfig::default();
        let mut entry = tenant("acme");
        entry.reconnect_minimum_delay_ms = Some(5_000);
        entry.reconnect_maximum_delay_ms = Some(1_000);
        config.tenants.push(entry);

        let errs = validate_config(&config).unwrap_err();
        assert!(errs[0].0.contains("reconnect_minimum_delay_ms"));
    }
}
