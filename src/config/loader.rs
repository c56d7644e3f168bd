//! Configuration loading from disk.

use std::path::Path;

use thiserror::Error;

use crate::config::schema::RelayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Why a configuration file could not be turned into a [`RelayConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Malformed(#[from] toml::de::Error),
    #[error("configuration rejected: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|err| err.0.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Load a TOML config file and run the semantic checks over it.
///
/// Sections that are absent from the file keep their defaults, so a
/// minimal deployment only has to list its tenants.
pub fn load_config(path: impl AsRef<Path>) -> Result<RelayConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let config: RelayConfig = toml::from_str(&raw)?;
    if let Err(errors) = validate_config(&config) {
        return Err(ConfigError::Invalid(errors));
    }

    tracing::debug!(
        path = %path.display(),
        tenants = config.tenants.len(),
        "configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn minimal_config_keeps_defaults_for_absent_sections() {
        let (_dir, path) = write_config(
            r#"
            [relay]
            max_inline_body_bytes = 4096

            [[tenants]]
            name = "acme"
            enable_tracing = true
            "#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.relay.max_inline_body_bytes, 4096);
        assert_eq!(config.tenants.len(), 1);
        assert_eq!(config.tenants[0].tenant_config().enable_tracing, Some(true));
        assert_eq!(config.listener.max_connections, 10_000);
    }

    #[test]
    fn semantic_failures_carry_every_validation_message() {
        let (_dir, path) = write_config(
            r#"
            [[tenants]]
            name = "_relay"

            [[tenants]]
            name = ""
            "#,
        );

        match load_config(&path) {
            Err(ConfigError::Invalid(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].0.contains("must not start with '_'"));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        match load_config(&missing) {
            Err(ConfigError::Read { path, .. }) => assert!(path.ends_with("nope.toml")),
            other => panic!("expected read failure, got {other:?}"),
        }
    }
}
