//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::PipelineConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = load_config_str(&content)?;

    tracing::debug!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn load_config_str(content: &str) -> Result<PipelineConfig, ConfigError> {
    let config: PipelineConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::EvictionMode;

    #[test]
    fn empty_file_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert!(!config.throttle.enabled);
        assert_eq!(config.retry_after.statuses, vec![429, 503]);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = load_config_str(
            r#"
            [throttle]
            enabled = true
            limit = 5

            [dedupe]
            enabled = true
            eviction = "bypass"

            [retry_after]
            max_wait_ms = 5000
            clamp = false
            "#,
        )
        .unwrap();

        assert!(config.throttle.enabled);
        assert_eq!(config.throttle.limit, 5);
        assert_eq!(config.throttle.interval_ms, 1000);
        assert_eq!(config.dedupe.eviction, EvictionMode::Bypass);
        assert_eq!(config.dedupe.ttl_ms, 1000);
        assert_eq!(config.retry_after.max_wait_ms, Some(5000));
        assert!(!config.retry_after.clamp);
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        let err = load_config_str("[retry\nmax_attempts = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn semantic_errors_are_collected() {
        let err = load_config_str(
            r#"
            [retry]
            max_attempts = 0

            [throttle]
            interval_ms = 0
            "#,
        )
        .unwrap_err();

        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
