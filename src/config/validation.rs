//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ratios within bounds)
//! - Check that method names, statuses and log filters parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PipelineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Disabled sections are still checked, so enabling one later cannot surprise

use http::Method;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::PipelineConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field}: '{value}' is not a valid HTTP method")]
    InvalidMethod { field: &'static str, value: String },

    #[error("{field}: {status} is not a valid HTTP status")]
    InvalidStatus { field: &'static str, status: u16 },

    #[error("{field} must be within {min}..={max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("retry.max_delay_ms ({max}) is below retry.base_delay_ms ({base})")]
    BackoffRange { base: u64, max: u64 },

    #[error("observability.log_level '{value}' is not a valid filter: {reason}")]
    LogFilter { value: String, reason: String },
}

/// Check every section of `config`, collecting all problems.
pub fn validate_config(config: &PipelineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.timeout.request_ms == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "timeout.request_ms",
        });
    }

    let dedupe = &config.dedupe;
    if dedupe.ttl_ms == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "dedupe.ttl_ms",
        });
    }
    if dedupe.max_size == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "dedupe.max_size",
        });
    }
    if dedupe.methods.is_empty() {
        errors.push(ValidationError::Empty {
            field: "dedupe.methods",
        });
    }
    check_methods("dedupe.methods", &dedupe.methods, &mut errors);

    let breaker = &config.circuit_breaker;
    if breaker.name.trim().is_empty() {
        errors.push(ValidationError::Empty {
            field: "circuit_breaker.name",
        });
    }
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "circuit_breaker.failure_threshold",
        });
    }
    if breaker.reset_timeout_ms == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "circuit_breaker.reset_timeout_ms",
        });
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "retry.max_attempts",
        });
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        errors.push(ValidationError::BackoffRange {
            base: retry.base_delay_ms,
            max: retry.max_delay_ms,
        });
    }
    check_range("retry.backoff_factor", retry.backoff_factor, 1.0, 10.0, &mut errors);
    check_range(
        "retry.budget_ratio",
        f64::from(retry.budget_ratio),
        0.0,
        1.0,
        &mut errors,
    );
    check_statuses("retry.retry_statuses", &retry.retry_statuses, &mut errors);
    check_methods("retry.retry_methods", &retry.retry_methods, &mut errors);

    let hint = &config.retry_after;
    if hint.header.trim().is_empty() {
        errors.push(ValidationError::Empty {
            field: "retry_after.header",
        });
    }
    check_statuses("retry_after.statuses", &hint.statuses, &mut errors);

    if config.throttle.limit == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "throttle.limit",
        });
    }
    if config.throttle.interval_ms == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "throttle.interval_ms",
        });
    }

    if let Err(e) = EnvFilter::try_new(&config.observability.log_level) {
        errors.push(ValidationError::LogFilter {
            value: config.observability.log_level.clone(),
            reason: e.to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_methods(field: &'static str, methods: &[String], errors: &mut Vec<ValidationError>) {
    for value in methods {
        if Method::from_bytes(value.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidMethod {
                field,
                value: value.clone(),
            });
        }
    }
}

fn check_statuses(field: &'static str, statuses: &[u16], errors: &mut Vec<ValidationError>) {
    for &status in statuses {
        if !(100..=599).contains(&status) {
            errors.push(ValidationError::InvalidStatus { field, status });
        }
    }
}

fn check_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
    errors: &mut Vec<ValidationError>,
) {
    if !value.is_finite() || value < min || value > max {
        errors.push(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
}
