//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a pipeline.
//! All types derive Serde traits for deserialization from config files, and
//! every section has defaults so a minimal (even empty) file is valid.

use serde::{Deserialize, Serialize};

/// Root configuration for an outbound pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Overall deadline for one call, retries included.
    pub timeout: TimeoutConfig,

    /// Singleflight deduplication of identical requests.
    pub dedupe: DedupeConfig,

    /// Circuit breaker guarding the downstream dependency.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retry: RetryConfig,

    /// Server wait hints honored between retries.
    pub retry_after: RetryAfterConfig,

    /// Client-side rate limiting.
    pub throttle: ThrottleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Enable the overall deadline.
    pub enabled: bool,

    /// Request timeout (total time including retries) in milliseconds.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_ms: 30_000,
        }
    }
}

/// Deduplication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DedupeConfig {
    /// Enable deduplication.
    pub enabled: bool,

    /// How long a key stays mapped to one execution, in milliseconds.
    pub ttl_ms: u64,

    /// Methods that participate (e.g., "GET").
    pub methods: Vec<String>,

    /// Maximum number of tracked keys.
    pub max_size: usize,

    /// What to do when the map is full: "oldest_first" or "bypass".
    pub eviction: EvictionMode,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_ms: 1000,
            methods: vec!["GET".to_string(), "HEAD".to_string()],
            max_size: 1000,
            eviction: EvictionMode::OldestFirst,
        }
    }
}

/// Eviction behavior, as spelled in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionMode {
    #[default]
    OldestFirst,
    Bypass,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the breaker.
    pub enabled: bool,

    /// Breaker name, used in logs, metrics and errors.
    pub name: String,

    /// Consecutive failures before opening.
    pub failure_threshold: u32,

    /// Cooldown before a trial call is allowed, in milliseconds.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "downstream".to_string(),
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor per attempt.
    pub backoff_factor: f64,

    /// Fraction of requests that can be retries (retry budget).
    /// e.g., 0.1 for 10% budget. Zero disables the budget.
    pub budget_ratio: f32,

    /// Retries always allowed per budget window.
    pub budget_min_retries: u32,

    /// Response statuses worth retrying.
    pub retry_statuses: Vec<u16>,

    /// Methods considered safe to retry.
    pub retry_methods: Vec<String>,

    /// Requests with larger bodies are never retried.
    pub max_body_bytes: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            backoff_factor: 2.0,
            budget_ratio: 0.0,
            budget_min_retries: 10,
            retry_statuses: vec![408, 429, 500, 502, 503, 504],
            retry_methods: ["GET", "HEAD", "OPTIONS", "TRACE", "PUT", "DELETE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            max_body_bytes: 1024 * 1024, // 1MB
        }
    }
}

/// Server wait hint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryAfterConfig {
    /// Honor wait hints before falling back to backoff.
    pub enabled: bool,

    /// Header carrying the hint.
    pub header: String,

    /// Statuses the hint applies to.
    pub statuses: Vec<u16>,

    /// Longest wait honored, in milliseconds. Absent means unbounded.
    pub max_wait_ms: Option<u64>,

    /// Over the maximum: clamp to it (true) or fall back to backoff (false).
    pub clamp: bool,
}

impl Default for RetryAfterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header: "retry-after".to_string(),
            statuses: vec![429, 503],
            max_wait_ms: Some(60_000),
            clamp: true,
        }
    }
}

/// Throttle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Enable client-side rate limiting.
    pub enabled: bool,

    /// Calls allowed per interval; also the burst size.
    pub limit: u32,

    /// Interval length in milliseconds.
    pub interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: 10,
            interval_ms: 1000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
