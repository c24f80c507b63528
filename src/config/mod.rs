//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → PipelineConfig (validated, immutable)
//!     → assemble.rs (Pipeline::from_config)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a new pipeline is built from a new config
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod assemble;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_str, ConfigError};
pub use schema::{
    CircuitBreakerConfig, DedupeConfig, EvictionMode, ObservabilityConfig, PipelineConfig,
    RetryAfterConfig, RetryConfig, ThrottleConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
