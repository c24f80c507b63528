//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every policy produces:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and histograms via the `metrics` facade)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Whatever metrics recorder the host application installs
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every log event
//! - Metrics are cheap; without an installed recorder they are no-ops
//! - No exporter is bundled; the embedding process owns that choice

pub mod logging;
pub mod metrics;
