//! Traffic shaping subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request:
//!     → dedupe.rs (join an identical in-flight call, or start one)
//!     → throttle.rs (wait for a token before the call starts)
//! ```
//!
//! # Design Decisions
//! - State is local to one policy instance; no cross-process coordination
//! - Locks guard read-modify-write only and are released before any await

pub mod dedupe;
pub mod throttle;

pub use dedupe::{dedupe, default_key, Dedupe, DedupeOptions, Eviction, KeyFn};
pub use throttle::{throttle, Throttle};
