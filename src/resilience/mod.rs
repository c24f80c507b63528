//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request through the chain:
//!     → timeouts.rs (bound the total time of everything inside)
//!     → circuit_breaker.rs (reject fast while downstream is unhealthy)
//!     → retries.rs (re-run the inner chain while the predicate asks)
//!         → retry_after.rs (server wait hint on 429/503)
//!         → backoff.rs (exponential backoff with jitter otherwise)
//! ```
//!
//! # Design Decisions
//! - Every piece is a policy or a pluggable strategy; none knows about the others
//! - Retries only for idempotent requests by default (GET, HEAD, etc.)
//! - The breaker sits outside the retry engine, so one logical call counts once
//! - All waits observe the request's cancellation token

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod retry_after;
pub mod timeouts;

pub use backoff::{calculate_backoff, ExponentialBackoff, FixedDelay};
pub use circuit_breaker::{
    circuit_breaker, BreakerOptions, BreakerSnapshot, CircuitBreaker, CircuitState, FailureFilter,
};
pub use retries::{
    delay_fn, predicate_fn, retry, AnyError, HttpRetryPredicate, Outcome, Retry, RetryBudget,
    RetryBuilder, RetryDelayStrategy, RetryOptions, RetryPredicate,
};
pub use retry_after::{parse_retry_after, OverLimit, RetryAfter, RetryAfterOptions};
pub use timeouts::{timeout, Timeout};
