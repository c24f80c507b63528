//! Backoff delay strategies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::inspect::{self, Kind, PolicyOptions};
use crate::resilience::retries::{Outcome, RetryDelayStrategy};

/// Calculate exponential backoff delay with jitter.
///
/// `attempt` is 1-based; attempt 0 yields no delay. The delay grows by
/// `factor` per attempt, is capped at `max`, then gets 0-10% jitter on top.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration, factor: f64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
    let delay_ms = base.as_millis() as f64 * factor.max(1.0).powi(exponent);
    let capped_ms = delay_ms.min(max.as_millis() as f64) as u64;

    // 0 to 10% of the delay
    let jitter_range = capped_ms / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_ms + jitter)
}

/// Exponential backoff with jitter. Always proposes a delay.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            factor: 2.0,
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Share and tag the strategy for introspection.
    pub fn shared(self) -> Arc<Self> {
        let arc = Arc::new(self);
        inspect::tag(
            &arc,
            "exponential_backoff",
            Kind::Strategy,
            PolicyOptions::Backoff {
                base_ms: self.base.as_millis() as u64,
                max_ms: self.max.as_millis() as u64,
                factor: self.factor,
            },
        );
        arc
    }
}

#[async_trait]
impl RetryDelayStrategy for ExponentialBackoff {
    async fn delay(&self, _outcome: Outcome<'_>, attempt: u32) -> Option<Duration> {
        Some(calculate_backoff(attempt + 1, self.base, self.max, self.factor))
    }
}

/// Constant delay between attempts.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl FixedDelay {
    pub fn shared(self) -> Arc<Self> {
        let arc = Arc::new(self);
        inspect::tag(
            &arc,
            "fixed_delay",
            Kind::Strategy,
            PolicyOptions::FixedDelay {
                delay_ms: self.0.as_millis() as u64,
            },
        );
        arc
    }
}

#[async_trait]
impl RetryDelayStrategy for FixedDelay {
    async fn delay(&self, _outcome: Outcome<'_>, _attempt: u32) -> Option<Duration> {
        Some(self.0)
    }
}
