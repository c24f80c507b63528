//! Client-side rate limiting with a token bucket.
//!
//! # Responsibilities
//! - Bound outbound call starts to `limit` per `interval` in steady state
//! - Allow bursts up to `limit` when the bucket is full
//! - Suspend (not reject) callers until a token is available
//!
//! # Design Decisions
//! - Lazy refill on every acquire; no background task
//! - The bucket lock is never held across a sleep
//! - Waiting callers re-check after waking, since another caller may have
//!   taken the token in the meantime

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use crate::context::{RequestContext, Response};
use crate::error::{PipelineError, Result};
use crate::inspect::{self, Kind, PolicyOptions};
use crate::observability::metrics;
use crate::pipeline::{Next, Policy};

// Absorbs float drift after sleeping exactly the computed wait.
const EPSILON: f64 = 1e-9;

/// A simple token bucket.
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self, now: Instant, capacity: f64, rate_per_sec: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(capacity);
        self.last_refill = now;
    }
}

/// Token-bucket throttle policy.
pub struct Throttle {
    limit: u32,
    interval: Duration,
    bucket: Mutex<TokenBucket>,
}

/// Build a tagged throttle allowing `limit` calls per `interval`.
pub fn throttle(limit: u32, interval: Duration) -> Arc<Throttle> {
    let arc = Arc::new(Throttle::new(limit, interval));
    inspect::tag(
        &arc,
        "throttle",
        Kind::Policy,
        PolicyOptions::Throttle {
            limit: arc.limit,
            interval_ms: arc.interval.as_millis() as u64,
        },
    );
    arc
}

impl Throttle {
    /// A full bucket. `limit` is at least one and `interval` at least 1ms.
    pub fn new(limit: u32, interval: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            interval: interval.max(Duration::from_millis(1)),
            bucket: Mutex::new(TokenBucket {
                tokens: f64::from(limit),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn capacity(&self) -> f64 {
        f64::from(self.limit)
    }

    fn rate_per_sec(&self) -> f64 {
        self.capacity() / self.interval.as_secs_f64()
    }

    /// Tokens currently in the bucket, after a refill.
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().expect("throttle mutex poisoned");
        bucket.refill(Instant::now(), self.capacity(), self.rate_per_sec());
        bucket.tokens
    }

    /// Take a token, or report how long until one accumulates.
    fn try_acquire(&self) -> std::result::Result<(), Duration> {
        let mut bucket = self.bucket.lock().expect("throttle mutex poisoned");
        bucket.refill(Instant::now(), self.capacity(), self.rate_per_sec());

        if bucket.tokens + EPSILON >= 1.0 {
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.rate_per_sec()))
        }
    }

    /// Wait until a token is available, observing the caller's cancellation.
    pub async fn acquire(&self, ctx: &RequestContext) -> Result<()> {
        let started = Instant::now();
        loop {
            match self.try_acquire() {
                Ok(()) => break,
                Err(wait) => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        wait = ?wait,
                        limit = self.limit,
                        "Throttling request"
                    );
                    tokio::select! {
                        biased;
                        _ = ctx.cancellation().cancelled() => return Err(PipelineError::Cancelled),
                        _ = sleep(wait) => {}
                    }
                }
            }
        }

        let waited = started.elapsed();
        if !waited.is_zero() {
            metrics::record_throttle_wait(waited);
        }
        Ok(())
    }
}

#[async_trait]
impl Policy for Throttle {
    async fn handle(&self, ctx: RequestContext, next: Next) -> Result<Response> {
        self.acquire(&ctx).await?;
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{transport_fn, Pipeline};
    use http::Method;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> RequestContext {
        RequestContext::parse(Method::GET, "https://example.com/limited").unwrap()
    }

    fn pipeline(policy: Arc<Throttle>) -> Pipeline {
        Pipeline::builder()
            .policy(policy)
            .transport(Arc::new(transport_fn(|_ctx: RequestContext| async move {
                Ok(Response::new(200))
            })))
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_steady_rate() {
        let pipeline = pipeline(throttle(5, Duration::from_millis(1000)));
        let start = Instant::now();

        for _ in 0..5 {
            pipeline.call(ctx()).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        pipeline.call(ctx()).await.unwrap();
        let sixth = start.elapsed();
        assert!(sixth >= Duration::from_millis(200), "sixth started at {:?}", sixth);
        assert!(sixth < Duration::from_millis(210));

        pipeline.call(ctx()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_never_exceed_limit() {
        let policy = Throttle::new(3, Duration::from_millis(300));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(policy.available() <= 3.0);

        policy.acquire(&ctx()).await.unwrap();
        let left = policy.available();
        assert!((left - 2.0).abs() < 1e-6, "left = {}", left);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_gives_up() {
        let policy = Arc::new(Throttle::new(1, Duration::from_secs(60)));
        policy.acquire(&ctx()).await.unwrap();

        let token = CancellationToken::new();
        let waiter = {
            let policy = policy.clone();
            let ctx = ctx().with_cancellation(token.clone());
            tokio::spawn(async move { policy.acquire(&ctx).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn zero_limit_is_clamped() {
        let policy = Throttle::new(0, Duration::ZERO);
        assert_eq!(policy.limit(), 1);
        assert_eq!(policy.interval(), Duration::from_millis(1));
    }
}
