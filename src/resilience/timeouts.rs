//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound the time the rest of the chain may take
//! - Cancel the inner work cleanly once the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on expiry
//! - Timeout errors are distinct from transport errors

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::{RequestContext, Response};
use crate::error::{PipelineError, Result};
use crate::inspect::{self, Kind, PolicyOptions};
use crate::pipeline::{Next, Policy};

/// Deadline for everything behind this policy.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    duration: Duration,
}

/// Build a tagged timeout policy.
pub fn timeout(duration: Duration) -> Arc<Timeout> {
    let arc = Arc::new(Timeout { duration });
    inspect::tag(
        &arc,
        "timeout",
        Kind::Policy,
        PolicyOptions::Timeout {
            timeout_ms: duration.as_millis() as u64,
        },
    );
    arc
}

impl Timeout {
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[async_trait]
impl Policy for Timeout {
    async fn handle(&self, ctx: RequestContext, next: Next) -> Result<Response> {
        let request_id = ctx.request_id();
        match tokio::time::timeout(self.duration, next.run(ctx)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    timeout_ms = self.duration.as_millis() as u64,
                    "Request timed out"
                );
                Err(PipelineError::Timeout(self.duration))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{transport_fn, Pipeline};
    use http::Method;

    fn slow(delay: Duration) -> Pipeline {
        Pipeline::builder()
            .policy(timeout(Duration::from_millis(100)))
            .transport(Arc::new(transport_fn(move |_ctx: RequestContext| async move {
                tokio::time::sleep(delay).await;
                Ok(Response::new(200))
            })))
    }

    fn ctx() -> RequestContext {
        RequestContext::parse(Method::GET, "https://example.com/slow").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn fast_calls_pass_through() {
        let resp = slow(Duration::from_millis(20)).call(ctx()).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let err = slow(Duration::from_secs(5)).call(ctx()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout(d) if d == Duration::from_millis(100)));
    }

    #[test]
    fn tagged_with_its_deadline() {
        let policy = timeout(Duration::from_millis(1500));
        let meta = inspect::describe(&policy).unwrap();
        assert_eq!(meta.name, "timeout");
        assert!(matches!(meta.options, PolicyOptions::Timeout { timeout_ms: 1500 }));
    }
}
