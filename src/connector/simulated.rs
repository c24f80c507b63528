//! In-process connector that imitates a flaky upstream.
//!
//! Used by the `callguard-probe` binary and by tests that want realistic failure mixes
//! without a network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use http::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use url::Url;

use crate::connector::Connector;
use crate::context::{RequestContext, Response};
use crate::error::{PipelineError, Result};

/// Handle for one simulated connection.
#[derive(Debug, Clone)]
pub struct SimulatedSession {
    pub id: u64,
    pub host: String,
}

/// A connector whose failures and latency are drawn at random.
#[derive(Debug)]
pub struct SimulatedConnector {
    /// Probability that a request fails at the transport level.
    failure_rate: f64,
    /// Probability that a request gets a 503 carrying a `Retry-After` hint.
    error_status_rate: f64,
    latency: Duration,
    retry_after_secs: u64,
    sessions: AtomicU64,
    requests: AtomicU64,
}

impl Default for SimulatedConnector {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            error_status_rate: 0.0,
            latency: Duration::ZERO,
            retry_after_secs: 1,
            sessions: AtomicU64::new(0),
            requests: AtomicU64::new(0),
        }
    }
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_error_status_rate(mut self, rate: f64) -> Self {
        self.error_status_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = secs;
        self
    }

    /// Requests that reached the simulated upstream.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    type Session = SimulatedSession;

    async fn connect(&self, uri: &Url) -> Result<SimulatedSession> {
        let host = uri
            .host_str()
            .ok_or_else(|| PipelineError::transport(format!("no host in '{}'", uri)))?;
        Ok(SimulatedSession {
            id: self.sessions.fetch_add(1, Ordering::Relaxed) + 1,
            host: host.to_string(),
        })
    }

    async fn request(&self, session: &SimulatedSession, ctx: RequestContext) -> Result<Response> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        if !self.latency.is_zero() {
            // +/- 50% around the configured latency
            let factor = 0.5 + fastrand::f64();
            tokio::time::sleep(self.latency.mul_f64(factor)).await;
        }

        if fastrand::f64() < self.failure_rate {
            return Err(PipelineError::transport(format!(
                "connection to {} reset (session {})",
                session.host, session.id
            )));
        }

        if fastrand::f64() < self.error_status_rate {
            return Ok(Response::new(503)
                .with_header(RETRY_AFTER, HeaderValue::from(self.retry_after_secs)));
        }

        Ok(Response::new(200)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .with_data(format!("{} {}", ctx.method(), ctx.url().path())))
    }

    async fn disconnect(&self, _session: SimulatedSession) -> Result<()> {
        Ok(())
    }
}
