//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: downstream assumed down, calls fail fast
//! - Half-Open: one trial call decides whether downstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first call after reset_timeout
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails (cooldown starts over)
//! ```
//!
//! # Design Decisions
//! - One breaker per downstream dependency, state local to the process
//! - Fail fast while Open without touching downstream
//! - Single trial in Half-Open; concurrent callers fail fast meanwhile
//! - A caller-supplied filter decides which errors count as failures

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

use crate::context::{RequestContext, Response};
use crate::error::{PipelineError, Result};
use crate::inspect::{self, Kind, PolicyOptions};
use crate::observability::metrics;
use crate::pipeline::{Next, Policy};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether an error counts against the breaker.
pub type FailureFilter = Arc<dyn Fn(&PipelineError) -> bool + Send + Sync>;

/// Settings for [`CircuitBreaker`].
#[derive(Clone)]
pub struct BreakerOptions {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    /// `None` counts every error.
    pub is_failure: Option<FailureFilter>,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            is_failure: None,
        }
    }
}

impl fmt::Debug for BreakerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerOptions")
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("is_failure", &self.is_failure.is_some())
            .finish()
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Time until a trial is admitted, while Open.
    pub retry_after: Option<Duration>,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    next_attempt_at: Instant,
    trial_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Three-state circuit breaker policy.
pub struct CircuitBreaker {
    name: String,
    options: BreakerOptions,
    inner: Mutex<BreakerInner>,
}

/// Build a tagged circuit breaker.
pub fn circuit_breaker(name: impl Into<String>, options: BreakerOptions) -> Arc<CircuitBreaker> {
    let meta = PolicyOptions::CircuitBreaker {
        failure_threshold: options.failure_threshold,
        reset_timeout_ms: options.reset_timeout.as_millis() as u64,
    };
    let arc = Arc::new(CircuitBreaker::new(name, options));
    inspect::tag(&arc, "circuit_breaker", Kind::Policy, meta);
    arc
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, options: BreakerOptions) -> Self {
        Self {
            name: name.into(),
            options,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                next_attempt_at: Instant::now(),
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let retry_after = match inner.state {
            CircuitState::Open => Some(inner.next_attempt_at.saturating_duration_since(Instant::now())),
            _ => None,
        };
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            retry_after,
        }
    }

    /// Force the breaker back to Closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        tracing::info!(
            breaker = %self.name,
            from = %inner.state,
            to = %to,
            failures = inner.consecutive_failures,
            "Circuit breaker state change"
        );
        metrics::record_breaker_transition(&self.name, to.as_str());
        inner.state = to;
    }

    fn trip(&self, inner: &mut BreakerInner) {
        inner.next_attempt_at = Instant::now() + self.options.reset_timeout;
        inner.trial_in_flight = false;
        self.transition(inner, CircuitState::Open);
    }

    fn reject(&self, retry_at: Instant) -> PipelineError {
        let retry_after = retry_at.saturating_duration_since(Instant::now());
        tracing::warn!(breaker = %self.name, retry_after = ?retry_after, "Circuit open, failing fast");
        metrics::record_breaker_rejection(&self.name);
        PipelineError::CircuitOpen {
            name: self.name.clone(),
            retry_at,
            retry_after,
        }
    }

    fn admit(&self) -> Result<Admission> {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                if Instant::now() < inner.next_attempt_at {
                    Err(self.reject(inner.next_attempt_at))
                } else {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(self.reject(inner.next_attempt_at))
                } else {
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    fn is_failure(&self, err: &PipelineError) -> bool {
        match &self.options.is_failure {
            Some(filter) => filter(err),
            None => true,
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        let state = inner.state;
        match (admission, state) {
            (Admission::Trial, _) | (_, CircuitState::HalfOpen) => {
                inner.trial_in_flight = false;
                self.transition(&mut inner, CircuitState::Closed);
            }
            _ => {}
        }
    }

    fn on_failure(&self, admission: Admission, err: &PipelineError) {
        let mut inner = self.lock();
        if !self.is_failure(err) {
            if admission == Admission::Trial {
                inner.trial_in_flight = false;
            }
            return;
        }

        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let failures = inner.consecutive_failures;
        let state = inner.state;
        match state {
            CircuitState::HalfOpen => self.trip(&mut inner),
            CircuitState::Closed if failures >= self.options.failure_threshold => self.trip(&mut inner),
            _ => {}
        }
    }

    fn release(&self, admission: Admission) {
        if admission == Admission::Trial {
            self.lock().trial_in_flight = false;
        }
    }
}

/// Releases a trial slot when the call future is dropped before completing.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release(self.admission);
        }
    }
}

#[async_trait]
impl Policy for CircuitBreaker {
    async fn handle(&self, ctx: RequestContext, next: Next) -> Result<Response> {
        let admission = self.admit()?;
        let mut guard = TrialGuard {
            breaker: self,
            admission,
            armed: true,
        };

        let result = next.run(ctx).await;
        guard.armed = false;

        match &result {
            Ok(_) => self.on_success(admission),
            Err(e) => self.on_failure(admission, e),
        }
        result
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}
