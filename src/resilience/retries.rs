//! Retry engine.
//!
//! # Responsibilities
//! - Re-run the rest of the chain while a predicate asks for it
//! - Ask delay strategies, in order, how long to wait between attempts
//! - Enforce a maximum attempt count and an optional retry budget
//!
//! # Design Decisions
//! - The first strategy that proposes a delay wins; the rest are not consulted
//! - The last response or error is returned verbatim once retrying stops
//! - Context-aware predicates refuse non-idempotent methods and large bodies
//! - Retry sleeps observe the request's cancellation token

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use tokio::time::{sleep, Instant};

use crate::context::{RequestContext, Response};
use crate::error::{PipelineError, Result};
use crate::inspect::{self, Kind, Metadata, PolicyOptions};
use crate::observability::metrics;
use crate::pipeline::{Next, Policy};

/// What an attempt produced. Exactly one of response or error, by construction.
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    Response(&'a Response),
    Error(&'a PipelineError),
}

impl<'a> Outcome<'a> {
    pub fn from_result(result: &'a Result<Response>) -> Self {
        match result {
            Ok(resp) => Outcome::Response(resp),
            Err(err) => Outcome::Error(err),
        }
    }

    pub fn response(&self) -> Option<&'a Response> {
        match self {
            Outcome::Response(r) => Some(r),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&'a PipelineError> {
        match self {
            Outcome::Response(_) => None,
            Outcome::Error(e) => Some(e),
        }
    }
}

/// Decides whether an attempt should be retried.
pub trait RetryPredicate: Send + Sync + 'static {
    fn should_retry(&self, outcome: Outcome<'_>, attempt: u32, ctx: &RequestContext) -> bool;
}

/// Proposes a wait before the next attempt. `None` defers to the next strategy.
#[async_trait]
pub trait RetryDelayStrategy: Send + Sync + 'static {
    async fn delay(&self, outcome: Outcome<'_>, attempt: u32) -> Option<Duration>;
}

/// Predicate built from a closure.
pub struct PredicateFn<F>(F);

pub fn predicate_fn<F>(f: F) -> PredicateFn<F>
where
    F: Fn(Outcome<'_>, u32, &RequestContext) -> bool + Send + Sync + 'static,
{
    PredicateFn(f)
}

impl<F> RetryPredicate for PredicateFn<F>
where
    F: Fn(Outcome<'_>, u32, &RequestContext) -> bool + Send + Sync + 'static,
{
    fn should_retry(&self, outcome: Outcome<'_>, attempt: u32, ctx: &RequestContext) -> bool {
        (self.0)(outcome, attempt, ctx)
    }
}

/// Synchronous delay strategy built from a closure.
pub struct DelayFn<F>(F);

pub fn delay_fn<F>(f: F) -> DelayFn<F>
where
    F: Fn(Outcome<'_>, u32) -> Option<Duration> + Send + Sync + 'static,
{
    DelayFn(f)
}

#[async_trait]
impl<F> RetryDelayStrategy for DelayFn<F>
where
    F: Fn(Outcome<'_>, u32) -> Option<Duration> + Send + Sync + 'static,
{
    async fn delay(&self, outcome: Outcome<'_>, attempt: u32) -> Option<Duration> {
        (self.0)(outcome, attempt)
    }
}

/// Retries any error except cancellation and open circuits.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyError;

impl RetryPredicate for AnyError {
    fn should_retry(&self, outcome: Outcome<'_>, _attempt: u32, _ctx: &RequestContext) -> bool {
        match outcome.error() {
            Some(PipelineError::Cancelled) | Some(PipelineError::CircuitOpen { .. }) => false,
            Some(_) => true,
            None => false,
        }
    }
}

/// HTTP-aware predicate.
///
/// - Only methods in `methods` are retried (idempotent methods by default)
/// - Requests with bodies larger than `max_body_bytes` are never retried
/// - Responses are retried when their status is in `statuses`
/// - Transport errors and timeouts are retried; breaker and cancellation errors are not
#[derive(Debug, Clone)]
pub struct HttpRetryPredicate {
    methods: HashSet<Method>,
    statuses: HashSet<u16>,
    max_body_bytes: usize,
}

impl Default for HttpRetryPredicate {
    fn default() -> Self {
        Self {
            methods: [
                Method::GET,
                Method::HEAD,
                Method::OPTIONS,
                Method::TRACE,
                Method::PUT,
                Method::DELETE,
            ]
            .into_iter()
            .collect(),
            statuses: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl HttpRetryPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Share and tag the predicate for introspection.
    pub fn shared(self) -> Arc<Self> {
        let mut methods: Vec<String> = self.methods.iter().map(|m| m.to_string()).collect();
        methods.sort();
        let mut statuses: Vec<u16> = self.statuses.iter().copied().collect();
        statuses.sort_unstable();
        let max_body_bytes = self.max_body_bytes;

        let arc = Arc::new(self);
        inspect::tag(
            &arc,
            "http_retry_predicate",
            Kind::Predicate,
            PolicyOptions::HttpPredicate {
                methods,
                statuses,
                max_body_bytes,
            },
        );
        arc
    }
}

impl RetryPredicate for HttpRetryPredicate {
    fn should_retry(&self, outcome: Outcome<'_>, _attempt: u32, ctx: &RequestContext) -> bool {
        if !self.methods.contains(ctx.method()) || ctx.body_len() > self.max_body_bytes {
            return false;
        }
        match outcome {
            Outcome::Response(resp) => self.statuses.contains(&resp.status()),
            Outcome::Error(PipelineError::Transport(_)) | Outcome::Error(PipelineError::Timeout(_)) => true,
            Outcome::Error(_) => false,
        }
    }
}

/// Caps retries to a fraction of the calls seen in a rolling window.
///
/// A floor of `min_retries` per window keeps low-traffic clients able to retry.
pub struct RetryBudget {
    ratio: f32,
    min_retries: u32,
    window: Duration,
    state: Mutex<BudgetWindow>,
}

struct BudgetWindow {
    started: Instant,
    requests: u64,
    retries: u64,
}

impl RetryBudget {
    pub fn new(ratio: f32, min_retries: u32) -> Self {
        Self::with_window(ratio, min_retries, Duration::from_secs(10))
    }

    pub fn with_window(ratio: f32, min_retries: u32, window: Duration) -> Self {
        Self {
            ratio: ratio.clamp(0.0, 1.0),
            min_retries,
            window,
            state: Mutex::new(BudgetWindow {
                started: Instant::now(),
                requests: 0,
                retries: 0,
            }),
        }
    }

    fn roll(&self, state: &mut BudgetWindow) {
        let now = Instant::now();
        if now.duration_since(state.started) >= self.window {
            state.started = now;
            state.requests = 0;
            state.retries = 0;
        }
    }

    /// Count one original (non-retry) call.
    pub fn record_request(&self) {
        let mut state = self.state.lock().expect("retry budget mutex poisoned");
        self.roll(&mut state);
        state.requests += 1;
    }

    /// Spend one retry if the budget allows it.
    pub fn try_withdraw(&self) -> bool {
        let mut state = self.state.lock().expect("retry budget mutex poisoned");
        self.roll(&mut state);
        let allowed = ((state.requests as f64) * self.ratio as f64).floor() as u64;
        if state.retries < allowed.max(self.min_retries as u64) {
            state.retries += 1;
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for RetryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryBudget")
            .field("ratio", &self.ratio)
            .field("min_retries", &self.min_retries)
            .finish()
    }
}

/// Settings for the retry engine.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Wait used when no strategy proposes one.
    pub fallback_delay: Duration,
    pub budget: Option<Arc<RetryBudget>>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            fallback_delay: Duration::ZERO,
            budget: None,
        }
    }
}

/// The retry policy.
pub struct Retry {
    predicate: Arc<dyn RetryPredicate>,
    strategies: Vec<Arc<dyn RetryDelayStrategy>>,
    options: RetryOptions,
}

/// Build a tagged retry policy.
pub fn retry(
    predicate: Arc<dyn RetryPredicate>,
    strategies: Vec<Arc<dyn RetryDelayStrategy>>,
    options: RetryOptions,
) -> Arc<Retry> {
    let mut children: Vec<Metadata> = vec![inspect::describe_or_anonymous(&predicate, Kind::Predicate)];
    children.extend(
        strategies
            .iter()
            .map(|s| inspect::describe_or_anonymous(s, Kind::Strategy)),
    );
    let meta = PolicyOptions::Retry {
        max_attempts: options.max_attempts,
        fallback_delay_ms: options.fallback_delay.as_millis() as u64,
        budgeted: options.budget.is_some(),
    };

    let arc = Arc::new(Retry {
        predicate,
        strategies,
        options,
    });
    inspect::tag_with_children(&arc, "retry", Kind::Policy, meta, children);
    arc
}

impl Retry {
    pub fn builder(predicate: Arc<dyn RetryPredicate>) -> RetryBuilder {
        RetryBuilder {
            predicate,
            strategies: Vec::new(),
            options: RetryOptions::default(),
        }
    }

    /// First proposed delay in strategy order, else the fallback.
    async fn next_delay(&self, outcome: Outcome<'_>, attempt: u32) -> Duration {
        for strategy in &self.strategies {
            if let Some(delay) = strategy.delay(outcome, attempt).await {
                return delay;
            }
        }
        self.options.fallback_delay
    }
}

#[async_trait]
impl Policy for Retry {
    async fn handle(&self, ctx: RequestContext, next: Next) -> Result<Response> {
        if let Some(budget) = &self.options.budget {
            budget.record_request();
        }

        let mut attempt: u32 = 0;
        loop {
            let result = next.run(ctx.clone()).await;
            let outcome = Outcome::from_result(&result);

            if !self.predicate.should_retry(outcome, attempt, &ctx) {
                return result;
            }
            if attempt + 1 >= self.options.max_attempts {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    attempts = attempt + 1,
                    "Retries exhausted"
                );
                metrics::record_retries_exhausted();
                return result;
            }
            if let Some(budget) = &self.options.budget {
                if !budget.try_withdraw() {
                    tracing::warn!(request_id = %ctx.request_id(), attempt, "Retry budget exhausted");
                    return result;
                }
            }

            let delay = self.next_delay(outcome, attempt).await;
            tracing::debug!(
                request_id = %ctx.request_id(),
                attempt,
                delay = ?delay,
                status = ?outcome.response().map(Response::status),
                error = ?outcome.error(),
                "Retrying request"
            );
            metrics::record_retry(attempt + 1);

            tokio::select! {
                biased;
                _ = ctx.cancellation().cancelled() => return Err(PipelineError::Cancelled),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// Builder for [`Retry`].
pub struct RetryBuilder {
    predicate: Arc<dyn RetryPredicate>,
    strategies: Vec<Arc<dyn RetryDelayStrategy>>,
    options: RetryOptions,
}

impl RetryBuilder {
    /// Append a delay strategy. Strategies are consulted in insertion order.
    pub fn delay<S: RetryDelayStrategy>(mut self, strategy: Arc<S>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.options.max_attempts = max_attempts;
        self
    }

    pub fn fallback_delay(mut self, delay: Duration) -> Self {
        self.options.fallback_delay = delay;
        self
    }

    pub fn budget(mut self, budget: Arc<RetryBudget>) -> Self {
        self.options.budget = Some(budget);
        self
    }

    pub fn build(self) -> Arc<Retry> {
        retry(self.predicate, self.strategies, self.options)
    }
}
