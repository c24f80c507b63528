//! Singleflight deduplication.
//!
//! # Responsibilities
//! - Collapse concurrent identical requests into one upstream call
//! - Keep a key mapped to the same execution for the whole TTL window
//! - Bound the number of tracked keys
//!
//! # Design Decisions
//! - The shared call is spawned, so a cancelled caller never cancels joiners
//! - The spawned call runs with its own token, fired only when the last
//!   waiter gives up before the outcome is in; the entry is dropped with it
//! - Expiry is a min-heap swept on access; no per-entry timers
//! - What happens at `max_size` is configurable (see [`Eviction`])
//!
//! # Data Flow
//! ```text
//! call(ctx)
//!     → method not participating: straight to next
//!     → sweep expired entries
//!     → live entry for key: await its shared result
//!     → otherwise: make room, spawn next(ctx), store, await
//! ```

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use http::Method;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::{RequestContext, Response};
use crate::error::{PipelineError, Result};
use crate::inspect::{self, Kind, PolicyOptions};
use crate::observability::metrics;
use crate::pipeline::{Next, Policy};

/// Derives the dedupe key from a request.
pub type KeyFn = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;

type SharedCall = Shared<BoxFuture<'static, Result<Response>>>;

/// Behavior when a new key arrives and the map is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eviction {
    /// Drop the oldest entry to make room.
    #[default]
    OldestFirst,
    /// Leave the map alone and run the new request without deduplication.
    Bypass,
}

/// Settings for [`Dedupe`].
#[derive(Clone)]
pub struct DedupeOptions {
    /// Key derivation; `None` uses `"{METHOD} {url}"`.
    pub key_fn: Option<KeyFn>,
    pub ttl: Duration,
    /// Methods that participate. Others pass straight through.
    pub methods: Vec<Method>,
    pub max_size: usize,
    pub eviction: Eviction,
}

impl Default for DedupeOptions {
    fn default() -> Self {
        Self {
            key_fn: None,
            ttl: Duration::from_millis(1000),
            methods: vec![Method::GET, Method::HEAD],
            max_size: 1000,
            eviction: Eviction::OldestFirst,
        }
    }
}

impl fmt::Debug for DedupeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupeOptions")
            .field("key_fn", &self.key_fn.as_ref().map(|_| "custom"))
            .field("ttl", &self.ttl)
            .field("methods", &self.methods)
            .field("max_size", &self.max_size)
            .field("eviction", &self.eviction)
            .finish()
    }
}

/// Default key: method and full URL.
pub fn default_key(ctx: &RequestContext) -> String {
    format!("{} {}", ctx.method(), ctx.url())
}

struct Entry {
    seq: u64,
    call: SharedCall,
    created_at: Instant,
    interest: Arc<Interest>,
}

/// Callers still awaiting a shared call, and the token that stops it.
///
/// `waiters` only changes under the state lock.
struct Interest {
    waiters: AtomicUsize,
    cancel: CancellationToken,
}

#[derive(Default)]
struct DedupeState {
    entries: HashMap<String, Entry>,
    // (expires_at, seq, key); stale items are skipped by seq
    expiry: BinaryHeap<Reverse<(Instant, u64, String)>>,
    next_seq: u64,
}

impl DedupeState {
    /// Drop entries whose window has closed.
    fn sweep(&mut self, now: Instant) {
        while let Some(Reverse((expires_at, _, _))) = self.expiry.peek() {
            if *expires_at >= now {
                break;
            }
            if let Some(Reverse((_, seq, key))) = self.expiry.pop() {
                self.remove_if_current(&key, seq);
            }
        }
    }

    /// Remove the oldest live entry. Returns false when there is none.
    fn evict_oldest(&mut self) -> bool {
        while let Some(Reverse((_, seq, key))) = self.expiry.pop() {
            if self.remove_if_current(&key, seq) {
                tracing::debug!(key = %key, "Evicted oldest dedupe entry");
                return true;
            }
        }
        false
    }

    fn remove_if_current(&mut self, key: &str, seq: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.seq == seq => {
                self.entries.remove(key);
                true
            }
            _ => false,
        }
    }
}

/// Result of looking a key up under the lock.
enum Slot<'a> {
    Joined(Waiter<'a>, Instant),
    Leader(Waiter<'a>),
    Bypass,
}

/// One caller's claim on a shared call.
///
/// Dropping the last claim before the call finishes cancels it and forgets
/// the entry, so later callers start fresh.
struct Waiter<'a> {
    policy: &'a Dedupe,
    key: String,
    seq: u64,
    call: SharedCall,
    interest: Arc<Interest>,
}

impl<'a> Waiter<'a> {
    /// Register under the already held state lock.
    fn register(policy: &'a Dedupe, key: &str, entry: &Entry) -> Self {
        entry.interest.waiters.fetch_add(1, Ordering::Relaxed);
        Self {
            policy,
            key: key.to_string(),
            seq: entry.seq,
            call: entry.call.clone(),
            interest: entry.interest.clone(),
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let mut state = self
            .policy
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let left = self.interest.waiters.fetch_sub(1, Ordering::Relaxed) - 1;
        if left == 0 && self.call.peek().is_none() {
            state.remove_if_current(&self.key, self.seq);
            self.interest.cancel.cancel();
            tracing::debug!(key = %self.key, "Last waiter left, cancelling shared call");
            metrics::record_dedupe("abandoned");
        }
    }
}

/// Singleflight policy.
pub struct Dedupe {
    options: DedupeOptions,
    state: Mutex<DedupeState>,
}

/// Build a tagged dedupe policy.
pub fn dedupe(options: DedupeOptions) -> Arc<Dedupe> {
    let meta = PolicyOptions::Dedupe {
        ttl_ms: options.ttl.as_millis() as u64,
        methods: options.methods.iter().map(|m| m.to_string()).collect(),
        max_size: options.max_size,
    };
    let arc = Arc::new(Dedupe::new(options));
    inspect::tag(&arc, "dedupe", Kind::Policy, meta);
    arc
}

impl Dedupe {
    pub fn new(options: DedupeOptions) -> Self {
        Self {
            options,
            state: Mutex::new(DedupeState::default()),
        }
    }

    pub fn options(&self) -> &DedupeOptions {
        &self.options
    }

    /// Live entries, after dropping expired ones.
    pub fn len(&self) -> usize {
        let mut state = self.state.lock().expect("dedupe mutex poisoned");
        state.sweep(Instant::now());
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn participates(&self, method: &Method) -> bool {
        self.options.methods.iter().any(|m| m == method)
    }

    fn key_for(&self, ctx: &RequestContext) -> String {
        match &self.options.key_fn {
            Some(key_fn) => key_fn(ctx),
            None => default_key(ctx),
        }
    }

    /// Join a live entry or register a new one, all under one lock.
    fn lookup_or_start(&self, key: &str, ctx: &RequestContext, next: &Next) -> Slot<'_> {
        let now = Instant::now();
        let mut state = self.state.lock().expect("dedupe mutex poisoned");
        state.sweep(now);

        if let Some(entry) = state.entries.get(key) {
            return Slot::Joined(Waiter::register(self, key, entry), entry.created_at);
        }

        let max_size = self.options.max_size.max(1);
        if state.entries.len() >= max_size {
            match self.options.eviction {
                Eviction::OldestFirst => {
                    while state.entries.len() >= max_size {
                        if !state.evict_oldest() {
                            break;
                        }
                    }
                }
                Eviction::Bypass => return Slot::Bypass,
            }
        }

        let cancel = CancellationToken::new();
        let call = spawn_shared(next, ctx.clone().with_cancellation(cancel.clone()));
        let seq = state.next_seq;
        state.next_seq += 1;
        let entry = Entry {
            seq,
            call,
            created_at: now,
            interest: Arc::new(Interest {
                waiters: AtomicUsize::new(0),
                cancel,
            }),
        };
        let waiter = Waiter::register(self, key, &entry);
        state.entries.insert(key.to_string(), entry);
        state
            .expiry
            .push(Reverse((now + self.options.ttl, seq, key.to_string())));
        Slot::Leader(waiter)
    }
}

/// Start the rest of the chain on its own task and share its outcome.
fn spawn_shared(next: &Next, ctx: RequestContext) -> SharedCall {
    let handle = tokio::spawn(next.run(ctx));
    async move {
        match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(PipelineError::Policy {
                policy: "dedupe".to_string(),
                message: join_err.to_string(),
            }),
        }
    }
    .boxed()
    .shared()
}

#[async_trait]
impl Policy for Dedupe {
    async fn handle(&self, ctx: RequestContext, next: Next) -> Result<Response> {
        if !self.participates(ctx.method()) {
            metrics::record_dedupe("bypass");
            return next.run(ctx).await;
        }

        let key = self.key_for(&ctx);
        let waiter = match self.lookup_or_start(&key, &ctx, &next) {
            Slot::Joined(waiter, created_at) => {
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    key = %key,
                    age = ?created_at.elapsed(),
                    "Joining in-flight request"
                );
                metrics::record_dedupe("joined");
                waiter
            }
            Slot::Leader(waiter) => {
                metrics::record_dedupe("leader");
                waiter
            }
            Slot::Bypass => {
                tracing::debug!(key = %key, "Dedupe map full, bypassing");
                metrics::record_dedupe("bypass");
                return next.run(ctx).await;
            }
        };

        let call = waiter.call.clone();
        let result = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => Err(PipelineError::Cancelled),
            result = call => result,
        };
        drop(waiter);
        result
    }
}
