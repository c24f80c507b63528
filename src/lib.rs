//! Composable policy pipeline for outbound API calls.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller ──▶ Pipeline::call(ctx)
//!                 │
//!                 ▼
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ timeout ─▶ dedupe ─▶ circuit breaker ─▶ retry ─▶ throttle ─▶ │──▶ Transport
//!   │                                          │                   │    (Connector)
//!   │                              predicate + delay strategies    │
//!   │                              (Retry-After, backoff)          │
//!   └──────────────────────────────────────────────────────────────┘
//!                 ▲
//!   inspect: side-table metadata describing every piece of the chain
//! ```
//!
//! Every cross-cutting concern is a [`Policy`]: it receives the request
//! context and a [`Next`] handle for the rest of the chain. Policies keep
//! their own state (breaker counters, bucket tokens, in-flight maps) across
//! calls, which is how resilience state persists between requests.

// Data model and composition
pub mod context;
pub mod error;
pub mod pipeline;

// Policies
pub mod resilience;
pub mod traffic;

// Boundaries and cross-cutting concerns
pub mod config;
pub mod connector;
pub mod inspect;
pub mod observability;

pub use config::PipelineConfig;
pub use connector::{Connector, ConnectorTransport};
pub use context::{RequestContext, Response};
pub use error::{PipelineError, Result, TransportError};
pub use pipeline::{policy_fn, transport_fn, Next, Pipeline, Policy, Transport};
