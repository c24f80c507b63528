//! Policy pipeline subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline::call(ctx)
//!     → P1.handle(ctx, next)
//!         → P2.handle(ctx', next)
//!             → ... → Transport::call(ctxN)
//!         ← Response / PipelineError
//!     ← unwinds through the same policies
//! ```
//!
//! # Design Decisions
//! - Policies are one-method async traits; closures adapt via `policy_fn`
//! - `Next` owns its slice of the chain, so it is `'static` and reusable
//! - Composition is static: build once, call concurrently from many tasks

pub mod composer;
pub mod policy;
pub mod service;

pub use composer::{Pipeline, PipelineBuilder};
pub use policy::{policy_fn, transport_fn, Next, Policy, PolicyFn, Transport, TransportFn};
pub use service::ServiceTransport;
