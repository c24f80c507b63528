//! Data model flowing through the pipeline.
//!
//! # Data Flow
//! ```text
//! caller builds RequestContext
//!     → each policy reads it, or derives a modified copy (with_* builders)
//!     → transport turns it into a Response
//!     → Response unwinds back through the same policies
//! ```
//!
//! # Design Decisions
//! - Contexts are values: a policy that changes one works on its own clone,
//!   earlier policies keep the original
//! - Headers are `http::HeaderMap` on both sides, so lookups ignore case
//! - Cancellation travels with the context so every suspension point can see it

pub mod request;
pub mod response;

pub use request::{Options, RequestContext};
pub use response::Response;
