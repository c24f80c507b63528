//! Error types shared by every policy in the pipeline.
//!
//! # Design Decisions
//! - One error enum flows through the whole chain so policies compose
//! - `Clone` so a single outcome can be handed to every dedupe joiner
//! - Breaker short-circuits are a distinct variant, never a transport error

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Opaque failure raised by a transport or connector.
///
/// The core never looks inside it; it is reference counted so that a single
/// failure can be observed by several callers.
#[derive(Clone)]
pub struct TransportError(Arc<dyn StdError + Send + Sync>);

impl TransportError {
    /// Wrap any error coming from the wire layer.
    pub fn new<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    /// Build a transport error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Arc::new(MessageError(message.into())))
    }

    /// Borrow the underlying error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Debug for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for MessageError {}

/// Errors that can surface from a pipeline call.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The transport failed (connection refused, reset, DNS, ...).
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// A circuit breaker rejected the call without reaching downstream.
    #[error("circuit '{name}' is open, retry in {retry_after:?}")]
    CircuitOpen {
        /// Name of the breaker that rejected the call.
        name: String,
        /// Instant at which the breaker admits a trial call.
        retry_at: Instant,
        /// Remaining cooldown at the time of rejection.
        retry_after: Duration,
    },

    /// The caller cancelled the request while it was suspended.
    #[error("request cancelled")]
    Cancelled,

    /// The inner chain exceeded its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A policy hit an internal defect.
    #[error("policy '{policy}' failed: {message}")]
    Policy { policy: String, message: String },
}

impl PipelineError {
    /// Shorthand for a transport failure built from a message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(TransportError::msg(message))
    }

    /// True when the error comes from an open circuit breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// True when the caller cancelled the request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<TransportError> for PipelineError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(TransportError::new(err))
    }
}

/// Result type for pipeline calls.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_keeps_message() {
        let err = PipelineError::transport("connection reset");
        assert_eq!(err.to_string(), "transport error: connection reset");
        assert!(!err.is_circuit_open());
    }

    #[test]
    fn io_errors_become_transport_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: PipelineError = io.into();
        let PipelineError::Transport(transport) = err else {
            panic!("expected a transport error, got {err:?}");
        };
        let io = transport
            .inner()
            .downcast_ref::<std::io::Error>()
            .expect("inner error is the original io::Error");
        assert_eq!(io.kind(), std::io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn circuit_open_is_recognizable() {
        let err = PipelineError::CircuitOpen {
            name: "billing".into(),
            retry_at: Instant::now(),
            retry_after: Duration::from_secs(3),
        };
        assert!(err.is_circuit_open());
        assert!(err.to_string().contains("billing"));
    }
}
