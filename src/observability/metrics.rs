//! Metrics collection.
//!
//! # Metrics
//! - `pipeline_calls_total` (counter): calls by method and outcome
//! - `pipeline_call_duration_seconds` (histogram): end-to-end latency
//! - `pipeline_retries_total` (counter): scheduled retries by attempt
//! - `pipeline_retries_exhausted_total` (counter): calls that ran out of attempts
//! - `pipeline_breaker_transitions_total` (counter): by breaker and target state
//! - `pipeline_breaker_rejections_total` (counter): fast failures by breaker
//! - `pipeline_throttle_wait_seconds` (histogram): time spent waiting for a token
//! - `pipeline_dedupe_total` (counter): by outcome (leader, joined, bypass)
//!
//! # Design Decisions
//! - Thin helpers so call sites never spell metric names
//! - Outcome labels are a closed set of static strings

use std::time::{Duration, Instant};

use crate::error::PipelineError;

/// Outcome label for a completed response.
pub fn outcome_status(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

/// Outcome label for a failed call.
pub fn outcome_error(err: &PipelineError) -> &'static str {
    match err {
        PipelineError::Transport(_) => "transport_error",
        PipelineError::CircuitOpen { .. } => "circuit_open",
        PipelineError::Cancelled => "cancelled",
        PipelineError::Timeout(_) => "timeout",
        PipelineError::Policy { .. } => "policy_error",
    }
}

pub fn record_call(method: &str, outcome: &'static str, start: Instant) {
    ::metrics::counter!(
        "pipeline_calls_total",
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!("pipeline_call_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(attempt: u32) {
    ::metrics::counter!("pipeline_retries_total", "attempt" => attempt.to_string()).increment(1);
}

pub fn record_retries_exhausted() {
    ::metrics::counter!("pipeline_retries_exhausted_total").increment(1);
}

pub fn record_breaker_transition(name: &str, to: &'static str) {
    ::metrics::counter!(
        "pipeline_breaker_transitions_total",
        "breaker" => name.to_string(),
        "to" => to
    )
    .increment(1);
}

pub fn record_breaker_rejection(name: &str) {
    ::metrics::counter!("pipeline_breaker_rejections_total", "breaker" => name.to_string())
        .increment(1);
}

pub fn record_throttle_wait(waited: Duration) {
    ::metrics::histogram!("pipeline_throttle_wait_seconds").record(waited.as_secs_f64());
}

pub fn record_dedupe(outcome: &'static str) {
    ::metrics::counter!("pipeline_dedupe_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_buckets() {
        assert_eq!(outcome_status(204), "2xx");
        assert_eq!(outcome_status(304), "3xx");
        assert_eq!(outcome_status(429), "4xx");
        assert_eq!(outcome_status(503), "5xx");
        assert_eq!(outcome_status(99), "other");
    }

    #[test]
    fn error_labels() {
        assert_eq!(outcome_error(&PipelineError::Cancelled), "cancelled");
        assert_eq!(
            outcome_error(&PipelineError::transport("refused")),
            "transport_error"
        );
    }
}
