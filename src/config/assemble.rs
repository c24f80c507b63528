//! Building a pipeline from configuration.
//!
//! Standard outbound order, outermost first:
//!
//! ```text
//! timeout → dedupe → circuit breaker → retry → throttle → transport
//! ```
//!
//! Dedupe sits outside the retry engine so joiners share one fully retried
//! outcome, the breaker counts one logical call once, and every attempt takes
//! a throttle token.

use std::sync::Arc;
use std::time::Duration;

use http::Method;

use crate::config::loader::ConfigError;
use crate::config::schema::{EvictionMode, PipelineConfig, RetryConfig};
use crate::config::validation::validate_config;
use crate::pipeline::{Pipeline, Transport};
use crate::resilience::{
    circuit_breaker, timeout, BreakerOptions, ExponentialBackoff, HttpRetryPredicate, OverLimit,
    Retry, RetryAfter, RetryAfterOptions, RetryBudget,
};
use crate::traffic::{dedupe, throttle, DedupeOptions, Eviction};

fn parse_methods(methods: &[String]) -> Vec<Method> {
    methods
        .iter()
        .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
        .collect()
}

fn build_retry(retry: &RetryConfig, config: &PipelineConfig) -> Arc<Retry> {
    let predicate = HttpRetryPredicate::new()
        .methods(parse_methods(&retry.retry_methods))
        .statuses(retry.retry_statuses.iter().copied())
        .max_body_bytes(retry.max_body_bytes)
        .shared();

    let mut builder = Retry::builder(predicate).max_attempts(retry.max_attempts);

    let hint = &config.retry_after;
    if hint.enabled {
        builder = builder.delay(
            RetryAfter::new(RetryAfterOptions {
                header: hint.header.clone(),
                statuses: hint.statuses.clone(),
                max_wait: hint.max_wait_ms.map(Duration::from_millis),
                over_limit: if hint.clamp {
                    OverLimit::Clamp
                } else {
                    OverLimit::Decline
                },
            })
            .shared(),
        );
    }

    builder = builder.delay(
        ExponentialBackoff::new(
            Duration::from_millis(retry.base_delay_ms),
            Duration::from_millis(retry.max_delay_ms),
        )
        .with_factor(retry.backoff_factor)
        .shared(),
    );

    if retry.budget_ratio > 0.0 {
        builder = builder.budget(Arc::new(RetryBudget::new(
            retry.budget_ratio,
            retry.budget_min_retries,
        )));
    }

    builder.build()
}

impl Pipeline {
    /// Validate `config` and assemble the enabled policies around `transport`.
    pub fn from_config(
        config: &PipelineConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Pipeline, ConfigError> {
        validate_config(config).map_err(ConfigError::Validation)?;

        let mut builder = Pipeline::builder();

        if config.timeout.enabled {
            builder = builder.policy(timeout(Duration::from_millis(config.timeout.request_ms)));
        }

        if config.dedupe.enabled {
            builder = builder.policy(dedupe(DedupeOptions {
                key_fn: None,
                ttl: Duration::from_millis(config.dedupe.ttl_ms),
                methods: parse_methods(&config.dedupe.methods),
                max_size: config.dedupe.max_size,
                eviction: match config.dedupe.eviction {
                    EvictionMode::OldestFirst => Eviction::OldestFirst,
                    EvictionMode::Bypass => Eviction::Bypass,
                },
            }));
        }

        let breaker = &config.circuit_breaker;
        if breaker.enabled {
            builder = builder.policy(circuit_breaker(
                breaker.name.clone(),
                BreakerOptions {
                    failure_threshold: breaker.failure_threshold,
                    reset_timeout: Duration::from_millis(breaker.reset_timeout_ms),
                    is_failure: None,
                },
            ));
        }

        if config.retry.enabled {
            builder = builder.policy(build_retry(&config.retry, config));
        }

        if config.throttle.enabled {
            builder = builder.policy(throttle(
                config.throttle.limit,
                Duration::from_millis(config.throttle.interval_ms),
            ));
        }

        let pipeline = builder.boxed_transport(transport);
        tracing::info!(policies = pipeline.len(), "Pipeline assembled");
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RequestContext, Response};
    use crate::inspect::Kind;
    use crate::pipeline::transport_fn;

    fn ok_transport() -> Arc<dyn Transport> {
        Arc::new(transport_fn(|_ctx: RequestContext| async move {
            Ok(Response::new(200))
        }))
    }

    fn names(pipeline: &Pipeline) -> Vec<String> {
        pipeline
            .describe()
            .children
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    #[test]
    fn default_config_order() {
        let pipeline = Pipeline::from_config(&PipelineConfig::default(), ok_transport()).unwrap();
        assert_eq!(names(&pipeline), vec!["timeout", "circuit_breaker", "retry", "anonymous"]);
    }

    #[test]
    fn everything_enabled() {
        let mut config = PipelineConfig::default();
        config.dedupe.enabled = true;
        config.throttle.enabled = true;
        config.retry.budget_ratio = 0.2;

        let pipeline = Pipeline::from_config(&config, ok_transport()).unwrap();
        assert_eq!(
            names(&pipeline),
            vec!["timeout", "dedupe", "circuit_breaker", "retry", "throttle", "anonymous"]
        );

        let tree = pipeline.describe();
        let retry = &tree.children[3];
        let parts: Vec<&str> = retry.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(parts, vec!["http_retry_predicate", "retry_after", "exponential_backoff"]);
        assert_eq!(retry.children[0].kind, Kind::Predicate);
    }

    #[test]
    fn everything_disabled_is_just_the_transport() {
        let mut config = PipelineConfig::default();
        config.timeout.enabled = false;
        config.circuit_breaker.enabled = false;
        config.retry.enabled = false;

        let pipeline = Pipeline::from_config(&config, ok_transport()).unwrap();
        assert!(pipeline.is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = PipelineConfig::default();
        config.retry.max_attempts = 0;
        let err = Pipeline::from_config(&config, ok_transport()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref e) if e.len() == 1));
    }
}
