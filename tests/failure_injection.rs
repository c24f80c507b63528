//! Failure injection tests for assembled pipelines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use callguard::config::{load_config_str, PipelineConfig};
use callguard::resilience::{
    circuit_breaker, delay_fn, AnyError, BreakerOptions, CircuitState, Retry,
};
use callguard::{Pipeline, PipelineError, Response};
use http::header::{HeaderValue, RETRY_AFTER};
use tokio::time::Instant;

mod common;

#[tokio::test(start_paused = true)]
async fn test_retry_on_failure() {
    let (transport, calls) = common::programmable_transport(|n| async move {
        if n < 2 {
            Ok(Response::new(503))
        } else {
            Ok(Response::new(200).with_data("Success"))
        }
    });

    let pipeline = Pipeline::from_config(&PipelineConfig::default(), transport).unwrap();
    let resp = pipeline.call(common::get("https://api.test/items")).await.unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(&resp.data()[..], b"Success");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_returns_last_response() {
    let (transport, calls) = common::fixed_status(502);

    let pipeline = Pipeline::from_config(&PipelineConfig::default(), transport).unwrap();
    let resp = pipeline.call(common::get("https://api.test/items")).await.unwrap();

    assert_eq!(resp.status(), 502);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_non_idempotent_requests_are_not_retried() {
    let (transport, calls) = common::fixed_status(503);

    let pipeline = Pipeline::from_config(&PipelineConfig::default(), transport).unwrap();
    let resp = pipeline.call(common::post("https://api.test/orders")).await.unwrap();

    assert_eq!(resp.status(), 503);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_wait_hint_is_honored() {
    let (transport, calls) = common::programmable_transport(|n| async move {
        if n == 0 {
            Ok(Response::new(429).with_header(RETRY_AFTER, HeaderValue::from(2u64)))
        } else {
            Ok(Response::new(200))
        }
    });

    let pipeline = Pipeline::from_config(&PipelineConfig::default(), transport).unwrap();
    let start = Instant::now();
    let resp = pipeline.call(common::get("https://api.test/limited")).await.unwrap();
    let waited = start.elapsed();

    assert_eq!(resp.status(), 200);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(waited >= Duration::from_secs(2), "waited {:?}", waited);
    assert!(waited < Duration::from_millis(2100), "waited {:?}", waited);
}

#[tokio::test(start_paused = true)]
async fn test_wait_hint_is_clamped_by_config() {
    let config = load_config_str(
        r#"
        [retry_after]
        max_wait_ms = 500
        "#,
    )
    .unwrap();
    let (transport, _calls) = common::programmable_transport(|n| async move {
        if n == 0 {
            Ok(Response::new(503).with_header(RETRY_AFTER, HeaderValue::from(120u64)))
        } else {
            Ok(Response::new(200))
        }
    });

    let pipeline = Pipeline::from_config(&config, transport).unwrap();
    let start = Instant::now();
    pipeline.call(common::get("https://api.test/busy")).await.unwrap();

    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(500) && waited < Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn test_first_proposing_strategy_wins() {
    let (transport, calls) = common::programmable_transport(|n| async move {
        if n == 0 {
            Err(PipelineError::transport("connection refused"))
        } else {
            Ok(Response::new(200))
        }
    });

    let retry = Retry::builder(Arc::new(AnyError))
        .delay(Arc::new(delay_fn(|_outcome, _attempt| None)))
        .delay(Arc::new(delay_fn(|_outcome, _attempt| {
            Some(Duration::from_millis(500))
        })))
        .delay(Arc::new(delay_fn(|_outcome, _attempt| {
            Some(Duration::from_secs(60))
        })))
        .build();
    let pipeline = Pipeline::builder().policy(retry).boxed_transport(transport);

    let start = Instant::now();
    pipeline.call(common::get("https://api.test/x")).await.unwrap();

    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(500) && waited < Duration::from_millis(510));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_lifecycle() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let (transport, calls) = common::programmable_transport(move |_| {
        let up = flag.load(Ordering::SeqCst);
        async move {
            if up {
                Ok(Response::new(200))
            } else {
                Err(PipelineError::transport("connection reset"))
            }
        }
    });

    let breaker = circuit_breaker(
        "inventory",
        BreakerOptions {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(1),
            ..Default::default()
        },
    );
    let pipeline = Pipeline::builder()
        .policy(breaker.clone())
        .boxed_transport(transport);

    for _ in 0..3 {
        let err = pipeline.call(common::get("https://inventory.test/")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Transport(_)));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // Fails fast without reaching downstream.
    let err = pipeline.call(common::get("https://inventory.test/")).await.unwrap_err();
    assert!(err.is_circuit_open());
    match err {
        PipelineError::CircuitOpen { name, retry_after, .. } => {
            assert_eq!(name, "inventory");
            assert!(retry_after <= Duration::from_secs(1));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    tokio::time::advance(Duration::from_millis(1001)).await;
    healthy.store(true, Ordering::SeqCst);

    let resp = pipeline.call(common::get("https://inventory.test/")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_sees_one_failure_per_logical_call() {
    let config = load_config_str(
        r#"
        [circuit_breaker]
        name = "payments"
        failure_threshold = 2

        [retry]
        max_attempts = 4
        "#,
    )
    .unwrap();
    let (transport, calls) =
        common::programmable_transport(|_| async { Err(PipelineError::transport("timeout")) });
    let pipeline = Pipeline::from_config(&config, transport).unwrap();

    // Each logical call makes 4 attempts but counts once against the breaker.
    assert!(pipeline.call(common::get("https://pay.test/")).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(pipeline.call(common::get("https://pay.test/")).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 8);

    let err = pipeline.call(common::get("https://pay.test/")).await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), 8);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_covers_all_attempts() {
    let config = load_config_str(
        r#"
        [timeout]
        request_ms = 250

        [retry]
        max_attempts = 10
        base_delay_ms = 100
        max_delay_ms = 100
        "#,
    )
    .unwrap();
    let (transport, _calls) = common::fixed_status(503);
    let pipeline = Pipeline::from_config(&config, transport).unwrap();

    let err = pipeline.call(common::get("https://slow.test/")).await.unwrap_err();
    assert!(matches!(err, PipelineError::Timeout(d) if d == Duration::from_millis(250)));
}
