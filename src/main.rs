//! callguard-probe
//!
//! Drives a burst of requests through a configured pipeline that ends in a
//! simulated flaky upstream, then prints a JSON summary of what happened
//! together with the pipeline's introspection tree.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use futures_util::stream::{self, StreamExt};
use http::Method;
use serde_json::json;

use callguard::config::{load_config, PipelineConfig};
use callguard::connector::{ConnectorTransport, SimulatedConnector};
use callguard::observability::{logging, metrics};
use callguard::{Pipeline, RequestContext};

#[derive(Parser)]
#[command(name = "callguard-probe")]
#[command(about = "Exercise a callguard pipeline against a simulated upstream", long_about = None)]
struct Cli {
    /// Pipeline configuration (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Total requests to issue.
    #[arg(short = 'n', long, default_value_t = 100)]
    requests: usize,

    /// Requests in flight at once.
    #[arg(short = 'j', long, default_value_t = 10)]
    concurrency: usize,

    /// Spread requests over this many distinct paths.
    #[arg(long, default_value_t = 4)]
    distinct_paths: usize,

    /// Probability of a simulated transport failure.
    #[arg(long, default_value_t = 0.1)]
    failure_rate: f64,

    /// Probability of a simulated 503 with a Retry-After hint.
    #[arg(long, default_value_t = 0.05)]
    error_rate: f64,

    /// Mean simulated latency in milliseconds.
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// Base URL requested.
    #[arg(short, long, default_value = "https://sim.local/items")]
    url: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    logging::init(&config.observability);

    tracing::info!(
        requests = cli.requests,
        concurrency = cli.concurrency,
        failure_rate = cli.failure_rate,
        error_rate = cli.error_rate,
        "callguard-probe starting"
    );

    let transport = ConnectorTransport::new(
        SimulatedConnector::new()
            .with_failure_rate(cli.failure_rate)
            .with_error_status_rate(cli.error_rate)
            .with_latency(Duration::from_millis(cli.latency_ms)),
    )
    .shared("simulated_connector");
    let pipeline = Pipeline::from_config(&config, transport.clone())?;

    let distinct = cli.distinct_paths.max(1);
    let mut contexts = Vec::with_capacity(cli.requests);
    for i in 0..cli.requests {
        let url = format!("{}/{}", cli.url.trim_end_matches('/'), i % distinct);
        contexts.push(RequestContext::parse(Method::GET, &url)?);
    }

    let started = Instant::now();
    let outcomes: Vec<&'static str> = stream::iter(contexts)
        .map(|ctx| {
            let pipeline = pipeline.clone();
            async move {
                match pipeline.call(ctx).await {
                    Ok(resp) => metrics::outcome_status(resp.status()),
                    Err(e) => metrics::outcome_error(&e),
                }
            }
        })
        .buffer_unordered(cli.concurrency.max(1))
        .collect()
        .await;
    let elapsed = started.elapsed();

    let mut tally: BTreeMap<&'static str, usize> = BTreeMap::new();
    for outcome in outcomes {
        *tally.entry(outcome).or_default() += 1;
    }

    let summary = json!({
        "requests": cli.requests,
        "upstream_requests": transport.connector().requests(),
        "elapsed_ms": elapsed.as_millis() as u64,
        "outcomes": tally,
        "pipeline": pipeline.describe(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Probe complete");
    Ok(())
}
