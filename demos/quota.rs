//! Example: Quota limiter, batching and retry without any network.
//!
//! Run with: cargo run --example quota
//!
//! Set `RUST_LOG=quota_gate=debug` to see throttling decisions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use quota_gate::batch::batch_quotes;
use quota_gate::rate_limit::{QuotaConfig, QuotaLimiter};
use quota_gate::retry::{RetryOrchestrator, RetryPolicy};
use quota_gate::{GateError, UpstreamError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), GateError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Two requests per second; the third caller waits for the window.
    let limiter = Arc::new(QuotaLimiter::new(QuotaConfig::new(2, 60, 1_000)));
    let start = Instant::now();
    for i in 1..=5 {
        let waited = limiter.await_slot().await?;
        println!(
            "request {} admitted at {:>4}ms (waited {:?})",
            i,
            start.elapsed().as_millis(),
            waited
        );
    }

    // Split a large symbol list into provider-sized requests.
    let symbols: Vec<String> = (0..120).map(|i| format!("SYM{i}")).collect();
    let batches = batch_quotes(&symbols, 50);
    let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
    println!("120 symbols -> batch sizes {:?}", sizes);

    // A call that times out twice before succeeding.
    let retry = RetryOrchestrator::new(RetryPolicy {
        base_delay: Duration::from_millis(200),
        ..RetryPolicy::default()
    });
    let mut attempts = 0;
    let quote = retry
        .execute(
            || {
                attempts += 1;
                let attempt = attempts;
                async move {
                    if attempt < 3 {
                        Err(GateError::Upstream(UpstreamError::from_message(
                            "read timed out",
                        )))
                    } else {
                        Ok("AAPL 187.44")
                    }
                }
            },
            Some(&limiter),
        )
        .await?;
    println!("quote after {} attempts: {}", attempts, quote);

    for (key, value) in limiter.stats().to_map() {
        println!("{key:>20}: {value}");
    }

    Ok(())
}
