//! Example: Guarded REST client.
//!
//! Run with: cargo run --example guarded_client -- https://api.example.com/v1
//!
//! Options are read from `QUOTA_GATE_*` environment variables, for example
//! `QUOTA_GATE_REQUESTS_PER_SECOND=2`.

use std::time::Duration;

use quota_gate::config::GateConfig;
use quota_gate::rest::GuardedRestClient;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quota_gate=info")),
        )
        .init();

    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://api.example.com/v1".to_string());

    let config = GateConfig::from_env()?;
    println!("Using {:?}", config);

    let client = GuardedRestClient::builder(base_url)
        .config(config)
        .cache_ttl(Duration::from_secs(30))
        .timeout(Duration::from_secs(10))
        .build()?;

    let symbols = ["AAPL", "MSFT", "GOOG", "AMZN", "NVDA"];
    match client
        .get_batched::<serde_json::Value, _>("/markets/quotes", "symbols", &symbols)
        .await
    {
        Ok(batches) => println!("Received {} batch(es)", batches.len()),
        Err(e) => println!("Batched request failed: {}", e),
    }

    // Served from cache the second time.
    for _ in 0..2 {
        match client
            .get_json::<serde_json::Value, _>("/markets/clock", &[("delayed", "false")])
            .await
        {
            Ok(clock) => println!("Clock: {}", clock),
            Err(e) => println!("Clock request failed: {}", e),
        }
    }

    println!("{:#?}", client.stats());
    Ok(())
}
