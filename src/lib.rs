//! # Quota Gate
//!
//! Client-side admission control for quota-limited market-data and broker
//! APIs.
//!
//! ## Features
//!
//! - Per-second, per-minute and per-day quotas enforced with sliding-window logs
//! - FIFO admission of waiting callers, from async tasks and plain threads alike
//! - Retry with exponential backoff on rate-limit, timeout and 5xx failures
//! - Splitting of bulk symbol lookups into provider-sized batches
//! - A guarded REST client tying the three together, with optional response caching
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quota_gate::rest::GuardedRestClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = GuardedRestClient::new("https://api.example.com/v1")?;
//!     let clock: serde_json::Value = client.get_json("/markets/clock", &[("delayed", "false")]).await?;
//!     println!("Market clock: {:?}", clock);
//!     println!("Usage: {:?}", client.stats().to_map());
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod rest;
pub mod retry;

// Re-export commonly used types at crate root
pub use error::{FailureKind, GateError, QuotaExceeded, UpstreamError};
pub use rate_limit::{QuotaConfig, QuotaLimiter};
pub use retry::{RetryOrchestrator, RetryPolicy, Retryable};

/// Result type alias using GateError
pub type Result<T> = std::result::Result<T, GateError>;
