//! Guarded REST client implementation.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::batch::RequestBatcher;
use crate::config::GateConfig;
use crate::error::{GateError, UpstreamError};
use crate::rate_limit::{QuotaLimiter, QuotaStats, TtlCache};
use crate::retry::RetryOrchestrator;

/// Maximum number of cached responses.
const CACHE_CAPACITY: usize = 1_024;

/// A REST client whose every request passes through a quota limiter and a
/// retry orchestrator.
///
/// The client owns its limiter, batcher and retry policy; nothing is shared
/// implicitly. To make several clients draw from one quota, hand them the
/// same limiter through [`GuardedRestClientBuilder::limiter`].
///
/// # Example
///
/// ```rust,no_run
/// use quota_gate::rest::GuardedRestClient;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = GuardedRestClient::new("https://api.example.com/v1")?;
///
///     let symbols = vec!["AAPL", "MSFT", "GOOG"];
///     let quotes: Vec<serde_json::Value> = client
///         .get_batched("/markets/quotes", "symbols", &symbols)
///         .await?;
///     println!("{} batches, {:?}", quotes.len(), client.stats());
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct GuardedRestClient {
    http_client: ClientWithMiddleware,
    base_url: String,
    limiter: Arc<QuotaLimiter>,
    retry: RetryOrchestrator,
    batcher: RequestBatcher,
    cache: Option<Arc<Mutex<TtlCache<String, String>>>>,
}

impl GuardedRestClient {
    /// Create a client with default settings.
    pub fn new(base_url: impl Into<String>) -> Result<Self, GateError> {
        Self::builder(base_url).build()
    }

    /// Create a new client builder.
    pub fn builder(base_url: impl Into<String>) -> GuardedRestClientBuilder {
        GuardedRestClientBuilder::new(base_url)
    }

    /// The limiter guarding this client.
    pub fn limiter(&self) -> &Arc<QuotaLimiter> {
        &self.limiter
    }

    /// The batcher used by [`get_batched`](Self::get_batched).
    pub fn batcher(&self) -> &RequestBatcher {
        &self.batcher
    }

    /// Usage snapshot of the underlying limiter.
    pub fn stats(&self) -> QuotaStats {
        self.limiter.stats()
    }

    /// Make a guarded GET request and parse the JSON body.
    ///
    /// With caching enabled, a fresh cached body is returned without touching
    /// the network or the quota.
    pub async fn get_json<T, Q>(&self, endpoint: &str, params: &Q) -> Result<T, GateError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = self.build_url(endpoint, params)?;

        if let Some(body) = self.cached(&url) {
            debug!(%url, "Serving response from cache");
            self.limiter.record_cache_hit();
            return parse_body(&body);
        }

        let body = self
            .retry
            .execute(|| self.fetch(&url), Some(self.limiter.as_ref()))
            .await?;

        if let Some(cache) = &self.cache {
            lock(cache).insert(url, body.clone());
        }
        parse_body(&body)
    }

    /// Fetch `symbols` in provider-sized batches.
    ///
    /// Each batch is sent as one guarded request with the batch joined by
    /// commas under `symbol_param`. Results are returned in batch order; the
    /// first failing batch aborts the rest.
    pub async fn get_batched<T, S>(
        &self,
        endpoint: &str,
        symbol_param: &str,
        symbols: &[S],
    ) -> Result<Vec<T>, GateError>
    where
        T: DeserializeOwned,
        S: AsRef<str>,
    {
        let batches = self.batcher.batch(symbols);
        debug!(
            endpoint,
            symbols = symbols.len(),
            batches = batches.len(),
            "Fetching batched request"
        );

        let mut results = Vec::with_capacity(batches.len());
        for batch in batches {
            let joined = batch
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<&str>>()
                .join(",");
            results.push(self.get_json(endpoint, &[(symbol_param, joined)]).await?);
        }
        Ok(results)
    }

    /// Send one GET and return the body of a successful response.
    async fn fetch(&self, url: &str) -> Result<String, GateError> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(GateError::Upstream(UpstreamError::from_response(status, body)));
        }
        Ok(body)
    }

    fn build_url<Q>(&self, endpoint: &str, params: &Q) -> Result<String, GateError>
    where
        Q: Serialize + ?Sized,
    {
        let query_string = serde_urlencoded::to_string(params)
            .map_err(|e| GateError::InvalidResponse(e.to_string()))?;
        Ok(if query_string.is_empty() {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.base_url, endpoint, query_string)
        })
    }

    fn cached(&self, url: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;
        lock(cache).get(&url.to_string())
    }
}

impl std::fmt::Debug for GuardedRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedRestClient")
            .field("base_url", &self.base_url)
            .field("retry", self.retry.policy())
            .field("max_batch_size", &self.batcher.max_batch_size())
            .field("cache_enabled", &self.cache.is_some())
            .finish()
    }
}

/// Builder for [`GuardedRestClient`].
pub struct GuardedRestClientBuilder {
    base_url: String,
    config: GateConfig,
    limiter: Option<Arc<QuotaLimiter>>,
    cache_ttl: Option<Duration>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl GuardedRestClientBuilder {
    /// Create a new builder with default settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            config: GateConfig::default(),
            limiter: None,
            cache_ttl: None,
            timeout: None,
            user_agent: None,
        }
    }

    /// Set quota, retry and batching options.
    pub fn config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing limiter instead of building one from the config.
    pub fn limiter(mut self, limiter: Arc<QuotaLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Cache successful responses for `ttl`.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Set a per-request timeout. Timeouts are retried.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<GuardedRestClient, GateError> {
        self.config.validate()?;
        let base_url = Url::parse(&self.base_url)?
            .as_str()
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("quota-gate/{}", env!("CARGO_PKG_VERSION")));
        let header_value = HeaderValue::from_str(&user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static("quota-gate"));
        headers.insert(USER_AGENT, header_value);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut reqwest_builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = self.timeout {
            reqwest_builder = reqwest_builder.timeout(timeout);
        }
        let reqwest_client = reqwest_builder.build()?;

        // Retries are handled by the orchestrator so every attempt is counted
        // against the quota.
        let http_client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();

        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(QuotaLimiter::new(self.config.quota_config())));
        let cache = self
            .cache_ttl
            .map(|ttl| Arc::new(Mutex::new(TtlCache::new(ttl, CACHE_CAPACITY))));

        Ok(GuardedRestClient {
            http_client,
            base_url,
            limiter,
            retry: RetryOrchestrator::new(self.config.retry_policy()),
            batcher: RequestBatcher::new(self.config.max_batch_size),
            cache,
        })
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, GateError> {
    serde_json::from_str(body).map_err(|e| {
        GateError::InvalidResponse(format!("Failed to parse response: {}. Body: {}", e, body))
    })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
