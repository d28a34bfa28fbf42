use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quota_gate::config::GateConfig;
use quota_gate::rate_limit::{OverflowPolicy, QuotaConfig, QuotaLimiter, QuotaWindow};
use quota_gate::rest::GuardedRestClient;
use quota_gate::retry::Retryable;
use quota_gate::{FailureKind, GateError};

#[derive(Debug, Deserialize)]
struct MarketClock {
    state: String,
}

#[derive(Debug, Deserialize)]
struct QuoteBatch {
    quotes: Vec<String>,
}

fn fast_retry_config() -> GateConfig {
    GateConfig {
        base_delay: 0.01,
        max_delay: 0.05,
        ..GateConfig::default()
    }
}

fn build_client(server: &MockServer) -> GuardedRestClient {
    GuardedRestClient::builder(format!("{}/v1", server.uri()))
        .config(fast_retry_config())
        .build()
        .unwrap()
}

fn no_params() -> [(&'static str, &'static str); 0] {
    []
}

#[tokio::test]
async fn test_get_json_counts_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/markets/clock"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "state": "open"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = build_client(&server);
    let clock: MarketClock = client
        .get_json("/markets/clock", &no_params())
        .await
        .unwrap();

    assert_eq!(clock.state, "open");
    let stats = client.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.daily_request_count, 1);
    assert_eq!(stats.throttled_requests, 0);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/quotes"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/quotes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "quotes": ["AAPL"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = build_client(&server);
    let batch: QuoteBatch = assert_ok!(
        client
            .get_json("/quotes", &[("symbols", "AAPL")])
            .await
    );

    assert_eq!(batch.quotes, vec!["AAPL"]);
    // Each attempt consumed quota.
    assert_eq!(client.stats().total_requests, 3);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/quotes"))
        .respond_with(ResponseTemplate::new(404).set_body_string("symbol not found"))
        .expect(1)
        .mount(&server)
        .await;

    let client = build_client(&server);
    let err = assert_err!(
        client
            .get_json::<serde_json::Value, _>("/quotes", &[("symbols", "NOPE")])
            .await
    );

    match err {
        GateError::Upstream(e) => {
            assert_eq!(e.kind, FailureKind::ClientError(404));
            assert_eq!(e.status, Some(404));
            assert_eq!(e.message, "symbol not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_rate_limit_body_on_client_status_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/markets/clock"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Rate limit exceeded"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/markets/clock"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "state": "closed"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = build_client(&server);
    let clock: MarketClock = client
        .get_json("/markets/clock", &no_params())
        .await
        .unwrap();

    assert_eq!(clock.state, "closed");
}

#[tokio::test]
async fn test_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/markets/clock"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .expect(3)
        .mount(&server)
        .await;

    let config = GateConfig {
        max_retries: 2,
        ..fast_retry_config()
    };
    let client = GuardedRestClient::builder(format!("{}/v1", server.uri()))
        .config(config)
        .build()
        .unwrap();

    let err = client
        .get_json::<MarketClock, _>("/markets/clock", &no_params())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GateError::Upstream(ref e) if e.kind == FailureKind::ServerError(500)
    ));
    assert_eq!(err.to_string(), "Upstream error: HTTP 500: Internal Server Error");
}

#[tokio::test]
async fn test_batched_request_splits_symbols() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/quotes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "quotes": []
        })))
        .expect(3)
        .mount(&server)
        .await;

    let symbols: Vec<String> = (0..120).map(|i| format!("SYM{i:03}")).collect();
    let client = build_client(&server);
    let batches: Vec<QuoteBatch> = client
        .get_batched("/quotes", "symbols", &symbols)
        .await
        .unwrap();
    assert_eq!(batches.len(), 3);

    let requests = server.received_requests().await.unwrap();
    let sent: Vec<Vec<String>> = requests
        .iter()
        .map(|request| {
            request
                .url
                .query_pairs()
                .find(|(key, _)| key == "symbols")
                .map(|(_, value)| value.split(',').map(str::to_string).collect())
                .unwrap()
        })
        .collect();

    let sizes: Vec<usize> = sent.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![50, 50, 20]);
    assert_eq!(sent.concat(), symbols);
    assert_eq!(client.stats().total_requests, 3);
}

#[tokio::test]
async fn test_cached_response_skips_quota() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/quotes"))
        .and(query_param("symbols", "MSFT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "quotes": ["MSFT"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GuardedRestClient::builder(format!("{}/v1", server.uri()))
        .cache_ttl(Duration::from_secs(60))
        .build()
        .unwrap();

    for _ in 0..2 {
        let batch: QuoteBatch = client
            .get_json("/quotes", &[("symbols", "MSFT")])
            .await
            .unwrap();
        assert_eq!(batch.quotes, vec!["MSFT"]);
    }

    let stats = client.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.cache_hits, 1);
}

#[tokio::test]
async fn test_shared_limiter_rejects_over_quota() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/markets/clock"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "state": "open"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let limiter = Arc::new(QuotaLimiter::new(
        QuotaConfig::new(10, 100, 1)
            .with_max_wait(Duration::ZERO)
            .with_overflow(OverflowPolicy::Fail),
    ));
    let first = GuardedRestClient::builder(format!("{}/v1", server.uri()))
        .limiter(limiter.clone())
        .build()
        .unwrap();
    let second = GuardedRestClient::builder(format!("{}/v1", server.uri()))
        .limiter(limiter.clone())
        .build()
        .unwrap();

    let _: MarketClock = first
        .get_json("/markets/clock", &no_params())
        .await
        .unwrap();
    let err = second
        .get_json::<MarketClock, _>("/markets/clock", &no_params())
        .await
        .unwrap_err();

    match err {
        GateError::QuotaExceeded(e) => assert_eq!(e.window, QuotaWindow::Daily),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(limiter.stats().total_requests, 1);
}

#[tokio::test]
async fn test_timeouts_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/markets/clock"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "state": "open" }))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let config = GateConfig {
        max_retries: 1,
        ..fast_retry_config()
    };
    let client = GuardedRestClient::builder(format!("{}/v1", server.uri()))
        .config(config)
        .timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let err = client
        .get_json::<MarketClock, _>("/markets/clock", &no_params())
        .await
        .unwrap_err();

    assert_eq!(err.failure_kind(), FailureKind::Timeout);
    assert_eq!(client.stats().total_requests, 2);
}

#[tokio::test]
async fn test_invalid_json_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/markets/clock"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = build_client(&server);
    let err = client
        .get_json::<MarketClock, _>("/markets/clock", &no_params())
        .await
        .unwrap_err();

    assert!(matches!(err, GateError::InvalidResponse(_)));
}
