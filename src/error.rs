//! Error types for the quota gate library.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::rate_limit::QuotaWindow;

/// The main error type for all quota gate operations.
#[derive(Error, Debug)]
pub enum GateError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request with middleware failed
    #[error("HTTP request failed: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// The upstream API answered with a failure
    #[error("Upstream error: {0}")]
    Upstream(UpstreamError),

    /// The local quota could not be satisfied within the wait ceiling
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    /// Invalid response from the API
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Returned by the limiter when a caller waited the full ceiling and the
/// overflow policy forbids a forced bypass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{window} quota exhausted, retry after {retry_after:?}")]
pub struct QuotaExceeded {
    /// The quota window that was still full.
    pub window: QuotaWindow,
    /// How long until that window frees a slot.
    pub retry_after: Duration,
}

/// Classification of a failed outbound call.
///
/// Retry decisions dispatch on this value rather than on error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The provider rejected the call because of its own rate limit.
    RateLimited,
    /// The call timed out.
    Timeout,
    /// 5xx-class response.
    ServerError(u16),
    /// Permanent rejection. Holds the HTTP status or a provider error code
    /// (e.g. `-300`).
    ClientError(i32),
    /// Anything that could not be classified.
    Unknown,
}

impl FailureKind {
    /// Classify an HTTP status code.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimited,
            408 => Self::Timeout,
            code @ 500..=599 => Self::ServerError(code),
            code @ 400..=499 => Self::ClientError(i32::from(code)),
            _ => Self::Unknown,
        }
    }

    /// Classify a raw provider message.
    ///
    /// Transient markers are checked before permanent ones, so a message
    /// mentioning both a timeout and an invalid field is still retryable.
    pub fn from_message(message: &str) -> Self {
        let message = message.to_ascii_lowercase();
        let has = |needle: &str| message.contains(needle);

        if has("429") || has("rate limit") || has("request limit") {
            return Self::RateLimited;
        }
        if has("timeout") || has("timed out") {
            return Self::Timeout;
        }
        if let Some(code) = [500u16, 502, 503, 504]
            .into_iter()
            .find(|code| has(&code.to_string()))
        {
            return Self::ServerError(code);
        }
        if has("invalid") {
            return Self::ClientError(400);
        }
        if has("not found") {
            return Self::ClientError(404);
        }
        if has("-300") {
            return Self::ClientError(-300);
        }
        Self::Unknown
    }

    /// Whether a failure of this kind is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited | Self::Timeout => true,
            Self::ServerError(code) => matches!(code, 500 | 502 | 503 | 504),
            Self::ClientError(_) | Self::Unknown => false,
        }
    }
}

/// A failure reported by the upstream API.
///
/// The raw body text is kept unchanged so callers see the provider's own
/// diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    /// How the failure was classified.
    pub kind: FailureKind,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
    /// Raw provider message.
    pub message: String,
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl UpstreamError {
    /// Create an upstream error with an explicit classification.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Build an error from a provider message, classifying it by content.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(FailureKind::from_message(&message), message)
    }

    /// Build an error from a non-success HTTP response.
    ///
    /// The status decides the kind unless it is a plain client error and the
    /// body names a transient condition (some providers answer `400` with
    /// "Rate limit exceeded").
    pub fn from_response(status: StatusCode, body: impl Into<String>) -> Self {
        let message = body.into();
        let by_status = FailureKind::from_status(status);
        let kind = if by_status.is_transient() {
            by_status
        } else {
            let by_body = FailureKind::from_message(&message);
            if by_body.is_transient() { by_body } else { by_status }
        };

        Self {
            kind,
            status: Some(status.as_u16()),
            message,
        }
    }

    /// Check if this is a provider rate limit rejection.
    pub fn is_rate_limit(&self) -> bool {
        self.kind == FailureKind::RateLimited
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_from_message() {
        assert_eq!(
            FailureKind::from_message("HTTP 429 Too Many Requests"),
            FailureKind::RateLimited
        );
        assert_eq!(
            FailureKind::from_message("Rate Limit exceeded"),
            FailureKind::RateLimited
        );
        assert_eq!(
            FailureKind::from_message("daily request limit reached"),
            FailureKind::RateLimited
        );
        assert_eq!(
            FailureKind::from_message("read timed out"),
            FailureKind::Timeout
        );
        assert_eq!(
            FailureKind::from_message("502 Bad Gateway"),
            FailureKind::ServerError(502)
        );
        assert_eq!(
            FailureKind::from_message("Invalid symbol"),
            FailureKind::ClientError(400)
        );
        assert_eq!(
            FailureKind::from_message("symbol not found"),
            FailureKind::ClientError(404)
        );
        assert_eq!(
            FailureKind::from_message("error -300: market closed"),
            FailureKind::ClientError(-300)
        );
        assert_eq!(FailureKind::from_message("boom"), FailureKind::Unknown);
    }

    #[test]
    fn test_transient_markers_win() {
        assert_eq!(
            FailureKind::from_message("invalid response: gateway timeout"),
            FailureKind::Timeout
        );
    }

    #[test]
    fn test_failure_kind_from_status() {
        assert_eq!(
            FailureKind::from_status(StatusCode::TOO_MANY_REQUESTS),
            FailureKind::RateLimited
        );
        assert_eq!(
            FailureKind::from_status(StatusCode::SERVICE_UNAVAILABLE),
            FailureKind::ServerError(503)
        );
        assert_eq!(
            FailureKind::from_status(StatusCode::NOT_FOUND),
            FailureKind::ClientError(404)
        );
        assert!(!FailureKind::ServerError(501).is_transient());
        assert!(FailureKind::ServerError(504).is_transient());
    }

    #[test]
    fn test_upstream_error_body_overrides_client_status() {
        let error = UpstreamError::from_response(StatusCode::BAD_REQUEST, "Rate limit exceeded");
        assert!(error.is_rate_limit());
        assert_eq!(error.status, Some(400));

        let error = UpstreamError::from_response(StatusCode::NOT_FOUND, "no such symbol");
        assert_eq!(error.kind, FailureKind::ClientError(404));
        assert_eq!(error.to_string(), "HTTP 404: no such symbol");
    }
}
