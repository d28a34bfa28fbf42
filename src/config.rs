//! Configuration for the quota gate.
//!
//! Every option is optional; missing options fall back to defaults that sit
//! below the provider's documented ceilings.
//!
//! ```rust
//! use quota_gate::config::GateConfig;
//!
//! let config = GateConfig::from_json_str(r#"{ "requests_per_second": 5, "overflow": "fail" }"#)?;
//! assert_eq!(config.requests_per_second, 5);
//! assert_eq!(config.requests_per_minute, 180);
//! # Ok::<(), quota_gate::GateError>(())
//! ```

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::rate_limit::{OverflowPolicy, QuotaConfig, limits};
use crate::retry::RetryPolicy;

/// Prefix for environment variables read by [`GateConfig::from_env`].
pub const ENV_PREFIX: &str = "QUOTA_GATE_";

/// All recognized options.
///
/// Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub requests_per_second: u32,
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    /// Maximum symbols per batched request.
    pub max_batch_size: usize,
    pub max_retries: u32,
    pub base_delay: f64,
    pub max_delay: f64,
    pub exponential_base: f64,
    /// Ceiling on the total time one caller waits for a quota slot.
    pub max_wait: f64,
    pub overflow: OverflowPolicy,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            requests_per_second: limits::DEFAULT_PER_SECOND,
            requests_per_minute: limits::DEFAULT_PER_MINUTE,
            requests_per_day: limits::DEFAULT_PER_DAY,
            max_batch_size: limits::provider::SYMBOLS_PER_REQUEST,
            max_retries: 3,
            base_delay: 1.0,
            max_delay: 30.0,
            exponential_base: 2.0,
            max_wait: limits::DEFAULT_MAX_WAIT.as_secs_f64(),
            overflow: OverflowPolicy::ForceProceed,
        }
    }
}

impl GateConfig {
    /// Parse a JSON document. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, GateError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read overrides from `QUOTA_GATE_*` environment variables.
    ///
    /// For example `QUOTA_GATE_REQUESTS_PER_SECOND=5`.
    pub fn from_env() -> Result<Self, GateError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read overrides through `lookup`, which receives full variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        override_with(&mut config.requests_per_second, &lookup, "REQUESTS_PER_SECOND")?;
        override_with(&mut config.requests_per_minute, &lookup, "REQUESTS_PER_MINUTE")?;
        override_with(&mut config.requests_per_day, &lookup, "REQUESTS_PER_DAY")?;
        override_with(&mut config.max_batch_size, &lookup, "MAX_BATCH_SIZE")?;
        override_with(&mut config.max_retries, &lookup, "MAX_RETRIES")?;
        override_with(&mut config.base_delay, &lookup, "BASE_DELAY")?;
        override_with(&mut config.max_delay, &lookup, "MAX_DELAY")?;
        override_with(&mut config.exponential_base, &lookup, "EXPONENTIAL_BASE")?;
        override_with(&mut config.max_wait, &lookup, "MAX_WAIT")?;

        if let Some(raw) = lookup(&format!("{ENV_PREFIX}OVERFLOW")) {
            config.overflow = match raw.trim().to_ascii_lowercase().as_str() {
                "force_proceed" => OverflowPolicy::ForceProceed,
                "fail" => OverflowPolicy::Fail,
                other => {
                    return Err(GateError::Config(format!(
                        "{ENV_PREFIX}OVERFLOW: unknown policy {other:?}"
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every option is usable.
    pub fn validate(&self) -> Result<(), GateError> {
        if self.requests_per_second == 0
            || self.requests_per_minute == 0
            || self.requests_per_day == 0
        {
            return Err(GateError::Config("request caps must be positive".into()));
        }
        if self.max_batch_size == 0 {
            return Err(GateError::Config("max_batch_size must be positive".into()));
        }
        for (name, secs) in [
            ("base_delay", self.base_delay),
            ("max_delay", self.max_delay),
            ("max_wait", self.max_wait),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(GateError::Config(format!(
                    "{name} must be a non-negative number of seconds"
                )));
            }
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(GateError::Config("exponential_base must be at least 1.0".into()));
        }
        Ok(())
    }

    /// Limiter settings.
    pub fn quota_config(&self) -> QuotaConfig {
        QuotaConfig::new(
            self.requests_per_second,
            self.requests_per_minute,
            self.requests_per_day,
        )
        .with_max_wait(secs(self.max_wait))
        .with_overflow(self.overflow)
    }

    /// Retry settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: secs(self.base_delay),
            max_delay: secs(self.max_delay),
            exponential_base: self.exponential_base,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

fn override_with<T, F>(target: &mut T, lookup: &F, key: &str) -> Result<(), GateError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(&format!("{ENV_PREFIX}{key}")) {
        *target = raw.trim().parse().map_err(|_| {
            GateError::Config(format!("{ENV_PREFIX}{key}: cannot parse {raw:?}"))
        })?;
    }
    Ok(())
}
