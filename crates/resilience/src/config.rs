//! File-based settings for breakers and retry policies
//!
//! Settings are TOML with one table per concern. Every field is optional;
//! omitted fields keep the library defaults. Durations are written in
//! seconds and may be fractional.
//!
//! ```toml
//! [circuit_breaker]
//! failure_threshold = 5
//! success_threshold = 2
//! timeout = 60
//! failure_rate_threshold = 0.5
//! minimum_requests = 10
//! window_size = 60
//!
//! [retry]
//! max_attempts = 3
//! min_wait = 1
//! max_wait = 10
//! jitter = 0.5
//! retry_on = ["connection", "timeout"]
//! respect_retry_after = false
//! retry_busy = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult, FailureReason};
use crate::utils::serde::duration_secs;

/// Top-level settings document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceSettings {
    pub circuit_breaker: CircuitBreakerSettings,
    pub retry: RetrySettings,
}

impl ResilienceSettings {
    /// Parse settings from a TOML string
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML settings file
    pub fn from_path<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&source)
    }
}

/// `[circuit_breaker]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub failure_rate_threshold: f64,
    pub minimum_requests: u32,
    #[serde(with = "duration_secs")]
    pub window_size: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            failure_rate_threshold: 0.5,
            minimum_requests: 10,
            window_size: Duration::from_secs(60),
        }
    }
}

#[cfg(feature = "runtime")]
impl CircuitBreakerSettings {
    /// Validated breaker configuration
    pub fn to_config(&self) -> ConfigResult<crate::resilience::CircuitBreakerConfig> {
        crate::resilience::CircuitBreakerConfig::builder()
            .failure_threshold(self.failure_threshold)
            .success_threshold(self.success_threshold)
            .timeout(self.timeout)
            .failure_rate_threshold(self.failure_rate_threshold)
            .minimum_requests(self.minimum_requests)
            .window_size(self.window_size)
            .build()
    }
}

/// `[retry]` table
///
/// `min_wait`/`max_wait` bound an exponential curve; set both to zero to
/// retry immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub min_wait: Duration,
    #[serde(with = "duration_secs")]
    pub max_wait: Duration,
    #[serde(with = "duration_secs::option", skip_serializing_if = "Option::is_none")]
    pub jitter: Option<Duration>,
    pub retry_on: Vec<FailureReason>,
    pub respect_retry_after: bool,
    pub retry_busy: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(10),
            jitter: None,
            retry_on: vec![
                FailureReason::Connection,
                FailureReason::Timeout,
                FailureReason::RateLimited,
                FailureReason::ServerError,
                FailureReason::Deadlock,
            ],
            respect_retry_after: false,
            retry_busy: false,
        }
    }
}

#[cfg(feature = "runtime")]
impl RetrySettings {
    /// Validated retry policy
    pub fn to_policy(&self) -> ConfigResult<crate::resilience::RetryPolicy> {
        use crate::resilience::{RetryCondition, RetryPolicy, WaitStrategy};

        let mut wait = if self.min_wait.is_zero() && self.max_wait.is_zero() {
            WaitStrategy::none()
        } else {
            WaitStrategy::exponential(self.min_wait, self.max_wait)
        };
        if let Some(bound) = self.jitter {
            wait = wait.with_jitter(bound);
        }
        wait = wait.respecting_retry_after(self.respect_retry_after);

        let mut condition = if self.retry_on.is_empty() {
            RetryCondition::Never
        } else {
            RetryCondition::on(self.retry_on.iter().copied())
        };
        if self.retry_busy {
            condition = condition.with_busy_retry();
        }

        RetryPolicy::new(self.max_attempts, wait, condition)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for settings parsing
    //!
    //! Tests cover defaults for omitted tables, reason names, rejection of
    //! unknown keys, and conversion into runtime types.

    use super::*;

    /// Validates an empty document yields the defaults.
    ///
    /// Assertions:
    /// - Both tables equal their `Default` values.
    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = ResilienceSettings::from_toml_str("").expect("empty is valid");
        assert_eq!(settings, ResilienceSettings::default());
        assert_eq!(settings.circuit_breaker.failure_threshold, 5);
        assert_eq!(settings.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_tables() {
        let settings = ResilienceSettings::from_toml_str(
            r#"
            [circuit_breaker]
            timeout = 1.5

            [retry]
            retry_on = ["deadlock", "rate_limited"]
            jitter = 0.25
            "#,
        )
        .expect("valid settings");

        assert_eq!(settings.circuit_breaker.timeout, Duration::from_millis(1500));
        assert_eq!(settings.circuit_breaker.minimum_requests, 10);
        assert_eq!(
            settings.retry.retry_on,
            vec![FailureReason::Deadlock, FailureReason::RateLimited]
        );
        assert_eq!(settings.retry.jitter, Some(Duration::from_millis(250)));
    }

    /// Validates parse failures surface as `ConfigError::Parse`.
    ///
    /// Assertions:
    /// - Unknown reason names are rejected.
    /// - Unknown keys are rejected.
    #[test]
    fn test_unknown_names_are_errors() {
        let err = ResilienceSettings::from_toml_str("[retry]\nretry_on = [\"flaky\"]")
            .expect_err("unknown reason");
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = ResilienceSettings::from_toml_str("[circuit_breaker]\nthreshold = 3")
            .expect_err("unknown key");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ResilienceSettings::from_path("/nonexistent/bulwark.toml").expect_err("missing");
        match err {
            ConfigError::Io { path, .. } => assert!(path.ends_with("bulwark.toml")),
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[cfg(feature = "runtime")]
    #[test]
    fn test_conversion_into_runtime_types() {
        let mut settings = ResilienceSettings::default();
        settings.retry.retry_busy = true;
        settings.retry.retry_on = vec![FailureReason::Timeout];

        let config = settings.circuit_breaker.to_config().expect("valid config");
        assert_eq!(config, crate::resilience::CircuitBreakerConfig::default());

        let policy = settings.retry.to_policy().expect("valid policy");
        assert!(policy.condition().should_retry(FailureReason::CircuitBusy));
        assert!(!policy.condition().should_retry(FailureReason::Connection));

        settings.circuit_breaker.failure_rate_threshold = 2.0;
        assert!(matches!(settings.circuit_breaker.to_config(), Err(ConfigError::Invalid { .. })));

        settings.retry.min_wait = Duration::from_secs(30);
        assert!(settings.retry.to_policy().is_err());
    }
}
