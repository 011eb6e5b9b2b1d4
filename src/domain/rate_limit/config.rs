//! Window/quota configuration for a single rate limit.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::errors::RateLimitError;

/// Immutable sliding-window configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Maximum admitted requests per window.
    pub max_requests: u32,
    /// Overrides the default `ratelimit` key prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
    /// Fail open on backend errors even in production.
    #[serde(default)]
    pub skip_if_disabled: bool,
}

impl RateLimitConfig {
    /// Creates a config. Use [`validate`](Self::validate) before trusting
    /// caller-supplied values.
    pub const fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
            key_prefix: None,
            skip_if_disabled: false,
        }
    }

    /// `max_requests` per `secs` seconds.
    pub const fn per_seconds(max_requests: u32, secs: u64) -> Self {
        Self::new(secs * 1_000, max_requests)
    }

    /// `max_requests` per minute.
    pub const fn per_minute(max_requests: u32) -> Self {
        Self::per_seconds(max_requests, 60)
    }

    /// `max_requests` per hour.
    pub const fn per_hour(max_requests: u32) -> Self {
        Self::per_seconds(max_requests, 3_600)
    }

    /// Sets the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Always degrade to an allow on backend failure.
    pub fn with_skip_if_disabled(mut self, skip: bool) -> Self {
        self.skip_if_disabled = skip;
        self
    }

    /// Window as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Rejects a zero window or a zero quota.
    pub fn validate(&self) -> Result<(), RateLimitError> {
        if self.window_ms == 0 {
            return Err(RateLimitError::ConfigurationInvalid(
                "window_ms must be greater than zero".into(),
            ));
        }
        if self.max_requests == 0 {
            return Err(RateLimitError::ConfigurationInvalid(
                "max_requests must be greater than zero".into(),
            ));
        }
        if i64::try_from(self.window_ms).is_err() {
            return Err(RateLimitError::ConfigurationInvalid(
                "window_ms is out of range".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_compute_window() {
        assert_eq!(RateLimitConfig::per_minute(10).window_ms, 60_000);
        assert_eq!(RateLimitConfig::per_hour(3).window_ms, 3_600_000);
        assert_eq!(RateLimitConfig::per_seconds(5, 900).window(), Duration::from_secs(900));
    }

    #[test]
    fn zero_window_is_invalid() {
        let err = RateLimitConfig::new(0, 10).validate().unwrap_err();
        assert!(matches!(err, RateLimitError::ConfigurationInvalid(_)));
    }

    #[test]
    fn zero_quota_is_invalid() {
        let err = RateLimitConfig::new(1_000, 0).validate().unwrap_err();
        assert!(matches!(err, RateLimitError::ConfigurationInvalid(_)));
    }

    #[test]
    fn positive_values_validate() {
        assert!(RateLimitConfig::new(1, 1).validate().is_ok());
    }

    #[test]
    fn deserializes_from_camel_case_json() {
        let json = r#"{"windowMs": 60000, "maxRequests": 3, "keyPrefix": "rl"}"#;
        let config: RateLimitConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.window_ms, 60_000);
        assert_eq!(config.max_requests, 3);
        assert_eq!(config.key_prefix.as_deref(), Some("rl"));
        assert!(!config.skip_if_disabled);
    }
}
