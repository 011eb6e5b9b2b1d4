//! Rate limiter settings

use serde::Deserialize;

use super::error::ValidationError;

/// Settings applied to every limiter built from configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Prefix for sliding-window keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Degrade to allow on backend failure even in production.
    /// Applied to every registry config the limiter resolves.
    #[serde(default)]
    pub skip_if_disabled: bool,
}

impl RateLimitSettings {
    /// Validate rate limit settings
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key_prefix.is_empty() || self.key_prefix.contains(['*', '?', '[', ' ']) {
            return Err(ValidationError::InvalidKeyPrefix);
        }
        Ok(())
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            skip_if_disabled: false,
        }
    }
}

fn default_key_prefix() -> String {
    crate::domain::rate_limit::DEFAULT_KEY_PREFIX.to_string()
}
