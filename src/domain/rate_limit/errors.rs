//! Rate limiting error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a backend failure, used for diagnostics and for
/// mapping into [`RateLimitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Host name could not be resolved.
    Dns,
    /// Credentials were rejected.
    Auth,
    /// The call did not complete within the backend timeout.
    Timeout,
    /// The backend refused the connection.
    ConnectionRefused,
    /// The backend answered with an unexpected shape.
    Protocol,
    /// Anything else.
    Generic,
}

impl FailureClass {
    /// Returns the string representation of the class.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Dns => "dns",
            FailureClass::Auth => "auth",
            FailureClass::Timeout => "timeout",
            FailureClass::ConnectionRefused => "connection_refused",
            FailureClass::Protocol => "protocol",
            FailureClass::Generic => "generic",
        }
    }

    /// True for transient infrastructure failures.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            FailureClass::Dns | FailureClass::Timeout | FailureClass::ConnectionRefused
        )
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors returned by the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// DNS failure, refused connection or timeout.
    #[error("rate limit backend unreachable ({class}): {message}")]
    BackendUnreachable { class: FailureClass, message: String },

    /// The backend rejected our credentials.
    #[error("rate limit backend rejected credentials: {0}")]
    BackendAuthFailure(String),

    /// The atomic script answered with something we cannot interpret.
    #[error("rate limit backend protocol error: {0}")]
    BackendProtocolError(String),

    /// Unclassified backend failure.
    #[error("rate limit backend error: {0}")]
    Backend(String),

    /// Non-positive window or quota. Never degraded.
    #[error("invalid rate limit configuration: {0}")]
    ConfigurationInvalid(String),

    /// Empty or malformed identifier. Never degraded.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl RateLimitError {
    /// Builds the error matching a classified backend failure.
    pub fn from_backend(class: FailureClass, message: impl Into<String>) -> Self {
        let message = message.into();
        if class.is_unreachable() {
            return RateLimitError::BackendUnreachable { class, message };
        }
        match class {
            FailureClass::Auth => RateLimitError::BackendAuthFailure(message),
            FailureClass::Protocol => RateLimitError::BackendProtocolError(message),
            _ => RateLimitError::Backend(message),
        }
    }

    /// True for errors that signal a programming mistake rather than a
    /// runtime condition. These always propagate.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            RateLimitError::ConfigurationInvalid(_) | RateLimitError::InvalidKey(_)
        )
    }
}
