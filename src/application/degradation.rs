//! Failure and degradation policy.
//!
//! Rate limiting is a defense-in-depth control. Outside production a
//! backend outage must not take features down with it, so failures resolve
//! to a synthetic allow. In production an unenforced limiter is worse than
//! a refused request, so failures propagate.

use crate::config::Environment;
use crate::domain::rate_limit::{FailureClass, RateLimitError};
use crate::ports::StoreError;

/// Decides fail-open versus fail-closed for backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegradationPolicy {
    environment: Environment,
}

/// How a backend failure was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    FailOpen,
    FailClosed,
}

impl DegradationPolicy {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// The decision for a failure, given the per-call override.
    pub fn decide(&self, skip_if_disabled: bool) -> Degradation {
        if skip_if_disabled || !self.environment.is_production() {
            Degradation::FailOpen
        } else {
            Degradation::FailClosed
        }
    }

    /// Resolve a backend failure for `operation` on `key`.
    ///
    /// Fail open returns `fallback()`; fail closed returns the classified
    /// error. Both are logged with the failure class.
    pub fn resolve<T>(
        &self,
        operation: &'static str,
        key: &str,
        skip_if_disabled: bool,
        err: StoreError,
        fallback: impl FnOnce() -> T,
    ) -> Result<T, RateLimitError> {
        match self.decide(skip_if_disabled) {
            Degradation::FailOpen => {
                tracing::warn!(
                    operation,
                    key,
                    class = %err.class,
                    environment = %self.environment,
                    hint = diagnostic_hint(err.class),
                    error = %err.message,
                    "Rate limit backend failed, allowing request"
                );
                Ok(fallback())
            }
            Degradation::FailClosed => {
                tracing::error!(
                    operation,
                    key,
                    class = %err.class,
                    environment = %self.environment,
                    hint = diagnostic_hint(err.class),
                    error = %err.message,
                    "Rate limit backend failed, rejecting request"
                );
                Err(err.into())
            }
        }
    }
}

impl Default for DegradationPolicy {
    fn default() -> Self {
        Self::new(Environment::default())
    }
}

/// Operator-facing hint for a failure class.
pub fn diagnostic_hint(class: FailureClass) -> &'static str {
    match class {
        FailureClass::Dns => "backend host name did not resolve; check the Redis URL",
        FailureClass::Auth => "backend rejected credentials; check the Redis password or ACL",
        FailureClass::Timeout => "backend did not answer in time; check latency and load",
        FailureClass::ConnectionRefused => "backend refused the connection; is it running?",
        FailureClass::Protocol => "backend reply had an unexpected shape",
        FailureClass::Generic => "unclassified backend error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outage() -> StoreError {
        StoreError::new(FailureClass::ConnectionRefused, "refused")
    }

    #[test]
    fn development_fails_open() {
        let policy = DegradationPolicy::new(Environment::Development);
        let result = policy.resolve("check_limit", "k", false, outage(), || 7);
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn staging_fails_open() {
        let policy = DegradationPolicy::new(Environment::Staging);
        assert_eq!(policy.decide(false), Degradation::FailOpen);
    }

    #[test]
    fn production_fails_closed_with_classified_error() {
        let policy = DegradationPolicy::new(Environment::Production);
        let result = policy.resolve("check_limit", "k", false, outage(), || 7);
        assert!(matches!(
            result,
            Err(RateLimitError::BackendUnreachable {
                class: FailureClass::ConnectionRefused,
                ..
            })
        ));
    }

    #[test]
    fn skip_override_fails_open_in_production() {
        let policy = DegradationPolicy::new(Environment::Production);
        assert_eq!(policy.decide(true), Degradation::FailOpen);
        let result = policy.resolve("check_limit", "k", true, outage(), || "allowed");
        assert_eq!(result, Ok("allowed"));
    }

    #[test]
    fn protocol_errors_follow_the_same_policy() {
        let dev = DegradationPolicy::new(Environment::Development);
        let prod = DegradationPolicy::new(Environment::Production);
        assert!(dev
            .resolve("check_limit", "k", false, StoreError::protocol("nil"), || ())
            .is_ok());
        assert!(matches!(
            prod.resolve("check_limit", "k", false, StoreError::protocol("nil"), || ()),
            Err(RateLimitError::BackendProtocolError(_))
        ));
    }

    #[test]
    fn default_is_development() {
        assert_eq!(
            DegradationPolicy::default().environment(),
            Environment::Development
        );
    }
}
