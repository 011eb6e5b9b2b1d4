//! Dual-scope coordination: one check per network address, one per
//! authenticated principal, combined into a single decision.

use crate::domain::rate_limit::{
    DualLimitResult, PlanTier, RateLimitConfig, RateLimitError, RateLimitRegistry, ServiceClass,
};

use super::limiter::SlidingWindowLimiter;

impl SlidingWindowLimiter {
    /// Check the IP scope and, when `user_identifier` is present, the user
    /// scope.
    ///
    /// Both checks are always driven to completion, so each scope records
    /// its hit even when the other one denies or errors. Only then is the
    /// first error (IP before user) surfaced.
    pub async fn check_dual_limit(
        &self,
        ip_identifier: &str,
        user_identifier: Option<&str>,
        ip_config: &RateLimitConfig,
        user_config: &RateLimitConfig,
        service_label: Option<&str>,
    ) -> Result<DualLimitResult, RateLimitError> {
        let ip_check = self.check_limit(ip_identifier, ip_config, service_label);
        let user_check = async {
            match user_identifier {
                Some(user) => self
                    .check_limit(user, user_config, service_label)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };

        let (ip, user) = tokio::join!(ip_check, user_check);
        let combined = DualLimitResult::combine(ip?, user?);

        if !combined.success {
            tracing::debug!(
                ip = ip_identifier,
                user = user_identifier,
                service = service_label,
                ip_success = combined.ip.success,
                "Dual rate limit denied"
            );
        }
        Ok(combined)
    }

    /// Dual check for a named service class, with limits taken from the
    /// registry.
    ///
    /// The user scope applies only when a principal is given and the class
    /// has per-plan limits; otherwise the IP result alone decides.
    pub async fn check_service(
        &self,
        class: ServiceClass,
        ip_identifier: &str,
        principal: Option<(&str, PlanTier)>,
    ) -> Result<DualLimitResult, RateLimitError> {
        let ip_config = RateLimitRegistry::ip(class).ok_or_else(|| {
            RateLimitError::ConfigurationInvalid(format!("no ip limit registered for {}", class))
        })?;
        let user_scope = principal.and_then(|(user, tier)| {
            RateLimitRegistry::user(class, tier).map(|config| (user, config))
        });

        match user_scope {
            Some((user, user_config)) => {
                self.check_dual_limit(
                    ip_identifier,
                    Some(user),
                    &ip_config,
                    &user_config,
                    Some(class.label()),
                )
                .await
            }
            None => {
                self.check_dual_limit(
                    ip_identifier,
                    None,
                    &ip_config,
                    &ip_config,
                    Some(class.label()),
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryRateLimitStore, ManualClock};
    use crate::application::DegradationPolicy;
    use crate::config::Environment;
    use crate::domain::rate_limit::FailureClass;
    use std::sync::Arc;

    fn limiter(environment: Environment) -> (Arc<InMemoryRateLimitStore>, SlidingWindowLimiter) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(InMemoryRateLimitStore::new(clock.clone()));
        let limiter = SlidingWindowLimiter::new(store.clone(), DegradationPolicy::new(environment))
            .with_clock(clock);
        (store, limiter)
    }

    #[tokio::test]
    async fn ip_only_when_no_user() {
        let (_, limiter) = limiter(Environment::Development);
        let config = RateLimitConfig::new(60_000, 1);

        let first = limiter
            .check_dual_limit("ip:1.2.3.4", None, &config, &config, Some("api"))
            .await
            .unwrap();
        assert!(first.success);
        assert!(first.user.is_none());

        let second = limiter
            .check_dual_limit("ip:1.2.3.4", None, &config, &config, Some("api"))
            .await
            .unwrap();
        assert!(!second.success);
        assert_eq!(second.deciding_result(), &second.ip);
    }

    #[tokio::test]
    async fn user_denial_fails_the_whole_check() {
        let (_, limiter) = limiter(Environment::Development);
        let ip_config = RateLimitConfig::new(60_000, 10);
        let user_config = RateLimitConfig::new(60_000, 1);

        limiter
            .check_dual_limit("ip:1", Some("user:u1"), &ip_config, &user_config, None)
            .await
            .unwrap();
        let denied = limiter
            .check_dual_limit("ip:1", Some("user:u1"), &ip_config, &user_config, None)
            .await
            .unwrap();

        assert!(!denied.success);
        assert!(denied.ip.success);
        let user = denied.user.as_ref().unwrap();
        assert!(!user.success);
        assert_eq!(denied.deciding_result(), user);
    }

    #[tokio::test]
    async fn both_scopes_record_even_when_ip_denies() {
        let (_, limiter) = limiter(Environment::Development);
        let ip_config = RateLimitConfig::new(60_000, 1);
        let user_config = RateLimitConfig::new(60_000, 5);

        limiter.check_limit("ip:1", &ip_config, None).await.unwrap();
        let result = limiter
            .check_dual_limit("ip:1", Some("user:u1"), &ip_config, &user_config, None)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.user.as_ref().unwrap().total_hits, 1);
        assert_eq!(result.deciding_result(), &result.ip);
    }

    #[tokio::test]
    async fn production_outage_surfaces_error_after_both_checks() {
        let (store, limiter) = limiter(Environment::Production);
        store.simulate_outage(FailureClass::ConnectionRefused);
        let config = RateLimitConfig::new(60_000, 5);

        let err = limiter
            .check_dual_limit("ip:1", Some("user:u1"), &config, &config, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::BackendUnreachable { .. }));
    }

    #[tokio::test]
    async fn service_check_uses_registry_limits() {
        let (_, limiter) = limiter(Environment::Development);

        let result = limiter
            .check_service(ServiceClass::Api, "ip:9.9.9.9", Some(("user:u1", PlanTier::Free)))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            Some(result.ip.limit),
            RateLimitRegistry::ip(ServiceClass::Api).map(|c| c.max_requests)
        );
        let user = result.user.unwrap();
        assert_eq!(
            Some(user.limit),
            RateLimitRegistry::user(ServiceClass::Api, PlanTier::Free).map(|c| c.max_requests)
        );
    }

    #[tokio::test]
    async fn service_without_user_limits_ignores_principal() {
        let (_, limiter) = limiter(Environment::Development);

        let result = limiter
            .check_service(
                ServiceClass::AuthLogin,
                "ip:9.9.9.9",
                Some(("user:u1", PlanTier::Pro)),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.user.is_none());
    }
}
