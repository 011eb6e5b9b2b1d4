//! Sliding-window rate limiter.
//!
//! Every hit is recorded with its arrival time in a per-identifier log on
//! the shared store; only hits from the trailing window count. The
//! check-and-record step is delegated to [`RateLimitStore::record_hit`],
//! which the backend executes atomically, so the limiter itself holds no
//! locks and concurrent calls never admit more than the quota.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::rate_limit::{
    compose_block_key, compose_window_key, ensure_identifier, RateLimitConfig, RateLimitError,
    RateLimitResult, RateLimitStats, BLOCK_KEY_PREFIX, DEFAULT_KEY_PREFIX,
};
use crate::ports::{Clock, HitRequest, RateLimitStore, StoreError, SystemClock};

use super::degradation::DegradationPolicy;

/// Default budget for a single backend round trip.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Sliding-window limiter over an injected store.
///
/// Construct once at startup and share behind an `Arc`.
pub struct SlidingWindowLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    policy: DegradationPolicy,
    backend_timeout: Duration,
    key_prefix: String,
    skip_if_disabled: bool,
}

impl SlidingWindowLimiter {
    /// Create a limiter with the system clock and default timeout.
    pub fn new(store: Arc<dyn RateLimitStore>, policy: DegradationPolicy) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            policy,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            skip_if_disabled: false,
        }
    }

    /// Create a limiter from loaded application configuration.
    pub fn from_config(store: Arc<dyn RateLimitStore>, config: &AppConfig) -> Self {
        Self::new(store, DegradationPolicy::new(config.server.environment))
            .with_backend_timeout(config.redis.command_timeout())
            .with_key_prefix(config.rate_limit.key_prefix.clone())
            .with_skip_if_disabled(config.rate_limit.skip_if_disabled)
    }

    /// Use a different clock (tests step time manually).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound every backend call by `timeout`.
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// Prefix for window keys whose config does not set one.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Fail open on backend errors for every config.
    pub fn with_skip_if_disabled(mut self, skip: bool) -> Self {
        self.skip_if_disabled = skip;
        self
    }

    pub fn policy(&self) -> &DegradationPolicy {
        &self.policy
    }

    /// Evaluate and record one request.
    ///
    /// # Errors
    ///
    /// `ConfigurationInvalid` / `InvalidKey` always. Backend errors only
    /// when the degradation policy fails closed.
    pub async fn check_limit(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
        service_label: Option<&str>,
    ) -> Result<RateLimitResult, RateLimitError> {
        config.validate()?;
        ensure_identifier(identifier)?;

        let key = self.window_key(config, service_label, identifier);
        let now = self.clock.now_ms();
        let hit = HitRequest {
            now_ms: now,
            window_ms: config.window_ms,
            max_requests: config.max_requests,
            member: format!("{}-{}", now, Uuid::new_v4().simple()),
        };

        match self.bounded(self.store.record_hit(&key, &hit)).await {
            Ok(outcome) => {
                let result = RateLimitResult::from_outcome(config, now, outcome);
                if !result.success {
                    tracing::debug!(
                        key = %key,
                        limit = result.limit,
                        total_hits = result.total_hits,
                        retry_after = ?result.retry_after,
                        "Rate limit exceeded"
                    );
                }
                Ok(result)
            }
            Err(err) => self.policy.resolve(
                "check_limit",
                &key,
                self.skips(config),
                err,
                || RateLimitResult::fail_open(config, now),
            ),
        }
    }

    /// Report the current window without recording anything.
    pub async fn get_status(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
        service_label: Option<&str>,
    ) -> Result<RateLimitResult, RateLimitError> {
        config.validate()?;
        ensure_identifier(identifier)?;

        let key = self.window_key(config, service_label, identifier);
        let now = self.clock.now_ms();

        match self
            .bounded(self.store.window_snapshot(&key, now, config.window_ms))
            .await
        {
            Ok(snapshot) => Ok(RateLimitResult::from_snapshot(config, now, snapshot)),
            Err(err) => self.policy.resolve(
                "get_status",
                &key,
                self.skips(config),
                err,
                || RateLimitResult::fail_open(config, now),
            ),
        }
    }

    /// Forget every recorded hit for an identifier.
    pub async fn reset(
        &self,
        identifier: &str,
        service_label: Option<&str>,
        key_prefix: Option<&str>,
    ) -> Result<(), RateLimitError> {
        ensure_identifier(identifier)?;

        let prefix = key_prefix.unwrap_or(&self.key_prefix);
        let key = compose_window_key(Some(prefix), service_label, identifier);

        match self.bounded(self.store.delete(&key)).await {
            Ok(()) => {
                tracing::debug!(key = %key, "Rate limit window reset");
                Ok(())
            }
            Err(err) => self
                .policy
                .resolve("reset", &key, self.skip_if_disabled, err, || ()),
        }
    }

    /// Hard-block an identifier for `duration`, independent of its window.
    pub async fn block(
        &self,
        identifier: &str,
        duration: Duration,
        service_label: Option<&str>,
    ) -> Result<(), RateLimitError> {
        ensure_identifier(identifier)?;
        if duration.is_zero() {
            return Err(RateLimitError::ConfigurationInvalid(
                "block duration must be greater than zero".into(),
            ));
        }

        let key = compose_block_key(service_label, identifier);

        match self.bounded(self.store.set_flag(&key, duration)).await {
            Ok(()) => {
                tracing::info!(
                    key = %key,
                    duration_secs = duration.as_secs(),
                    "Identifier blocked"
                );
                Ok(())
            }
            Err(err) => self
                .policy
                .resolve("block", &key, self.skip_if_disabled, err, || ()),
        }
    }

    /// True while a block set by [`block`](Self::block) is in force.
    pub async fn is_blocked(
        &self,
        identifier: &str,
        service_label: Option<&str>,
    ) -> Result<bool, RateLimitError> {
        ensure_identifier(identifier)?;

        let key = compose_block_key(service_label, identifier);

        match self.bounded(self.store.flag_exists(&key)).await {
            Ok(blocked) => Ok(blocked),
            Err(err) => self
                .policy
                .resolve("is_blocked", &key, self.skip_if_disabled, err, || false),
        }
    }

    /// Aggregate counts over the keyspace.
    ///
    /// Walks every matching key on the backend, so keep it off request
    /// paths; it is meant for admin tooling.
    pub async fn get_stats(&self) -> Result<RateLimitStats, RateLimitError> {
        let window_pattern = format!("{}:*", self.key_prefix);
        let block_pattern = format!("{}:*", BLOCK_KEY_PREFIX);

        let scanned = async {
            let windows = self.bounded(self.store.scan_keys(&window_pattern)).await?;
            let blocks = self.bounded(self.store.scan_keys(&block_pattern)).await?;
            Ok::<_, StoreError>((windows, blocks))
        };

        match scanned.await {
            Ok((windows, blocks)) => {
                let mut stats = RateLimitStats {
                    total_keys: windows.len(),
                    blocked_keys: blocks.len(),
                    ..Default::default()
                };
                let strip = format!("{}:", self.key_prefix);
                for key in &windows {
                    let rest = key.strip_prefix(&strip).unwrap_or(key);
                    let segment = rest.split(':').next().unwrap_or(rest);
                    *stats.by_service.entry(segment.to_string()).or_default() += 1;
                }
                Ok(stats)
            }
            Err(err) => self.policy.resolve(
                "get_stats",
                &window_pattern,
                self.skip_if_disabled,
                err,
                RateLimitStats::default,
            ),
        }
    }

    fn window_key(
        &self,
        config: &RateLimitConfig,
        service_label: Option<&str>,
        identifier: &str,
    ) -> String {
        let prefix = config.key_prefix.as_deref().unwrap_or(&self.key_prefix);
        compose_window_key(Some(prefix), service_label, identifier)
    }

    fn skips(&self, config: &RateLimitConfig) -> bool {
        self.skip_if_disabled || config.skip_if_disabled
    }

    /// One attempt, bounded by the backend timeout. Never retried: the
    /// write may have landed after we gave up.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.backend_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::timeout(self.backend_timeout)),
        }
    }
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("policy", &self.policy)
            .field("backend_timeout", &self.backend_timeout)
            .field("key_prefix", &self.key_prefix)
            .field("skip_if_disabled", &self.skip_if_disabled)
            .finish_non_exhaustive()
    }
}
