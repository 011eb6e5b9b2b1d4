//! Rate limit store port.
//!
//! The key-value backend the sliding-window limiter runs against. The
//! limiter's correctness rests on [`RateLimitStore::record_hit`] being one
//! atomic unit on the backend: expire old hits, count, compare and record
//! must not interleave with another caller's check on the same key, even
//! from another process.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::rate_limit::{FailureClass, HitOutcome, RateLimitError, WindowSnapshot};

/// Port for the shared key-value backend.
///
/// Implementations must be thread-safe. Calls for different keys must not
/// block each other.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically evaluate and record one hit.
    ///
    /// 1. Drop hits scored at or before `now_ms - window_ms`.
    /// 2. Count the survivors.
    /// 3. If the count is at `max_requests`, reject and report the oldest hit.
    /// 4. Otherwise add `member` scored `now_ms` and expire the key after
    ///    `window_ms`.
    async fn record_hit(&self, key: &str, hit: &HitRequest) -> Result<HitOutcome, StoreError>;

    /// Count hits inside the window without writing anything.
    async fn window_snapshot(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: u64,
    ) -> Result<WindowSnapshot, StoreError>;

    /// Delete a key and everything recorded under it.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Set a flag that expires after `ttl`.
    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// True if the flag is present and not expired.
    async fn flag_exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Keys matching a glob pattern. Best effort; only for diagnostics.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
}

/// Arguments for [`RateLimitStore::record_hit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitRequest {
    pub now_ms: i64,
    pub window_ms: u64,
    pub max_requests: u32,
    /// Unique member name so that two hits in the same millisecond do not
    /// overwrite each other.
    pub member: String,
}

impl HitRequest {
    /// Start of the window; hits at or before this score are expired.
    pub fn window_start(&self) -> i64 {
        self.now_ms.saturating_sub(self.window_ms as i64)
    }
}

/// A classified backend failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{class} failure: {message}")]
pub struct StoreError {
    pub class: FailureClass,
    pub message: String,
}

impl StoreError {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    /// Backend call exceeded its time budget.
    pub fn timeout(budget: Duration) -> Self {
        Self::new(
            FailureClass::Timeout,
            format!("no reply within {}ms", budget.as_millis()),
        )
    }

    /// Backend reply did not have the expected shape.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Protocol, message)
    }
}

impl From<StoreError> for RateLimitError {
    fn from(err: StoreError) -> Self {
        RateLimitError::from_backend(err.class, err.message)
    }
}
