//! Outcome values produced by the limiter.
//!
//! All arithmetic on windows lives here so that the backend adapters only
//! need to report raw counts and the oldest surviving hit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::config::RateLimitConfig;

/// What a backend reports about one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Hits inside the window, including one just recorded.
    pub hits: u64,
    /// Score of the earliest surviving hit, if any.
    pub oldest_hit_ms: Option<i64>,
}

/// Result of an atomic check-and-record against the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitOutcome {
    /// The hit was recorded; `hits` counts it.
    Admitted { hits: u64 },
    /// The window was full; nothing was recorded.
    Rejected { hits: u64, oldest_hit_ms: Option<i64> },
}

/// Quota decision for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch milliseconds.
    pub reset_time: i64,
    /// Seconds; only set on denial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    pub total_hits: u64,
    /// Epoch milliseconds.
    pub window_start: i64,
}

impl RateLimitResult {
    /// Builds the result for a backend outcome.
    pub fn from_outcome(config: &RateLimitConfig, now_ms: i64, outcome: HitOutcome) -> Self {
        match outcome {
            HitOutcome::Admitted { hits } => Self::admitted(config, now_ms, hits),
            HitOutcome::Rejected {
                hits,
                oldest_hit_ms,
            } => Self::rejected(config, now_ms, hits, oldest_hit_ms),
        }
    }

    /// A recorded hit; `hits` includes it.
    pub fn admitted(config: &RateLimitConfig, now_ms: i64, hits: u64) -> Self {
        Self {
            success: true,
            limit: config.max_requests,
            remaining: remaining(config.max_requests, hits),
            reset_time: reset_time(config, now_ms),
            retry_after: None,
            total_hits: hits,
            window_start: window_start(config, now_ms),
        }
    }

    /// A denied hit against a full window.
    pub fn rejected(
        config: &RateLimitConfig,
        now_ms: i64,
        hits: u64,
        oldest_hit_ms: Option<i64>,
    ) -> Self {
        let oldest = oldest_hit_ms.unwrap_or(now_ms);
        Self {
            success: false,
            limit: config.max_requests,
            remaining: 0,
            reset_time: reset_time(config, now_ms),
            retry_after: Some(retry_after_secs(oldest, config.window_ms, now_ms)),
            total_hits: hits,
            window_start: window_start(config, now_ms),
        }
    }

    /// Read-only view of a window; nothing was recorded.
    pub fn from_snapshot(config: &RateLimitConfig, now_ms: i64, snapshot: WindowSnapshot) -> Self {
        if snapshot.hits >= u64::from(config.max_requests) {
            Self::rejected(config, now_ms, snapshot.hits, snapshot.oldest_hit_ms)
        } else {
            Self {
                success: true,
                limit: config.max_requests,
                remaining: remaining(config.max_requests, snapshot.hits),
                reset_time: reset_time(config, now_ms),
                retry_after: None,
                total_hits: snapshot.hits,
                window_start: window_start(config, now_ms),
            }
        }
    }

    /// Synthetic allow used when the backend is down and the policy
    /// degrades open.
    pub fn fail_open(config: &RateLimitConfig, now_ms: i64) -> Self {
        Self {
            success: true,
            limit: config.max_requests,
            remaining: config.max_requests.saturating_sub(1),
            reset_time: reset_time(config, now_ms),
            retry_after: None,
            total_hits: 1,
            window_start: window_start(config, now_ms),
        }
    }
}

/// Seconds until the oldest hit leaves the window, rounded up, never
/// negative.
pub fn retry_after_secs(oldest_hit_ms: i64, window_ms: u64, now_ms: i64) -> u64 {
    let window = i64::try_from(window_ms).unwrap_or(i64::MAX);
    let left_ms = oldest_hit_ms.saturating_add(window).saturating_sub(now_ms);
    if left_ms <= 0 {
        return 0;
    }
    (left_ms as u64 + 999) / 1_000
}

fn remaining(max_requests: u32, hits: u64) -> u32 {
    u64::from(max_requests).saturating_sub(hits) as u32
}

fn reset_time(config: &RateLimitConfig, now_ms: i64) -> i64 {
    now_ms.saturating_add(config.window_ms as i64)
}

fn window_start(config: &RateLimitConfig, now_ms: i64) -> i64 {
    now_ms.saturating_sub(config.window_ms as i64)
}

/// Combined outcome of an IP check and an optional user check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DualLimitResult {
    pub ip: RateLimitResult,
    pub user: Option<RateLimitResult>,
    pub success: bool,
}

impl DualLimitResult {
    /// Combines two results; `success` requires both to pass.
    pub fn combine(ip: RateLimitResult, user: Option<RateLimitResult>) -> Self {
        let success = ip.success && user.as_ref().map_or(true, |u| u.success);
        Self { ip, user, success }
    }

    /// The single result to report to a caller.
    ///
    /// The user result wins when the IP check passed and the user check
    /// failed; otherwise the IP result is reported.
    pub fn deciding_result(&self) -> &RateLimitResult {
        match &self.user {
            Some(user) if self.ip.success && !user.success => user,
            _ => &self.ip,
        }
    }

    /// The most specific successful result, for quota headers.
    pub fn most_specific(&self) -> &RateLimitResult {
        self.user.as_ref().unwrap_or(&self.ip)
    }
}

/// Best-effort aggregate over the backend keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStats {
    /// Sliding-window keys currently present.
    pub total_keys: usize,
    /// Block flags currently present.
    pub blocked_keys: usize,
    /// Window keys grouped by the segment after the prefix.
    pub by_service: BTreeMap<String, usize>,
}
