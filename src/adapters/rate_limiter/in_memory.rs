//! In-memory rate limit store for testing and single-process development.
//!
//! Emulates the Redis store faithfully enough to exercise the limiter:
//! sorted hits per key, key expiry against an injected clock, and one lock
//! around each call so every operation is a single atomic unit, exactly
//! like a server-side script. Expired keys are dropped lazily: the
//! accessed key on every call, and the whole map on `scan_keys` or when a
//! new key arrives while the map holds at least [`SWEEP_THRESHOLD`]
//! entries. Not suitable for multi-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::rate_limit::{FailureClass, HitOutcome, WindowSnapshot};
use crate::ports::{Clock, HitRequest, RateLimitStore, StoreError};

/// Map size at which inserting a new key first drops every expired entry.
pub const SWEEP_THRESHOLD: usize = 1_024;

/// In-memory store with Redis-like semantics.
pub struct InMemoryRateLimitStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
    outage: StdMutex<Option<FailureClass>>,
}

#[derive(Debug, Clone)]
enum Entry {
    /// Sorted-set equivalent: `(score, member)` pairs.
    Window { hits: Vec<(i64, String)>, expires_at: i64 },
    Flag { expires_at: i64 },
}

impl Entry {
    fn expires_at(&self) -> i64 {
        match self {
            Entry::Window { expires_at, .. } | Entry::Flag { expires_at } => *expires_at,
        }
    }
}

impl InMemoryRateLimitStore {
    /// Create an empty store driven by `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            outage: StdMutex::new(None),
        }
    }

    /// Make every following call fail with `class` until [`restore`](Self::restore).
    pub fn simulate_outage(&self, class: FailureClass) {
        if let Ok(mut outage) = self.outage.lock() {
            *outage = Some(class);
        }
    }

    /// End a simulated outage.
    pub fn restore(&self) {
        if let Ok(mut outage) = self.outage.lock() {
            *outage = None;
        }
    }

    /// Number of live keys (windows and flags).
    pub async fn key_count(&self) -> usize {
        let now = self.clock.now_ms();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.expires_at() > now).count()
    }

    fn check_outage(&self) -> Result<(), StoreError> {
        let outage = self.outage.lock().map(|o| *o).unwrap_or(None);
        match outage {
            Some(class) => Err(StoreError::new(class, "simulated outage")),
            None => Ok(()),
        }
    }

    fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str, now: i64) {
        if entries.get(key).is_some_and(|e| e.expires_at() <= now) {
            entries.remove(key);
        }
    }

    fn sweep_expired(entries: &mut HashMap<String, Entry>, now: i64) {
        let before = entries.len();
        entries.retain(|_, e| e.expires_at() > now);
        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::debug!(dropped, remaining = entries.len(), "Swept expired rate limit keys");
        }
    }

    /// Called before inserting `key`; sweeps only when `key` is new and the
    /// map has grown past the threshold.
    fn make_room(entries: &mut HashMap<String, Entry>, key: &str, now: i64) {
        if entries.len() >= SWEEP_THRESHOLD && !entries.contains_key(key) {
            Self::sweep_expired(entries, now);
        }
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn record_hit(&self, key: &str, hit: &HitRequest) -> Result<HitOutcome, StoreError> {
        self.check_outage()?;
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().await;
        Self::purge_expired(&mut entries, key, now);
        Self::make_room(&mut entries, key, now);

        let entry = entries.entry(key.to_string()).or_insert(Entry::Window {
            hits: Vec::new(),
            expires_at: i64::MAX,
        });
        let Entry::Window { hits, expires_at } = entry else {
            return Err(StoreError::protocol(
                "WRONGTYPE Operation against a key holding the wrong kind of value",
            ));
        };

        let window_start = hit.window_start();
        hits.retain(|(score, _)| *score > window_start);
        let count = hits.len() as u64;

        if count >= u64::from(hit.max_requests) {
            let oldest_hit_ms = hits.iter().map(|(score, _)| *score).min();
            return Ok(HitOutcome::Rejected {
                hits: count,
                oldest_hit_ms,
            });
        }

        match hits.iter_mut().find(|(_, member)| *member == hit.member) {
            Some(existing) => existing.0 = hit.now_ms,
            None => hits.push((hit.now_ms, hit.member.clone())),
        }
        *expires_at = now.saturating_add(hit.window_ms as i64);

        Ok(HitOutcome::Admitted {
            hits: hits.len() as u64,
        })
    }

    async fn window_snapshot(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: u64,
    ) -> Result<WindowSnapshot, StoreError> {
        self.check_outage()?;
        let now = self.clock.now_ms();
        let entries = self.entries.lock().await;
        let window_start = now_ms.saturating_sub(window_ms as i64);

        let snapshot = match entries.get(key) {
            Some(Entry::Window { hits, expires_at }) if *expires_at > now => {
                let live = hits.iter().filter(|(score, _)| *score > window_start);
                WindowSnapshot {
                    hits: live.clone().count() as u64,
                    oldest_hit_ms: live.map(|(score, _)| *score).min(),
                }
            }
            Some(Entry::Flag { expires_at }) if *expires_at > now => {
                return Err(StoreError::protocol(
                    "WRONGTYPE Operation against a key holding the wrong kind of value",
                ));
            }
            _ => WindowSnapshot {
                hits: 0,
                oldest_hit_ms: None,
            },
        };
        Ok(snapshot)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_outage()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_outage()?;
        let now = self.clock.now_ms();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let mut entries = self.entries.lock().await;
        Self::make_room(&mut entries, key, now);
        entries.insert(
            key.to_string(),
            Entry::Flag {
                expires_at: now.saturating_add(ttl_ms),
            },
        );
        Ok(())
    }

    async fn flag_exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_outage()?;
        let now = self.clock.now_ms();
        let entries = self.entries.lock().await;
        Ok(entries.get(key).is_some_and(|e| e.expires_at() > now))
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.check_outage()?;
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| StoreError::protocol(format!("invalid key pattern {:?}: {}", pattern, e)))?;
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().await;
        Self::sweep_expired(&mut entries, now);
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| matcher.matches(key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for InMemoryRateLimitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRateLimitStore").finish_non_exhaustive()
    }
}
