//! Two-window rate limiting for external resources.
//!
//! Tracks per-resource usage against a per-minute and per-day quota, plus
//! optional minimum-interval spacing for write classes. Quota accounting is
//! pure bookkeeping and never blocks; only `acquire` (interval spacing)
//! sleeps, and it is always called from a spawned workflow task.
//!
//! Window rollover is lazy: counters reset on the first access after a
//! minute or calendar-day boundary, so no background task is needed for
//! accounting alone.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Limits for one rate-limited resource (a model tier or a write class).
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum calls per minute.
    pub max_per_minute: u32,
    /// Maximum calls per calendar day.
    pub max_per_day: u32,
    /// Minimum spacing between calls, for write classes.
    pub min_interval: Option<Duration>,
}

impl ResourceLimits {
    /// A quota-only resource (e.g. a generative-model tier).
    pub fn quota(max_per_minute: u32, max_per_day: u32) -> Self {
        Self {
            max_per_minute,
            max_per_day,
            min_interval: None,
        }
    }

    /// A spacing-only resource (e.g. a platform write class).
    pub fn spacing(min_interval: Duration) -> Self {
        Self {
            max_per_minute: u32::MAX,
            max_per_day: u32::MAX,
            min_interval: Some(min_interval),
        }
    }
}

#[derive(Debug)]
struct QuotaState {
    limits: HashMap<String, ResourceLimits>,
    minute: HashMap<String, u32>,
    day: HashMap<String, u32>,
    last_minute_reset: DateTime<Utc>,
    last_day: NaiveDate,
}

impl QuotaState {
    fn rollover(&mut self, now: DateTime<Utc>) {
        if now.date_naive() != self.last_day {
            self.day.clear();
            self.last_day = now.date_naive();
        }
        if now - self.last_minute_reset >= chrono::Duration::seconds(60) {
            self.minute.clear();
            self.last_minute_reset = now;
        }
    }
}

/// Per-resource usage accounting against minute/day quotas and
/// minimum-interval spacing.
///
/// One instance is shared by every workflow in the process; inject it by
/// `Arc` rather than reaching for globals.
#[derive(Debug)]
pub struct RateLimiter {
    quotas: Mutex<QuotaState>,
    /// Last-use instants for spacing resources.
    spacing: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            quotas: Mutex::new(QuotaState {
                limits: HashMap::new(),
                minute: HashMap::new(),
                day: HashMap::new(),
                last_minute_reset: now,
                last_day: now.date_naive(),
            }),
            spacing: Mutex::new(HashMap::new()),
        }
    }

    /// Register a resource. Consuming an unregistered resource always fails.
    pub fn register(&self, key: impl Into<String>, limits: ResourceLimits) {
        let key = key.into();
        let mut state = self.lock_quotas();
        state.limits.insert(key, limits);
    }

    /// Check whether a call against `key` is currently permitted.
    ///
    /// Returns `false` without side effects when either window is exhausted
    /// or the resource is unknown. Never blocks; usage is recorded
    /// separately once the call is confirmed sent.
    pub fn try_consume(&self, key: &str) -> bool {
        self.try_consume_at(key, Utc::now())
    }

    /// Record one successful call against `key`.
    ///
    /// Called only after the external call is confirmed sent, so skipping a
    /// tier never pollutes its counters.
    pub fn record_usage(&self, key: &str) {
        self.record_usage_at(key, Utc::now());
    }

    fn try_consume_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut state = self.lock_quotas();
        state.rollover(now);

        let Some(limits) = state.limits.get(key) else {
            debug!(resource = key, "try_consume on unregistered resource");
            return false;
        };
        let (max_minute, max_day) = (limits.max_per_minute, limits.max_per_day);

        let used_minute = state.minute.get(key).copied().unwrap_or(0);
        let used_day = state.day.get(key).copied().unwrap_or(0);
        used_minute < max_minute && used_day < max_day
    }

    fn record_usage_at(&self, key: &str, now: DateTime<Utc>) {
        let mut state = self.lock_quotas();
        state.rollover(now);
        *state.minute.entry(key.to_string()).or_insert(0) += 1;
        *state.day.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Wait until the minimum interval since the last use of `key` has
    /// elapsed, then mark it used.
    ///
    /// The one blocking operation in the core. Resources without a
    /// configured interval return immediately.
    pub async fn acquire(&self, key: &str) -> murmur_common::Result<()> {
        loop {
            let wait = {
                let interval = {
                    let state = self.lock_quotas();
                    match state.limits.get(key) {
                        Some(limits) => limits.min_interval,
                        None => {
                            return Err(murmur_common::Error::Config(format!(
                                "unregistered rate-limit resource: {key}"
                            )))
                        }
                    }
                };
                let Some(interval) = interval else {
                    return Ok(());
                };

                let mut spacing = self.lock_spacing();
                let now = Instant::now();
                match spacing.get(key) {
                    Some(last) if now.duration_since(*last) < interval => {
                        interval - now.duration_since(*last)
                    }
                    _ => {
                        spacing.insert(key.to_string(), now);
                        return Ok(());
                    }
                }
            };

            debug!(resource = key, wait_ms = wait.as_millis() as u64, "Spacing interval not elapsed, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    fn lock_quotas(&self) -> std::sync::MutexGuard<'_, QuotaState> {
        self.quotas.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_spacing(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        self.spacing.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
