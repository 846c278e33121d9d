//! In-process fixed-window counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::{Endpoint, RateLimitBackend, RateLimitDecision};
use crate::config::RateLimitConfig;

/// Default interval between background sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started_at: DateTime<Utc>,
    length: TimeDelta,
}

impl Window {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.started_at >= self.length * 2
    }
}

/// Counters for one endpoint, keyed by client address.
#[derive(Default)]
struct EndpointStore {
    windows: DashMap<String, Window>,
    /// Unix millis of the last lazy sweep.
    last_sweep: AtomicI64,
}

impl EndpointStore {
    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_stale(now));
        before.saturating_sub(self.windows.len())
    }

    /// Sweep at most once per window length.
    fn maybe_sweep(&self, now: DateTime<Utc>, length: TimeDelta) {
        let now_ms = now.timestamp_millis();
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now_ms - last < length.num_milliseconds() {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.sweep(now);
        }
    }
}

/// Fixed-window limiter holding every counter in memory.
///
/// Cheap to clone; clones share counters. Entries idle for two windows are
/// purged lazily on the request path, and [`spawn_cleanup_task`] adds a
/// periodic sweep for quiet servers.
///
/// [`spawn_cleanup_task`]: InMemoryRateLimiter::spawn_cleanup_task
#[derive(Clone, Default)]
pub struct InMemoryRateLimiter {
    chat: Arc<EndpointStore>,
    fast: Arc<EndpointStore>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, endpoint: Endpoint) -> &EndpointStore {
        match endpoint {
            Endpoint::Chat => &self.chat,
            Endpoint::Fast => &self.fast,
        }
    }

    /// Check and count one request at an explicit instant.
    pub fn check_at(
        &self,
        endpoint: Endpoint,
        address: &str,
        limit: RateLimitConfig,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let length = window_length(&limit);
        let store = self.store(endpoint);
        // Sweep before taking the entry lock; `retain` locks every shard.
        store.maybe_sweep(now, length);

        let mut window = store
            .windows
            .entry(address.to_string())
            .or_insert(Window {
                count: 0,
                started_at: now,
                length,
            });

        if now >= window.started_at + window.length {
            *window = Window {
                count: 0,
                started_at: now,
                length,
            };
        }

        let reset_at = window.started_at + window.length;
        if window.count >= limit.limit {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at,
            };
        }

        window.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: limit.limit - window.count,
            reset_at,
        }
    }

    /// Remove entries idle for at least two windows. Returns how many went.
    pub fn cleanup_stale(&self, now: DateTime<Utc>) -> usize {
        self.chat.sweep(now) + self.fast.sweep(now)
    }

    /// Number of tracked (endpoint, address) pairs.
    pub fn len(&self) -> usize {
        self.chat.windows.len() + self.fast.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn a background sweep using [`DEFAULT_CLEANUP_INTERVAL`].
    pub fn spawn_cleanup_task(self, name: &'static str) {
        self.spawn_cleanup_task_with(DEFAULT_CLEANUP_INTERVAL, name);
    }

    pub fn spawn_cleanup_task_with(self, interval: Duration, name: &'static str) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = self.cleanup_stale(Utc::now());
                if removed > 0 {
                    debug!(
                        removed,
                        remaining = self.len(),
                        limiter = name,
                        "Purged stale rate limit windows"
                    );
                }
            }
        });
    }
}

#[async_trait]
impl RateLimitBackend for InMemoryRateLimiter {
    async fn check(
        &self,
        endpoint: Endpoint,
        address: &str,
        limit: RateLimitConfig,
    ) -> RateLimitDecision {
        self.check_at(endpoint, address, limit, Utc::now())
    }
}

fn window_length(limit: &RateLimitConfig) -> TimeDelta {
    i64::try_from(limit.window_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::days(36_500))
}
