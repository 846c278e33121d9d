//! Fixed-window admission control keyed by (endpoint, client address).
//!
//! The first request from an address opens a window of `window_seconds`;
//! up to `limit` requests are admitted until the window ends. Rollover is
//! lazy: nothing happens at the boundary until the next request arrives.

mod client_ip;
mod memory;
mod upstash;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{RateLimitConfig, RateLimitsConfig};

pub use client_ip::{ClientAddress, client_address};
pub use memory::InMemoryRateLimiter;
pub use upstash::UpstashRateLimiter;

/// Rate-limited API surface. Each endpoint has its own counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Chat,
    Fast,
}

impl Endpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::Chat => "chat",
            Endpoint::Fast => "fast",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds until the window ends, at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = u64::try_from((self.reset_at - now).num_milliseconds()).unwrap_or(0);
        millis.div_ceil(1000).max(1)
    }
}

/// Counter storage behind the governor.
///
/// Checks never fail: a backend that cannot reach its store decides the
/// request some other way and logs it.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    async fn check(
        &self,
        endpoint: Endpoint,
        address: &str,
        limit: RateLimitConfig,
    ) -> RateLimitDecision;
}

/// Backend plus the per-endpoint limit table.
#[derive(Clone)]
pub struct RateGovernor {
    backend: Arc<dyn RateLimitBackend>,
    limits: RateLimitsConfig,
}

impl RateGovernor {
    pub fn new(backend: Arc<dyn RateLimitBackend>, limits: RateLimitsConfig) -> Self {
        Self { backend, limits }
    }

    /// Governor over a fresh in-process store.
    pub fn in_memory(limits: RateLimitsConfig) -> Self {
        Self::new(Arc::new(InMemoryRateLimiter::new()), limits)
    }

    pub fn limit_for(&self, endpoint: Endpoint) -> RateLimitConfig {
        limit_for(&self.limits, endpoint)
    }

    pub async fn check(&self, endpoint: Endpoint, address: &str) -> RateLimitDecision {
        self.backend
            .check(endpoint, address, self.limit_for(endpoint))
            .await
    }
}

pub(crate) fn limit_for(limits: &RateLimitsConfig, endpoint: Endpoint) -> RateLimitConfig {
    match endpoint {
        Endpoint::Chat => limits.chat,
        Endpoint::Fast => limits.fast,
    }
}
