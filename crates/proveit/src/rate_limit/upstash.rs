//! Distributed fixed window over the Upstash Redis REST pipeline.
//!
//! One round trip per check: `INCR` the window key, give it an expiry if it
//! has none (`PEXPIRE … NX`), then read the remaining lifetime with `PTTL`.
//! The key's expiry is the window, so rollover happens in Redis.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use super::{Endpoint, InMemoryRateLimiter, RateLimitBackend, RateLimitDecision, limit_for};
use crate::config::{RateLimitConfig, RateLimitsConfig, UpstashConfig};

const KEY_PREFIX: &str = "proveit:ratelimit";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
enum UpstashError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstash returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("command failed: {0}")]
    Command(String),
    #[error("unexpected pipeline response")]
    Malformed,
}

#[derive(Debug, Deserialize)]
struct CommandResult {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl CommandResult {
    fn integer(&self) -> Result<i64, UpstashError> {
        if let Some(error) = &self.error {
            return Err(UpstashError::Command(error.clone()));
        }
        self.result
            .as_ref()
            .and_then(Value::as_i64)
            .ok_or(UpstashError::Malformed)
    }
}

/// Rate limiter shared across server instances through Upstash.
///
/// Limits are fixed at construction. If Upstash cannot be reached the
/// request is decided by an in-process limiter instead.
pub struct UpstashRateLimiter {
    client: reqwest::Client,
    pipeline_url: String,
    token: String,
    limits: RateLimitsConfig,
    fallback: InMemoryRateLimiter,
}

impl UpstashRateLimiter {
    pub fn new(client: reqwest::Client, config: &UpstashConfig, limits: RateLimitsConfig) -> Self {
        Self {
            client,
            pipeline_url: format!("{}/pipeline", config.url.trim_end_matches('/')),
            token: config.token.clone(),
            limits,
            fallback: InMemoryRateLimiter::new(),
        }
    }

    async fn check_remote(
        &self,
        endpoint: Endpoint,
        address: &str,
        limit: RateLimitConfig,
    ) -> Result<RateLimitDecision, UpstashError> {
        let key = format!("{KEY_PREFIX}:{endpoint}:{address}");
        let window_ms = limit.window().as_millis().to_string();
        let body = json!([
            ["INCR", key],
            ["PEXPIRE", key, window_ms, "NX"],
            ["PTTL", key],
        ]);

        let response = self
            .client
            .post(&self.pipeline_url)
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstashError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let results: Vec<CommandResult> = response.json().await?;
        let [count, _expire, ttl] = results.as_slice() else {
            return Err(UpstashError::Malformed);
        };
        Ok(decide(count.integer()?, ttl.integer()?, limit, Utc::now()))
    }
}

/// Turn the pipeline's counter and TTL into a decision.
fn decide(count: i64, ttl_ms: i64, limit: RateLimitConfig, now: DateTime<Utc>) -> RateLimitDecision {
    let count = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
    let ttl = if ttl_ms > 0 {
        TimeDelta::milliseconds(ttl_ms)
    } else {
        TimeDelta::from_std(limit.window()).unwrap_or(TimeDelta::days(36_500))
    };

    RateLimitDecision {
        allowed: count <= limit.limit,
        remaining: limit.limit.saturating_sub(count),
        reset_at: now + ttl,
    }
}

#[async_trait]
impl RateLimitBackend for UpstashRateLimiter {
    async fn check(
        &self,
        endpoint: Endpoint,
        address: &str,
        limit: RateLimitConfig,
    ) -> RateLimitDecision {
        let configured = limit_for(&self.limits, endpoint);
        if configured != limit {
            debug!(
                endpoint = %endpoint,
                requested = ?limit,
                configured = ?configured,
                "Ignoring per-call limit; Upstash windows are fixed at construction"
            );
        }

        match self.check_remote(endpoint, address, configured).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    endpoint = %endpoint,
                    error = %e,
                    "Upstash rate limit check failed, using in-process fallback"
                );
                self.fallback.check(endpoint, address, configured).await
            }
        }
    }
}
