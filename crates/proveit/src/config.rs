use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub rate_limit_store: RateLimitStoreConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,

    #[error("invalid rate limit for '{endpoint}': limit and window must be non-zero")]
    InvalidRateLimit { endpoint: &'static str },
}

impl Config {
    /// Load from a YAML file. A missing file yields the defaults.
    ///
    /// Secrets the file leaves out are picked up from the environment
    /// (`ANTHROPIC_API_KEY`, `UPSTASH_REDIS_REST_URL`, `UPSTASH_REDIS_REST_TOKEN`).
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config: Self = match fs::read_to_string(path).await {
            Ok(contents) => {
                let expanded = expand_env_vars(&contents)?;
                serde_saphyr::from_str(&expanded)?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        config.apply_env_fallbacks(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.llm.api_key =
            non_empty(self.llm.api_key.take()).or_else(|| non_empty(lookup(ENV_API_KEY)));

        let configured = self
            .rate_limit_store
            .upstash
            .take()
            .filter(|u| !u.url.is_empty() && !u.token.is_empty());
        self.rate_limit_store.upstash = configured.or_else(|| {
            let url = non_empty(lookup(ENV_UPSTASH_URL))?;
            let token = non_empty(lookup(ENV_UPSTASH_TOKEN))?;
            Some(UpstashConfig { url, token })
        });
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("chat", &self.rate_limits.chat),
            ("fast", &self.rate_limits.fast),
        ];
        for (endpoint, limit) in limits {
            if limit.limit == 0 || limit.window_seconds == 0 {
                return Err(ConfigError::InvalidRateLimit { endpoint });
            }
        }
        Ok(())
    }
}

pub const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_UPSTASH_URL: &str = "UPSTASH_REDIS_REST_URL";
pub const ENV_UPSTASH_TOKEN: &str = "UPSTASH_REDIS_REST_TOKEN";

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    256
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}

fn default_max_tokens() -> u32 {
    8096
}

fn default_web_search_max_uses() -> u32 {
    5
}

fn default_window_seconds() -> u64 {
    60
}

fn default_history_limit() -> usize {
    48
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// - `${VAR}` - required, errors if not set
/// - `${VAR:-default}` - optional with default
/// - `$$` - literal `$`
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                result.push_str(&expand_var_reference(&mut chars)?);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Expand the body of a `${...}` reference; the opening `${` is already consumed.
fn expand_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut body = String::new();
    let mut closed = false;
    for c in chars.by_ref() {
        if c == '}' {
            closed = true;
            break;
        }
        body.push(c);
    }
    if !closed {
        return Err(ConfigError::UnclosedVarReference);
    }

    let (name, default) = match body.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (body.as_str(), None),
    };

    match (std::env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Applies to health endpoints only; streaming routes have no timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

// ============================================================================
// LlmConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_web_search_max_uses")]
    pub web_search_max_uses: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            web_search_max_uses: default_web_search_max_uses(),
        }
    }
}

// ============================================================================
// Rate limiting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

impl RateLimitConfig {
    pub const fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub chat: RateLimitConfig,
    pub fast: RateLimitConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            chat: RateLimitConfig::new(20, 60),
            fast: RateLimitConfig::new(10, 60),
        }
    }
}

/// Where rate-limit counters live. Without `upstash` they stay in process.
#[derive(Debug, Default, Deserialize)]
pub struct RateLimitStoreConfig {
    #[serde(default)]
    pub upstash: Option<UpstashConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstashConfig {
    pub url: String,
    pub token: String,
}

// ============================================================================
// SessionConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Most recent messages forwarded to the model per turn.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.llm.model, "claude-sonnet-4-6");
        assert_eq!(config.llm.max_tokens, 8096);
        assert_eq!(config.llm.web_search_max_uses, 5);
        assert_eq!(config.rate_limits.chat, RateLimitConfig::new(20, 60));
        assert_eq!(config.rate_limits.fast, RateLimitConfig::new(10, 60));
        assert_eq!(config.session.history_limit, 48);
        assert!(config.rate_limit_store.upstash.is_none());
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let config = Config::load(tmp_dir.path().join("missing.yaml"))
            .await
            .unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.rate_limits.chat.limit, 20);
    }

    #[tokio::test]
    async fn test_load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 8081
llm:
  api_key: sk-test
  model: claude-test
  max_tokens: 1024
rate_limits:
  chat:
    limit: 5
    window_seconds: 30
session:
  history_limit: 10
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.model, "claude-test");
        assert_eq!(config.llm.max_tokens, 1024);
        assert_eq!(config.rate_limits.chat, RateLimitConfig::new(5, 30));
        assert_eq!(config.rate_limits.fast, RateLimitConfig::new(10, 60));
        assert_eq!(config.session.history_limit, 10);
    }

    #[tokio::test]
    async fn test_load_partial_rate_limit_uses_default_window() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "rate_limits:\n  fast:\n    limit: 3\n").unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.rate_limits.fast, RateLimitConfig::new(3, 60));
        assert_eq!(config.rate_limits.chat, RateLimitConfig::new(20, 60));
    }

    #[tokio::test]
    async fn test_load_rejects_zero_limit() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "rate_limits:\n  chat:\n    limit: 0\n").unwrap();

        let result = Config::load(file.path()).await;
        assert!(matches!(
            result,
            Err(ConfigError::InvalidRateLimit { endpoint: "chat" })
        ));
    }

    #[tokio::test]
    async fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "server: [unclosed").unwrap();

        assert!(Config::load(file.path()).await.is_err());
    }

    #[test]
    fn test_env_fallbacks_fill_missing_secrets() {
        let mut config = Config::default();
        config.apply_env_fallbacks(lookup_from(&[
            (ENV_API_KEY, "sk-env"),
            (ENV_UPSTASH_URL, "https://example.upstash.io"),
            (ENV_UPSTASH_TOKEN, "tok"),
        ]));

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-env"));
        let upstash = config.rate_limit_store.upstash.unwrap();
        assert_eq!(upstash.url, "https://example.upstash.io");
        assert_eq!(upstash.token, "tok");
    }

    #[test]
    fn test_env_fallbacks_keep_file_values() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-file".to_string());
        config.apply_env_fallbacks(lookup_from(&[(ENV_API_KEY, "sk-env")]));

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-file"));
    }

    #[test]
    fn test_env_fallbacks_need_both_upstash_vars() {
        let mut config = Config::default();
        config.apply_env_fallbacks(lookup_from(&[(ENV_UPSTASH_URL, "https://x")]));

        assert!(config.rate_limit_store.upstash.is_none());
    }

    #[test]
    fn test_empty_api_key_treated_as_missing() {
        let mut config = Config::default();
        config.llm.api_key = Some(String::new());
        config.apply_env_fallbacks(lookup_from(&[]));

        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "plain string without variables";
        assert_eq!(expand_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_expand_env_vars_required_var() {
        // SAFETY: Single-threaded test
        unsafe { std::env::set_var("PROVEIT_TEST_REQUIRED", "value") };
        let result = expand_env_vars("key: ${PROVEIT_TEST_REQUIRED}").unwrap();
        assert_eq!(result, "key: value");
        unsafe { std::env::remove_var("PROVEIT_TEST_REQUIRED") };
    }

    #[test]
    fn test_expand_env_vars_missing_required_var() {
        // SAFETY: Single-threaded test
        unsafe { std::env::remove_var("PROVEIT_TEST_MISSING") };
        match expand_env_vars("key: ${PROVEIT_TEST_MISSING}") {
            Err(ConfigError::MissingEnvVar(name)) => assert_eq!(name, "PROVEIT_TEST_MISSING"),
            other => panic!("expected MissingEnvVar, got {other:?}"),
        }
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        // SAFETY: Single-threaded test
        unsafe { std::env::remove_var("PROVEIT_TEST_DEFAULTED") };
        let result = expand_env_vars("port: ${PROVEIT_TEST_DEFAULTED:-3000}").unwrap();
        assert_eq!(result, "port: 3000");
    }

    #[test]
    fn test_expand_env_vars_empty_default() {
        // SAFETY: Single-threaded test
        unsafe { std::env::remove_var("PROVEIT_TEST_EMPTY") };
        let result = expand_env_vars("api_key: ${PROVEIT_TEST_EMPTY:-}").unwrap();
        assert_eq!(result, "api_key: ");
    }

    #[test]
    fn test_expand_env_vars_escaped_and_literal_dollar() {
        let result = expand_env_vars("price: $$100 or $5 ${PROVEIT_TEST_UNSET_X:-ok}").unwrap();
        assert_eq!(result, "price: $100 or $5 ok");
    }

    #[test]
    fn test_expand_env_vars_unclosed_brace() {
        assert!(matches!(
            expand_env_vars("key: ${UNCLOSED"),
            Err(ConfigError::UnclosedVarReference)
        ));
    }
}
