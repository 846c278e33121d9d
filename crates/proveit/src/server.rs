use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::api::{CHAT_PATH, FAST_PATH};
use crate::config::Config;
use crate::handlers;
use crate::llm::{ModelProvider, PromptSource};
use crate::rate_limit::RateGovernor;

/// Request bodies above this are refused before any handler runs.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn ModelProvider>,
    pub prompts: Arc<dyn PromptSource>,
    pub governor: RateGovernor,
    pub web_search_max_uses: u32,
    pub history_limit: usize,
    pub max_connections: usize,
}

impl AppState {
    /// State wired from config around an already-built provider and governor.
    pub fn from_config(
        config: &Config,
        provider: Arc<dyn ModelProvider>,
        prompts: Arc<dyn PromptSource>,
        governor: RateGovernor,
    ) -> Self {
        Self {
            provider,
            prompts,
            governor,
            web_search_max_uses: config.llm.web_search_max_uses,
            history_limit: config.session.history_limit,
            max_connections: config.server.max_connections,
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    let max_connections = state.max_connections;

    // Streaming routes: no request timeout, a response may run for minutes
    // while the model searches.
    let streaming_routes = Router::new()
        .route(FAST_PATH, post(handlers::fast_check))
        .route(CHAT_PATH, post(handlers::chat))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(ConcurrencyLimitLayer::new(max_connections));

    let probe_routes = Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ));

    Router::new()
        .merge(probe_routes)
        .merge(streaming_routes)
        .with_state(state)
}
