//! HTTP server command implementation.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use proveit::build_info;
use proveit::config::Config;
use proveit::llm::{AnthropicProvider, BuiltinPrompts, ModelProvider};
use proveit::rate_limit::{InMemoryRateLimiter, RateGovernor, UpstashRateLimiter};
use proveit::server::{self, AppState};

pub async fn run(
    config_path: &str,
    host_override: Option<IpAddr>,
    port_override: Option<u16>,
) -> Result<()> {
    let mut config = Config::load(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    // CLI overrides config
    if let Some(host) = host_override {
        config.server.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }

    if config.llm.api_key.is_none() {
        warn!("No Anthropic API key configured; every request will report a configuration error");
    }

    let http = reqwest::Client::new();
    let provider: Arc<dyn ModelProvider> = Arc::new(AnthropicProvider::new(
        http.clone(),
        config.llm.api_key.clone(),
        &config.llm.base_url,
        config.llm.model.clone(),
        config.llm.max_tokens,
    ));
    let governor = build_governor(&config, http);

    let state = AppState::from_config(&config, provider, Arc::new(BuiltinPrompts), governor);
    let app = server::build_app(state, config.server.request_timeout_seconds);

    let ip: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid host '{}'", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(addr = %addr, model = %config.llm.model, version = %build_info::version_string(), "Starting server");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

fn build_governor(config: &Config, http: reqwest::Client) -> RateGovernor {
    let limits = config.rate_limits;
    match &config.rate_limit_store.upstash {
        Some(upstash) => {
            info!(url = %upstash.url, "Using Upstash for rate limits");
            RateGovernor::new(
                Arc::new(UpstashRateLimiter::new(http, upstash, limits)),
                limits,
            )
        }
        None => {
            let limiter = InMemoryRateLimiter::new();
            limiter.clone().spawn_cleanup_task("http");
            RateGovernor::new(Arc::new(limiter), limits)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
