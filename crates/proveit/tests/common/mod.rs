//! Common test utilities.

#![allow(dead_code)]

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::Router;
use futures::{Stream, StreamExt};

use proveit::config::{RateLimitConfig, RateLimitsConfig};
use proveit::llm::{
    BuiltinPrompts, ContentBlockKind, LLMError, ModelEvent, ModelProvider, ModelRequest,
    ModelStream,
};
use proveit::rate_limit::RateGovernor;
use proveit::server::{self, AppState};

/// One scripted step of a model response.
#[derive(Debug, Clone)]
pub enum Step {
    Event(ModelEvent),
    Fail { error_type: String, message: String },
}

/// Provider that replays a fixed script and records every request.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    script: Vec<Step>,
    open_error: Option<(u16, String)>,
    hang: bool,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
    released: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    /// Reply with plain text in a single block.
    pub fn text(text: &str) -> Self {
        Self::new(vec![
            Step::Event(ModelEvent::BlockStart {
                index: 0,
                block: ContentBlockKind::Text,
            }),
            Step::Event(ModelEvent::TextDelta {
                index: 0,
                text: text.to_string(),
            }),
            Step::Event(ModelEvent::BlockStop { index: 0 }),
        ])
    }

    /// Refuse to open the stream with an HTTP status.
    pub fn failing(status: u16, message: &str) -> Self {
        Self {
            open_error: Some((status, message.to_string())),
            ..Default::default()
        }
    }

    /// Replay `script`, then go quiet without ever finishing.
    pub fn hanging(script: Vec<Step>) -> Self {
        Self {
            script,
            hang: true,
            ..Default::default()
        }
    }

    /// Whether the last stream handed out has been dropped.
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, LLMError> {
        self.requests.lock().unwrap().push(request);
        if let Some((status, message)) = &self.open_error {
            return Err(LLMError::Api {
                status: *status,
                message: message.clone(),
            });
        }
        let items: Vec<Result<ModelEvent, LLMError>> = self
            .script
            .iter()
            .cloned()
            .map(|step| match step {
                Step::Event(event) => Ok(event),
                Step::Fail {
                    error_type,
                    message,
                } => Err(LLMError::Stream {
                    error_type,
                    message,
                }),
            })
            .collect();
        let scripted = futures::stream::iter(items);
        let inner: ModelStream = if self.hang {
            Box::pin(scripted.chain(futures::stream::pending()))
        } else {
            Box::pin(scripted)
        };
        self.released.store(false, Ordering::SeqCst);
        Ok(Box::pin(Tracked {
            inner,
            released: Arc::clone(&self.released),
        }))
    }
}

/// Model stream that records when it is dropped.
struct Tracked {
    inner: ModelStream,
    released: Arc<AtomicBool>,
}

impl Stream for Tracked {
    type Item = Result<ModelEvent, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Wait until `check` holds, failing after five seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    check()
}

pub fn generous_limits() -> RateLimitsConfig {
    RateLimitsConfig {
        chat: RateLimitConfig::new(1000, 60),
        fast: RateLimitConfig::new(1000, 60),
    }
}

/// Create a test `AppState` around a provider.
pub fn test_app_state(provider: ScriptedProvider, limits: RateLimitsConfig) -> AppState {
    AppState {
        provider: Arc::new(provider),
        prompts: Arc::new(BuiltinPrompts),
        governor: RateGovernor::in_memory(limits),
        web_search_max_uses: 5,
        history_limit: 48,
        max_connections: 64,
    }
}

/// Create a test app whose model always answers with `provider`.
pub fn test_app_with(provider: ScriptedProvider) -> Router {
    server::build_app(test_app_state(provider, generous_limits()), 300)
}

/// Create a test app whose model replies "ok".
pub fn test_app() -> Router {
    test_app_with(ScriptedProvider::text("ok"))
}

/// Serve `provider` on an ephemeral local port and return its base URL.
pub async fn spawn_server(provider: ScriptedProvider) -> String {
    let app = test_app_with(provider);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .unwrap();
    });
    format!("http://{addr}")
}
