//! HTTP request handlers.

mod chat;
mod error;
mod fast;
mod health;
mod version;

pub use chat::chat;
pub use error::RequestError;
pub use fast::fast_check;
pub use health::{livez, readyz};
pub use version::version;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::llm::{LLMError, ModelStream};
use crate::rate_limit::{Endpoint, RateGovernor};
use crate::relay::StreamRelay;

pub const TEXT_STREAM_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Admission first; the body is not looked at for rejected requests.
async fn admit(
    governor: &RateGovernor,
    endpoint: Endpoint,
    address: &str,
) -> Result<(), RequestError> {
    let decision = governor.check(endpoint, address).await;
    if decision.allowed {
        Ok(())
    } else {
        debug!(endpoint = %endpoint, address, "Rate limit exceeded");
        Err(RequestError::RateLimited(decision))
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, RequestError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "Rejecting malformed request body");
        RequestError::InvalidBody
    })
}

/// 200 response whose body is the relay's hybrid stream.
///
/// A provider that fails before streaming still gets a 200; the failure is
/// reported as the stream's only event.
fn relay_response(upstream: Result<ModelStream, LLMError>, endpoint: Endpoint) -> Response {
    let label = endpoint.as_str();
    let relay = match upstream {
        Ok(stream) => StreamRelay::new(stream, label),
        Err(e) => StreamRelay::failed(e, label),
    };

    (
        [
            (header::CONTENT_TYPE, TEXT_STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(relay),
    )
        .into_response()
}
