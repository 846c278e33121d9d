use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use tracing::info;

use super::{RequestError, admit, parse_body, relay_response};
use crate::api::FastCheckRequest;
use crate::llm::{ModelMessage, ModelRequest};
use crate::rate_limit::{ClientAddress, Endpoint};
use crate::server::AppState;

/// POST /api/fast
pub async fn fast_check(
    State(state): State<AppState>,
    ClientAddress(address): ClientAddress,
    body: Bytes,
) -> Response {
    if let Err(e) = admit(&state.governor, Endpoint::Fast, &address).await {
        return e.into_response();
    }
    let request: FastCheckRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };
    let idea = match request.validated_idea() {
        Ok(idea) => idea,
        Err(e) => return RequestError::from(e).into_response(),
    };

    info!(address = %address, chars = idea.chars().count(), "Starting fast check");

    let model_request = ModelRequest {
        system: state.prompts.fast_check(),
        messages: vec![ModelMessage::user(idea)],
        tools: Vec::new(),
    };
    relay_response(state.provider.stream(model_request).await, Endpoint::Fast)
}
