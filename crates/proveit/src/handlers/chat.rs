use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use tracing::info;

use super::{RequestError, admit, parse_body, relay_response};
use crate::api::{ChatMessage, ChatRequest, Role};
use crate::llm::{ModelMessage, ModelRequest, ToolDeclaration};
use crate::rate_limit::{ClientAddress, Endpoint};
use crate::server::AppState;
use proveit_protocol::Phase;

/// POST /api/chat
pub async fn chat(
    State(state): State<AppState>,
    ClientAddress(address): ClientAddress,
    body: Bytes,
) -> Response {
    if let Err(e) = admit(&state.governor, Endpoint::Chat, &address).await {
        return e.into_response();
    }
    let request: ChatRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = request.validate() {
        return RequestError::from(e).into_response();
    }

    info!(
        session_id = %request.session_id,
        phase = %request.phase,
        messages = request.messages.len(),
        "Starting chat turn"
    );

    let model_request = ModelRequest {
        system: state.prompts.chat(request.phase, &request.scores),
        messages: recent_history(&request.messages, state.history_limit),
        tools: tools_for(request.phase, state.web_search_max_uses),
    };
    relay_response(state.provider.stream(model_request).await, Endpoint::Chat)
}

/// The latest `limit` messages, starting at a user turn.
fn recent_history(messages: &[ChatMessage], limit: usize) -> Vec<ModelMessage> {
    let start = messages.len().saturating_sub(limit);
    messages[start..]
        .iter()
        .skip_while(|m| m.role == Role::Assistant)
        .map(|m| ModelMessage {
            role: m.role,
            content: m.content.clone(),
        })
        .collect()
}

/// Web search is only offered while researching.
fn tools_for(phase: Phase, web_search_max_uses: u32) -> Vec<ToolDeclaration> {
    if phase == Phase::Research {
        vec![ToolDeclaration::WebSearch {
            max_uses: web_search_max_uses,
        }]
    } else {
        Vec::new()
    }
}
