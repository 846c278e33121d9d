//! Anthropic Messages API provider (streaming only).

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::LLMError;
use super::provider::ModelProvider;
use super::types::{
    ContentBlockKind, ModelEvent, ModelMessage, ModelRequest, ModelStream, ToolDeclaration,
    WEB_SEARCH_TOOL,
};
use crate::sse_parser::SseEventStream;

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_version: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub const DEFAULT_API_VERSION: &'static str = "2023-06-01";

    #[must_use]
    pub fn new(
        client: Client,
        api_key: Option<String>,
        base_url: &str,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_version: Self::DEFAULT_API_VERSION.to_string(),
            model: model.into(),
            max_tokens,
        }
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, LLMError> {
        let api_key = self.api_key.as_deref().ok_or(LLMError::MissingApiKey)?;
        let url = format!("{}/v1/messages", self.base_url);
        let body = to_request(&request, &self.model, self.max_tokens);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.api_version)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LLMError::Api { status, message });
        }

        let events = SseEventStream::new(response.bytes_stream());
        Ok(Box::pin(AnthropicStreamAdapter::new(events)))
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Serialize)]
struct Request<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<RequestMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<RequestTool>,
    stream: bool,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct RequestTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    name: &'static str,
    max_uses: u32,
}

fn to_request<'a>(request: &'a ModelRequest, model: &'a str, max_tokens: u32) -> Request<'a> {
    Request {
        model,
        max_tokens,
        system: &request.system,
        messages: request.messages.iter().map(to_message).collect(),
        tools: request.tools.iter().map(to_tool).collect(),
        stream: true,
    }
}

fn to_message(message: &ModelMessage) -> RequestMessage<'_> {
    RequestMessage {
        role: message.role.as_str(),
        content: &message.content,
    }
}

fn to_tool(tool: &ToolDeclaration) -> RequestTool {
    match tool {
        ToolDeclaration::WebSearch { max_uses } => RequestTool {
            tool_type: "web_search_20250305",
            name: WEB_SEARCH_TOOL,
            max_uses: *max_uses,
        },
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Maps Anthropic SSE payloads onto [`ModelEvent`]s.
struct AnthropicStreamAdapter<S> {
    inner: SseEventStream<S>,
    done: bool,
}

impl<S> AnthropicStreamAdapter<S> {
    fn new(inner: SseEventStream<S>) -> Self {
        Self { inner, done: false }
    }
}

enum Step {
    Emit(ModelEvent),
    Fail(LLMError),
    Finish,
    Skip,
}

fn translate(event: AnthropicStreamEvent) -> Step {
    match event {
        AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block,
        } => {
            let block = match content_block.block_type.as_str() {
                "text" => ContentBlockKind::Text,
                "tool_use" | "server_tool_use" => ContentBlockKind::ToolUse {
                    name: content_block.name.unwrap_or_default(),
                },
                other => ContentBlockKind::Other(other.to_string()),
            };
            Step::Emit(ModelEvent::BlockStart { index, block })
        }
        AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
            Delta::TextDelta { text } => Step::Emit(ModelEvent::TextDelta { index, text }),
            Delta::InputJsonDelta { partial_json } => {
                Step::Emit(ModelEvent::InputJsonDelta {
                    index,
                    partial_json,
                })
            }
            Delta::Other => Step::Skip,
        },
        AnthropicStreamEvent::ContentBlockStop { index } => {
            Step::Emit(ModelEvent::BlockStop { index })
        }
        AnthropicStreamEvent::MessageStop => Step::Finish,
        AnthropicStreamEvent::Error { error } => Step::Fail(LLMError::Stream {
            error_type: error.error_type,
            message: error.message,
        }),
        AnthropicStreamEvent::Unknown => Step::Skip,
    }
}

impl<S> Stream for AnthropicStreamAdapter<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<ModelEvent, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if event.data.is_empty() {
                        continue;
                    }
                    let parsed = match serde_json::from_str::<AnthropicStreamEvent>(&event.data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            debug!(data = %event.data, error = %e, "Failed to parse Anthropic SSE event");
                            continue;
                        }
                    };
                    match translate(parsed) {
                        Step::Emit(event) => return Poll::Ready(Some(Ok(event))),
                        Step::Fail(e) => {
                            self.done = true;
                            return Poll::Ready(Some(Err(e)));
                        }
                        Step::Finish => {
                            self.done = true;
                            return Poll::Ready(None);
                        }
                        Step::Skip => {}
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(LLMError::Request(e))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Anthropic SSE payloads. Only the fields the relay needs are decoded.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    ContentBlockStart {
        index: usize,
        content_block: StreamContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageStop,
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct StreamContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StreamError {
    #[serde(rename = "type")]
    error_type: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Role;
    use futures::StreamExt;

    fn sse(body: &str) -> SseEventStream<impl Stream<Item = Result<Bytes, reqwest::Error>> + Unpin> {
        let chunks = vec![Ok(Bytes::from(body.to_string()))];
        SseEventStream::new(futures::stream::iter(chunks))
    }

    async fn events(body: &str) -> Vec<Result<ModelEvent, LLMError>> {
        AnthropicStreamAdapter::new(sse(body)).collect().await
    }

    #[test]
    fn request_includes_web_search_tool() {
        let request = ModelRequest {
            system: "sys".into(),
            messages: vec![ModelMessage::user("hello")],
            tools: vec![ToolDeclaration::WebSearch { max_uses: 5 }],
        };
        let json = serde_json::to_value(to_request(&request, "claude-test", 8096)).unwrap();

        assert_eq!(json["model"], "claude-test");
        assert_eq!(json["max_tokens"], 8096);
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(
            json["tools"][0],
            serde_json::json!({"type": "web_search_20250305", "name": "web_search", "max_uses": 5})
        );
    }

    #[test]
    fn request_omits_empty_tools() {
        let request = ModelRequest {
            system: "sys".into(),
            messages: vec![ModelMessage {
                role: Role::Assistant,
                content: "hi".into(),
            }],
            tools: vec![],
        };
        let json = serde_json::to_value(to_request(&request, "m", 1)).unwrap();

        assert!(json.get("tools").is_none());
        assert_eq!(json["messages"][0]["role"], "assistant");
    }

    #[tokio::test]
    async fn maps_text_and_server_tool_blocks() {
        let body = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"server_tool_use\",\"id\":\"srvtoolu_1\",\"name\":\"web_search\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"query\\\":\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"web_search_tool_result\",\"tool_use_id\":\"srvtoolu_1\",\"content\":[]}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":2,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":2,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "event: ping\ndata: {\"type\":\"ping\"}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );
        let events: Vec<ModelEvent> = events(body).await.into_iter().map(|e| e.unwrap()).collect();

        assert_eq!(
            events,
            vec![
                ModelEvent::BlockStart {
                    index: 0,
                    block: ContentBlockKind::ToolUse {
                        name: "web_search".into()
                    }
                },
                ModelEvent::InputJsonDelta {
                    index: 0,
                    partial_json: "{\"query\":".into()
                },
                ModelEvent::BlockStop { index: 0 },
                ModelEvent::BlockStart {
                    index: 1,
                    block: ContentBlockKind::Other("web_search_tool_result".into())
                },
                ModelEvent::BlockStart {
                    index: 2,
                    block: ContentBlockKind::Text
                },
                ModelEvent::TextDelta {
                    index: 2,
                    text: "Hi".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn mid_stream_error_event_fails_the_stream() {
        let body = concat!(
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"par\"}}\n\n",
            "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"never\"}}\n\n",
        );
        let events = events(body).await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        match &events[1] {
            Err(LLMError::Stream { error_type, .. }) => assert_eq!(error_type, "overloaded_error"),
            other => panic!("expected stream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_payloads_are_skipped() {
        let body = "data: not json\n\ndata: {\"type\":\"content_block_stop\",\"index\":3}\n\n";
        let events: Vec<ModelEvent> = events(body).await.into_iter().map(|e| e.unwrap()).collect();

        assert_eq!(events, vec![ModelEvent::BlockStop { index: 3 }]);
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let provider = AnthropicProvider::new(Client::new(), None, "http://127.0.0.1:9", "m", 16);
        let request = ModelRequest {
            system: String::new(),
            messages: vec![ModelMessage::user("hi")],
            tools: vec![],
        };

        assert!(matches!(
            provider.stream(request).await,
            Err(LLMError::MissingApiKey)
        ));
    }
}
