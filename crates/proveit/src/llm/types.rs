use std::pin::Pin;

use futures::Stream;

use super::error::LLMError;
use crate::api::Role;

/// Name of the server-side web search tool.
pub const WEB_SEARCH_TOOL: &str = "web_search";

/// One model call: system prompt, conversation and optional tools.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMessage {
    pub role: Role,
    pub content: String,
}

impl ModelMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDeclaration {
    /// Vendor-hosted web search, capped at `max_uses` per response.
    WebSearch { max_uses: u32 },
}

/// What kind of content a block carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlockKind {
    Text,
    ToolUse { name: String },
    /// Anything else (tool results, thinking, ...), carried by its vendor type.
    Other(String),
}

/// Typed content events, in the order the model produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    BlockStart {
        index: usize,
        block: ContentBlockKind,
    },
    TextDelta {
        index: usize,
        text: String,
    },
    /// Fragment of a tool invocation's JSON arguments.
    InputJsonDelta {
        index: usize,
        partial_json: String,
    },
    BlockStop {
        index: usize,
    },
}

/// Pull-based, single-pass sequence of model events. Ends when the response
/// is complete.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, LLMError>> + Send>>;
