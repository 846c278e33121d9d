//! Model invocation.
//!
//! The relay only sees [`ModelStream`]; everything vendor-specific stays
//! behind [`ModelProvider`].

mod anthropic;
mod error;
mod prompts;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use error::{ErrorClass, LLMError};
pub use prompts::{BuiltinPrompts, PromptSource};
pub use provider::ModelProvider;
pub use types::{
    ContentBlockKind, ModelEvent, ModelMessage, ModelRequest, ModelStream, ToolDeclaration,
    WEB_SEARCH_TOOL,
};
