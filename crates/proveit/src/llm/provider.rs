use async_trait::async_trait;

use super::error::LLMError;
use super::types::{ModelRequest, ModelStream};

/// Something that can turn a [`ModelRequest`] into a stream of events.
///
/// Opening the stream may succeed even though the first poll fails; callers
/// must treat errors from either step the same way.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, LLMError>;
}
