use thiserror::Error;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success HTTP status before any event was streamed.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// An `error` event delivered inside an already-open stream.
    #[error("stream error ({error_type}): {message}")]
    Stream { error_type: String, message: String },

    #[error("no API key configured")]
    MissingApiKey,
}

/// Coarse failure classes, each with one stable user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ContextExceeded,
    Configuration,
    RateLimited,
    Overloaded,
    Unknown,
}

impl ErrorClass {
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorClass::ContextExceeded => "Conversation too long. Please start a new session.",
            ErrorClass::Configuration => "Service configuration error. Contact support.",
            ErrorClass::RateLimited => "Rate limit reached. Please wait a moment and try again.",
            ErrorClass::Overloaded => {
                "AI service is under high load. Please try again in a few seconds."
            }
            ErrorClass::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl LLMError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LLMError::Api { status, message } => match *status {
                400 | 413 if mentions_context_limit(message) => ErrorClass::ContextExceeded,
                401 | 403 => ErrorClass::Configuration,
                429 => ErrorClass::RateLimited,
                503 | 529 => ErrorClass::Overloaded,
                _ => ErrorClass::Unknown,
            },
            LLMError::Stream {
                error_type,
                message,
            } => match error_type.as_str() {
                "invalid_request_error" | "request_too_large"
                    if mentions_context_limit(message) =>
                {
                    ErrorClass::ContextExceeded
                }
                "authentication_error" | "permission_error" => ErrorClass::Configuration,
                "rate_limit_error" => ErrorClass::RateLimited,
                "overloaded_error" => ErrorClass::Overloaded,
                _ => ErrorClass::Unknown,
            },
            LLMError::MissingApiKey => ErrorClass::Configuration,
            LLMError::Request(_) => ErrorClass::Unknown,
        }
    }
}

fn mentions_context_limit(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["context_window_exceeded", "context window", "prompt is too long"]
        .iter()
        .any(|needle| message.contains(needle))
}
