//! Client error types.

use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

const FALLBACK_MESSAGE: &str = "Something went wrong. Please try again.";

/// Errors that can occur when talking to a proveit server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server rejected the request.
    #[error("api error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// Server turned the request away until the window resets.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Server health check failed.
    #[error("server unhealthy (status {status})")]
    ServerUnhealthy { status: u16 },

    /// Response body ended without a `done` or `error` event.
    #[error("stream ended unexpectedly")]
    StreamEnded,
}

impl ClientError {
    /// Text suitable for showing to the person at the keyboard.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::ApiError { message, .. } => message.clone(),
            ClientError::RateLimited {
                message,
                retry_after_secs: Some(secs),
            } => format!("{message} (retry in {secs}s)"),
            ClientError::RateLimited { message, .. } => message.clone(),
            ClientError::Http(_) | ClientError::ServerUnhealthy { .. } | ClientError::StreamEnded => {
                FALLBACK_MESSAGE.to_string()
            }
        }
    }
}
