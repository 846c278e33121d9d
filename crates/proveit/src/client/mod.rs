//! HTTP client library for a proveit server.
//!
//! Provides `ProveItClient`, used by the CLI to run fast checks and
//! validation turns against a local or remote server.

mod error;
mod stream;

pub use error::{ClientError, Result};
pub use stream::{ChunkStream, into_chunk_stream};

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::api::{CHAT_PATH, ChatRequest, ErrorResponse, FAST_PATH, FastCheckRequest};

/// Response from the /readyz health check endpoint.
#[derive(Debug, Deserialize)]
pub struct ReadyzResponse {
    pub status: String,
}

/// HTTP client for a proveit server.
#[derive(Debug, Clone)]
pub struct ProveItClient {
    base_url: String,
    http: Client,
}

impl ProveItClient {
    /// Create a new client pointing to the given base URL.
    ///
    /// Example: `ProveItClient::new("http://localhost:3000")`
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the server is healthy.
    pub async fn health(&self) -> Result<ReadyzResponse> {
        let url = format!("{}/readyz", self.base_url);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(ClientError::ServerUnhealthy {
                status: response.status().as_u16(),
            });
        }

        Ok(response.json().await?)
    }

    /// Run a fast check and stream the response.
    pub async fn fast_check(&self, idea: &str) -> Result<ChunkStream> {
        let body = FastCheckRequest {
            idea: idea.to_string(),
        };
        self.post_stream(FAST_PATH, &body).await
    }

    /// Send one validation turn and stream the response.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChunkStream> {
        self.post_stream(CHAT_PATH, request).await
    }

    // ----------------------------------------------------------------------------
    // Helpers
    // ----------------------------------------------------------------------------

    async fn post_stream<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ChunkStream> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;

        if response.status().is_success() {
            Ok(into_chunk_stream(response))
        } else {
            Err(parse_error(response).await)
        }
    }
}

/// Parse an error response into a ClientError.
async fn parse_error(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let retry_after_secs = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());

    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => format!("HTTP {}", status.as_u16()),
    };

    if status == StatusCode::TOO_MANY_REQUESTS {
        ClientError::RateLimited {
            message,
            retry_after_secs,
        }
    } else {
        ClientError::ApiError {
            status: status.as_u16(),
            message,
        }
    }
}
