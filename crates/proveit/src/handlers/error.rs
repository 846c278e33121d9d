use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use thiserror::Error;

use crate::api::{ErrorResponse, ValidationError};
use crate::rate_limit::RateLimitDecision;

pub const RATE_LIMIT_MESSAGE: &str = "Too many requests. Please wait a moment and try again.";
pub const INVALID_BODY_MESSAGE: &str = "Invalid request body";

/// Why a request was turned away before any model call.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("rate limit exceeded")]
    RateLimited(RateLimitDecision),
    #[error("invalid request body")]
    InvalidBody,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

fn error_body(message: impl Into<String>) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        error: message.into(),
    })
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        match self {
            RequestError::RateLimited(decision) => {
                let retry_after = decision.retry_after_secs(Utc::now());
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, error_body(RATE_LIMIT_MESSAGE)).into_response();
                let headers = response.headers_mut();
                headers.insert("retry-after", HeaderValue::from(retry_after));
                headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
                headers.insert(
                    "x-ratelimit-reset",
                    HeaderValue::from(decision.reset_at.timestamp()),
                );
                response
            }
            RequestError::InvalidBody => {
                (StatusCode::BAD_REQUEST, error_body(INVALID_BODY_MESSAGE)).into_response()
            }
            RequestError::Invalid(ValidationError(message)) => {
                (StatusCode::BAD_REQUEST, error_body(message)).into_response()
            }
        }
    }
}
