use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

#[derive(Serialize)]
pub struct ReadyzResponse {
    pub status: &'static str,
}

pub async fn readyz() -> Json<ReadyzResponse> {
    Json(ReadyzResponse { status: "ok" })
}
