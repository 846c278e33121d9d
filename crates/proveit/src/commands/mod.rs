//! CLI command implementations.

pub mod fast;
mod render;
pub mod serve;
pub mod validate;

/// Server the client commands talk to unless `--server` says otherwise.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";
