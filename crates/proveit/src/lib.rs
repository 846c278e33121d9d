//! ProveIt: streaming product-validation backend, client and session engine.

pub mod api;
pub mod build_info;
pub mod client;
pub mod config;
pub mod handlers;
pub mod llm;
pub mod rate_limit;
pub mod relay;
pub mod server;
pub mod session;
pub mod sse_parser;

pub use proveit_protocol as protocol;
