use serde::Serialize;

use crate::session::SCHEMA_VERSION;

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = match option_env!("PROVEIT_BUILD_COMMIT") {
    Some(c) => c,
    None => "unknown",
};

/// Body of `GET /version`.
#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub commit: &'static str,
    /// Version tag written into persisted session records.
    pub session_schema: u32,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            name: NAME,
            version: VERSION,
            commit: COMMIT,
            session_schema: SCHEMA_VERSION,
        }
    }
}

pub fn version_string() -> String {
    format!("{NAME} {VERSION} ({COMMIT})")
}
