//! Client-local persistence of the active session.
//!
//! Exactly one record is stored, under [`STORAGE_KEY`], shaped
//! `{"version": 1, "session": {...}}`. A record with any other version is a
//! schema mismatch: it is removed and the caller starts fresh. Storage
//! failures never interrupt the conversation; they are logged and the
//! session carries on in memory.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use super::SCHEMA_VERSION;
use super::model::{Session, now_millis};

/// Key the session record is stored under.
pub const STORAGE_KEY: &str = "proveit_session";

/// Errors from a [`StorageBackend`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during file operations.
    #[error("I/O error at {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The value does not fit in the remaining space.
    #[error("storage quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// String key-value store the session record lives in.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    async fn remove(&self, key: &str) -> StorageResult<()>;
}

fn check_quota(quota: Option<usize>, value: &str) -> StorageResult<()> {
    match quota {
        Some(quota) if value.len() > quota => Err(StorageError::QuotaExceeded {
            needed: value.len(),
            quota,
        }),
        _ => Ok(()),
    }
}

// ============================================================================
// File backend
// ============================================================================

/// One `<key>.json` file per key inside a directory.
///
/// Writes go to a temp file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    quota_bytes: Option<usize>,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            quota_bytes: None,
        }
    }

    /// Refuse values larger than `bytes`, like a full browser store.
    #[must_use]
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::file_io(path, e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        check_quota(self.quota_bytes, value)?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::file_io(&self.dir, e))?;

        let final_path = self.path_for(key);
        let temp_path = self.dir.join(format!("{key}.json.tmp"));
        fs::write(&temp_path, value)
            .await
            .map_err(|e| StorageError::file_io(&temp_path, e))?;
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| StorageError::file_io(&final_path, e))
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::file_io(path, e)),
        }
    }
}

// ============================================================================
// Memory backend
// ============================================================================

/// In-process store; clones share entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<DashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        check_quota(self.quota_bytes, value)?;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// Session store
// ============================================================================

#[derive(Serialize)]
struct StoredSession<'a> {
    version: u32,
    session: &'a Session,
}

/// Versioned load/save of the single active session.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// The stored session, if there is a readable record of this schema.
    pub async fn load(&self) -> Option<Session> {
        let raw = match self.backend.get(STORAGE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                return None;
            }
        };

        match decode_record(&raw) {
            Ok(session) => Some(session),
            Err(reason) => {
                debug!(reason, "Discarding stored session");
                self.clear().await;
                None
            }
        }
    }

    /// Persist `session`, stamping `updated_at` on the written copy.
    ///
    /// Returns whether the write succeeded.
    pub async fn save(&self, session: &Session) -> bool {
        let mut copy = session.clone();
        copy.updated_at = now_millis();
        for message in &mut copy.messages {
            message.is_streaming = false;
        }

        let record = StoredSession {
            version: SCHEMA_VERSION,
            session: &copy,
        };
        let result = match serde_json::to_string(&record) {
            Ok(json) => self.backend.set(STORAGE_KEY, &json).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Failed to persist session, continuing in memory");
                false
            }
        }
    }

    pub async fn clear(&self) {
        if let Err(e) = self.backend.remove(STORAGE_KEY).await {
            warn!(error = %e, "Failed to clear stored session");
        }
    }
}

fn decode_record(raw: &str) -> Result<Session, &'static str> {
    let mut record: Value = serde_json::from_str(raw).map_err(|_| "malformed record")?;
    let version = record.get("version").and_then(Value::as_u64);
    if version != Some(u64::from(SCHEMA_VERSION)) {
        return Err("schema version mismatch");
    }
    let session = record
        .get_mut("session")
        .map(Value::take)
        .ok_or("record has no session")?;
    serde_json::from_value(session).map_err(|_| "malformed session")
}
