//! Client-side session state machine.
//!
//! A [`Session`] advances through phases, collects scores and kill signals
//! from the control events of each [`Turn`], and is persisted locally by
//! [`SessionStore`] as a versioned record.

mod machine;
mod model;
mod storage;
mod turn;

pub use model::{IDEA_SUMMARY_CHARS, KillSignal, Message, Session};
pub use storage::{
    FileStorage, MemoryStorage, STORAGE_KEY, SessionStore, StorageBackend, StorageError,
    StorageResult,
};
pub use turn::{
    DEFAULT_SEARCH_TIMEOUT, SEARCH_TIMEOUT_MESSAGE, Turn, TurnOptions, TurnOutcome, run_turn,
};

/// Version tag of the persisted record. Records with any other version are
/// discarded on load.
pub const SCHEMA_VERSION: u32 = 1;
