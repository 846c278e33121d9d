use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use proveit_protocol::{ConfidenceScores, KillSignalKind, Phase};

use crate::api::Role;

/// Characters of the opening idea kept as the session's label.
pub const IDEA_SUMMARY_CHARS: usize = 100;

/// Current time truncated to the millisecond precision records are stored at.
pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Set while the assistant reply is still arriving. Never persisted.
    #[serde(skip)]
    pub is_streaming: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            role,
            content: content.into(),
            timestamp: now_millis(),
            is_streaming: false,
        }
    }
}

/// A kill signal as recorded on the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillSignal {
    #[serde(rename = "type")]
    pub kind: KillSignalKind,
    pub evidence: String,
    /// Number of messages in the conversation when the signal arrived,
    /// counting the user message that triggered it.
    pub detected_at: usize,
}

/// One validation conversation and everything learned so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub idea_summary: String,
    pub phase: Phase,
    pub messages: Vec<Message>,
    pub scores: ConfidenceScores,
    pub kill_signals: Vec<KillSignal>,
    pub research_complete: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Fresh session in `brain_dump` for the given idea.
    pub fn new(idea: &str) -> Self {
        let now = now_millis();
        Self {
            id: Ulid::new().to_string(),
            idea_summary: idea.chars().take(IDEA_SUMMARY_CHARS).collect(),
            phase: Phase::default(),
            messages: Vec::new(),
            scores: ConfidenceScores::default(),
            kill_signals: Vec::new(),
            research_complete: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }
}
