//! Shared request/response types for the HTTP API.
//!
//! Used by both the server handlers and the client so the two sides agree on
//! field names and validation bounds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use proveit_protocol::{ConfidenceScores, Phase};

pub const FAST_PATH: &str = "/api/fast";
pub const CHAT_PATH: &str = "/api/chat";

pub const IDEA_MIN_CHARS: usize = 10;
pub const IDEA_MAX_CHARS: usize = 2000;
pub const SESSION_ID_MAX_CHARS: usize = 100;
pub const MAX_MESSAGES: usize = 50;
pub const MESSAGE_MAX_CHARS: usize = 10_000;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A request failed schema validation. The message is safe to show users.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub &'static str);

// ============================================================================
// Fast check
// ============================================================================

/// `POST /api/fast` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastCheckRequest {
    pub idea: String,
}

impl FastCheckRequest {
    /// Validate and return the trimmed idea.
    pub fn validated_idea(&self) -> Result<&str, ValidationError> {
        let idea = self.idea.trim();
        let len = idea.chars().count();
        if len < IDEA_MIN_CHARS {
            return Err(ValidationError("Tell us a bit more about the idea"));
        }
        if len > IDEA_MAX_CHARS {
            return Err(ValidationError(
                "Please keep your idea under 2000 characters",
            ));
        }
        Ok(idea)
    }
}

// ============================================================================
// Chat
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// `POST /api/chat` body: one conversational turn with the client's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub phase: Phase,
    pub scores: ConfidenceScores,
}

impl ChatRequest {
    /// Bounds serde cannot express: lengths and the session id alphabet.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_valid_session_id(&self.session_id) {
            return Err(ValidationError("Invalid session ID"));
        }
        if self.messages.is_empty() || self.messages.len() > MAX_MESSAGES {
            return Err(ValidationError(
                "Conversation must include between 1 and 50 messages",
            ));
        }
        let bad_content = self.messages.iter().any(|m| {
            let len = m.content.chars().count();
            len == 0 || len > MESSAGE_MAX_CHARS
        });
        if bad_content {
            return Err(ValidationError(
                "Messages must be between 1 and 10000 characters",
            ));
        }
        Ok(())
    }
}

/// 1 to 100 characters from `[A-Za-z0-9_-]`.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= SESSION_ID_MAX_CHARS
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

// ============================================================================
// Errors
// ============================================================================

/// JSON body of every 400 / 429 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(idea: &str) -> FastCheckRequest {
        FastCheckRequest {
            idea: idea.to_string(),
        }
    }

    fn chat(session_id: &str, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            session_id: session_id.to_string(),
            messages,
            phase: Phase::Discovery,
            scores: ConfidenceScores::default(),
        }
    }

    fn user(content: &str) -> ChatMessage {
        ChatMessage {
            role: Role::User,
            content: content.to_string(),
        }
    }

    #[test]
    fn idea_length_boundaries() {
        assert!(fast(&"a".repeat(9)).validated_idea().is_err());
        assert!(fast(&"a".repeat(10)).validated_idea().is_ok());
        assert!(fast(&"a".repeat(2000)).validated_idea().is_ok());
        assert_eq!(
            fast(&"a".repeat(2001)).validated_idea(),
            Err(ValidationError(
                "Please keep your idea under 2000 characters"
            ))
        );
    }

    #[test]
    fn idea_is_trimmed_before_counting() {
        let request = fast("   short   ");
        assert_eq!(
            request.validated_idea(),
            Err(ValidationError("Tell us a bit more about the idea"))
        );
        assert_eq!(
            fast("  a dog walking app  ").validated_idea(),
            Ok("a dog walking app")
        );
    }

    #[test]
    fn idea_counts_characters_not_bytes() {
        assert!(fast(&"é".repeat(10)).validated_idea().is_ok());
        assert!(fast(&"é".repeat(2000)).validated_idea().is_ok());
    }

    #[test]
    fn session_id_alphabet() {
        assert!(is_valid_session_id("01J9Z3K_abc-def"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("has space"));
        assert!(!is_valid_session_id("../etc/passwd"));
        assert!(is_valid_session_id(&"a".repeat(100)));
        assert!(!is_valid_session_id(&"a".repeat(101)));
    }

    #[test]
    fn chat_message_count_bounds() {
        assert!(chat("s1", vec![]).validate().is_err());
        assert!(chat("s1", vec![user("hi")]).validate().is_ok());
        assert!(chat("s1", vec![user("hi"); 50]).validate().is_ok());
        assert!(chat("s1", vec![user("hi"); 51]).validate().is_err());
    }

    #[test]
    fn chat_message_content_bounds() {
        assert!(chat("s1", vec![user("")]).validate().is_err());
        assert!(chat("s1", vec![user(&"x".repeat(10_000))]).validate().is_ok());
        assert!(chat("s1", vec![user(&"x".repeat(10_001))]).validate().is_err());
    }

    #[test]
    fn chat_request_uses_camel_case() {
        let json = serde_json::json!({
            "sessionId": "abc",
            "messages": [{"role": "user", "content": "hello"}],
            "phase": "brain_dump",
            "scores": {"desirability": null, "viability": 4, "feasibility": null}
        });
        let request: ChatRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.session_id, "abc");
        assert_eq!(request.phase, Phase::BrainDump);
        assert_eq!(request.scores.viability.map(|s| s.get()), Some(4));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn chat_request_rejects_unknown_role() {
        let json = serde_json::json!({
            "sessionId": "abc",
            "messages": [{"role": "system", "content": "hello"}],
            "phase": "brain_dump",
            "scores": {"desirability": null, "viability": null, "feasibility": null}
        });
        assert!(serde_json::from_value::<ChatRequest>(json).is_err());
    }
}
