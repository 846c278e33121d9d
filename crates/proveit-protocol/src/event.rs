use serde::{Deserialize, Serialize};

use crate::types::{ConfidenceScores, KillSignalReport, Phase};

/// Literal that starts every control-event line.
pub const EVENT_PREFIX: &str = "data: ";

/// Structured control event carried inside the hybrid stream.
///
/// Serialized as an internally tagged JSON object, e.g.
/// `{"type":"searching","active":true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    PhaseChange { phase: Phase },
    Scores { scores: ConfidenceScores },
    KillSignal { signal: KillSignalReport },
    Searching { active: bool },
    SearchQuery { query: String },
    Done,
    Error { message: String },
}

impl StreamEvent {
    /// Events the model itself may request through its narrative output.
    ///
    /// Everything else (search state, completion, errors) is reserved for the
    /// relay.
    pub fn is_model_directive(&self) -> bool {
        matches!(
            self,
            StreamEvent::PhaseChange { .. }
                | StreamEvent::Scores { .. }
                | StreamEvent::KillSignal { .. }
        )
    }

    /// Whether the event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }

    /// Encode as one complete wire line, terminator included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{EVENT_PREFIX}{json}\n"))
    }
}

/// Decode a single line (without its terminator).
///
/// Returns `None` when the line is not a control line at all, and
/// `Some(Err(_))` when it carries the prefix but not a valid event.
pub fn parse_event_line(line: &str) -> Option<Result<StreamEvent, serde_json::Error>> {
    line.strip_prefix(EVENT_PREFIX).map(|json| serde_json::from_str(json))
}
