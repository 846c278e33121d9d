//! The session reducer: how control events change a [`Session`].

use tracing::debug;

use proveit_protocol::StreamEvent;

use super::model::{KillSignal, Session};

impl Session {
    /// Fold one control event into the session.
    ///
    /// `message_count` is the conversation length including the user
    /// message of the current turn. Returns whether anything changed.
    /// Stream bookkeeping events (`searching`, `search_query`, `done`,
    /// `error`) never touch the session.
    pub fn apply(&mut self, event: &StreamEvent, message_count: usize) -> bool {
        match event {
            StreamEvent::PhaseChange { phase } => {
                if !self.phase.can_advance_to(*phase) {
                    debug!(
                        session_id = %self.id,
                        from = %self.phase,
                        to = %phase,
                        "Ignoring phase change that does not move forward"
                    );
                    return false;
                }
                debug!(session_id = %self.id, from = %self.phase, to = %phase, "Phase advanced");
                self.phase = *phase;
                true
            }
            StreamEvent::Scores { scores } => {
                self.scores = *scores;
                true
            }
            StreamEvent::KillSignal { signal } => {
                self.kill_signals.push(KillSignal {
                    kind: signal.kind,
                    evidence: signal.evidence.clone(),
                    detected_at: message_count,
                });
                true
            }
            StreamEvent::Searching { .. }
            | StreamEvent::SearchQuery { .. }
            | StreamEvent::Done
            | StreamEvent::Error { .. } => false,
        }
    }
}
