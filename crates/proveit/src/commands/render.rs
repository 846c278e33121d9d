//! Terminal rendering of stream chunks and session state.

use std::io::{self, Write};

use proveit::protocol::{ConfidenceScores, Score, StreamChunk, StreamEvent};
use proveit::session::Session;

/// Write one chunk the way the terminal shows it.
///
/// Narrative goes out verbatim; control events become bracketed status
/// lines. `done` prints nothing and `error` goes to the caller.
pub fn render_chunk(out: &mut impl Write, chunk: &StreamChunk) -> io::Result<()> {
    match chunk {
        StreamChunk::Text(text) => write!(out, "{text}")?,
        StreamChunk::Event(event) => match event {
            StreamEvent::Searching { active: true } => writeln!(out, "[searching the web...]")?,
            StreamEvent::Searching { active: false } => {}
            StreamEvent::SearchQuery { query } => writeln!(out, "  > {query}")?,
            StreamEvent::PhaseChange { phase } => writeln!(out, "[phase: {phase}]")?,
            StreamEvent::Scores { scores } => writeln!(out, "[scores: {}]", scores_line(scores))?,
            StreamEvent::KillSignal { signal } => {
                writeln!(out, "[kill signal: {}] {}", signal.kind, signal.evidence)?
            }
            StreamEvent::Done | StreamEvent::Error { .. } => {}
        },
    }
    out.flush()
}

fn score(score: Option<Score>) -> String {
    score.map_or_else(|| "-".to_string(), |s| s.to_string())
}

pub fn scores_line(scores: &ConfidenceScores) -> String {
    format!(
        "desirability {} | viability {} | feasibility {}",
        score(scores.desirability),
        score(scores.viability),
        score(scores.feasibility)
    )
}

/// Multi-line summary printed by `/status`.
pub fn status(session: &Session) -> String {
    let mut lines = vec![
        format!("Idea:    {}", session.idea_summary),
        format!("Phase:   {}", session.phase),
        format!("Scores:  {}", scores_line(&session.scores)),
        format!("Turns:   {} messages", session.messages.len()),
    ];
    if session.kill_signals.is_empty() {
        lines.push("Kill signals: none".to_string());
    } else {
        lines.push("Kill signals:".to_string());
        for signal in &session.kill_signals {
            lines.push(format!(
                "  - {} (message {}): {}",
                signal.kind, signal.detected_at, signal.evidence
            ));
        }
    }
    lines.join("\n")
}
