//! One conversational turn: user message out, streamed reply in.

use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use proveit_protocol::{StreamChunk, StreamEvent};

use super::model::{Message, Session};
use crate::api::{ChatMessage, ChatRequest, MESSAGE_MAX_CHARS, Role};
use crate::client::ProveItClient;

/// Shown when a web search outlasts the search timeout.
pub const SEARCH_TIMEOUT_MESSAGE: &str = "Search is taking too long. Please try again.";

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// The assistant message committed to the session, if any.
    pub reply: Option<String>,
    /// User-facing error reported during the turn.
    pub error: Option<String>,
    /// Queries the model searched for.
    pub searches: Vec<String>,
    pub interrupted: bool,
}

/// In-progress turn over a session.
///
/// The reply accumulates in a provisional assistant message at the end of
/// the conversation, flagged `is_streaming`. Control events are applied to
/// the session as soon as they arrive.
pub struct Turn<'a> {
    session: &'a mut Session,
    message_count: usize,
    searching: bool,
    searches: Vec<String>,
    error: Option<String>,
}

impl<'a> Turn<'a> {
    /// Append the user's message and open the provisional reply.
    ///
    /// Text beyond [`MESSAGE_MAX_CHARS`] characters is cut.
    pub fn begin(session: &'a mut Session, text: &str) -> Self {
        session
            .messages
            .push(Message::new(Role::User, clamp_chars(text, MESSAGE_MAX_CHARS)));
        let message_count = session.messages.len();

        let mut provisional = Message::new(Role::Assistant, String::new());
        provisional.is_streaming = true;
        session.messages.push(provisional);

        Self {
            session,
            message_count,
            searching: false,
            searches: Vec::new(),
            error: None,
        }
    }

    /// Request for this turn: the latest `history_limit` committed messages
    /// plus the session's phase and scores.
    pub fn request(&self, history_limit: usize) -> ChatRequest {
        let committed = &self.session.messages[..self.message_count];
        let start = committed.len().saturating_sub(history_limit);
        ChatRequest {
            session_id: self.session.id.clone(),
            messages: committed[start..]
                .iter()
                .map(|m| ChatMessage {
                    role: m.role,
                    content: clamp_chars(&m.content, MESSAGE_MAX_CHARS).to_string(),
                })
                .collect(),
            phase: self.session.phase,
            scores: self.session.scores,
        }
    }

    pub fn session(&self) -> &Session {
        &*self.session
    }

    /// Text received so far.
    pub fn partial_reply(&self) -> &str {
        self.provisional().map_or("", |m| m.content.as_str())
    }

    pub fn is_searching(&self) -> bool {
        self.searching
    }

    pub fn on_chunk(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::Text(text) => {
                if let Some(message) = self.provisional_mut() {
                    message.content.push_str(&text);
                }
            }
            StreamChunk::Event(event) => self.on_event(event),
        }
    }

    fn on_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Searching { active } => self.searching = active,
            StreamEvent::SearchQuery { query } => self.searches.push(query),
            StreamEvent::Done => self.searching = false,
            StreamEvent::Error { message } => self.fail(message),
            directive => {
                self.session.apply(&directive, self.message_count);
            }
        }
    }

    /// Record an error shown to the user. The partial reply is still kept.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Commit the reply and close the turn.
    pub fn finish(self) -> TurnOutcome {
        self.close(false)
    }

    /// Stop early, keeping whatever arrived.
    pub fn interrupt(self) -> TurnOutcome {
        self.close(true)
    }

    fn close(self, interrupted: bool) -> TurnOutcome {
        let Turn {
            session,
            message_count,
            searches,
            error,
            ..
        } = self;

        let provisional = session.messages.drain(message_count..).next();
        let reply = provisional
            .filter(|m| !m.content.trim().is_empty())
            .map(|mut message| {
                let len = clamp_chars(&message.content, MESSAGE_MAX_CHARS).len();
                message.content.truncate(len);
                let content = message.content.clone();
                message.is_streaming = false;
                session.messages.push(message);
                content
            });

        if reply.is_some() {
            session.research_complete = session.phase.research_complete();
        }

        TurnOutcome {
            reply,
            error,
            searches,
            interrupted,
        }
    }

    fn provisional(&self) -> Option<&Message> {
        self.session.messages.get(self.message_count)
    }

    fn provisional_mut(&mut self) -> Option<&mut Message> {
        self.session.messages.get_mut(self.message_count)
    }
}

/// The longest prefix of `text` with at most `max` characters.
fn clamp_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

// ============================================================================
// Turn runner
// ============================================================================

/// How long a web search may run before the turn gives up on it.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Knobs for [`run_turn`].
#[derive(Debug, Clone, Copy)]
pub struct TurnOptions {
    pub history_limit: usize,
    /// Abort the turn when the model has been searching this long.
    pub search_timeout: Option<Duration>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            history_limit: crate::config::SessionConfig::default().history_limit,
            search_timeout: Some(DEFAULT_SEARCH_TIMEOUT),
        }
    }
}

/// Drive one turn against the server.
///
/// `on_chunk` sees every decoded chunk before it is applied, for rendering.
/// Cancelling `cancel` interrupts the turn and keeps the partial reply.
/// Transport and server errors end up in [`TurnOutcome::error`].
pub async fn run_turn<F>(
    client: &ProveItClient,
    session: &mut Session,
    text: &str,
    options: TurnOptions,
    cancel: &CancellationToken,
    mut on_chunk: F,
) -> TurnOutcome
where
    F: FnMut(&StreamChunk),
{
    let mut turn = Turn::begin(session, text);
    let request = turn.request(options.history_limit);

    let started = tokio::select! {
        _ = cancel.cancelled() => return turn.interrupt(),
        result = client.chat(&request) => result,
    };
    let mut stream = match started {
        Ok(stream) => stream,
        Err(e) => {
            warn!(session_id = %request.session_id, error = %e, "Chat request failed");
            turn.fail(e.user_message());
            return turn.finish();
        }
    };

    let mut search_deadline: Option<Instant> = None;
    loop {
        let deadline = search_deadline;
        let search_expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                info!(session_id = %request.session_id, "Turn interrupted");
                return turn.interrupt();
            }
            _ = search_expired => {
                debug!(session_id = %request.session_id, "Search ran too long, abandoning turn");
                turn.fail(SEARCH_TIMEOUT_MESSAGE);
                break;
            }
            item = stream.next() => match item {
                Some(Ok(chunk)) => {
                    on_chunk(&chunk);
                    turn.on_chunk(chunk);
                    search_deadline = match (turn.is_searching(), options.search_timeout) {
                        (true, Some(limit)) => search_deadline.or_else(|| Some(Instant::now() + limit)),
                        _ => None,
                    };
                }
                Some(Err(e)) => {
                    warn!(session_id = %request.session_id, error = %e, "Chat stream failed");
                    turn.fail(e.user_message());
                    break;
                }
                None => break,
            },
        }
    }

    turn.finish()
}
