//! Server-side encoder from model events to the hybrid byte stream.
//!
//! Narrative text passes through verbatim. Control events are written as
//! complete `data: {...}` lines, and the relay inserts a line break first
//! whenever the narrative left the output mid-line.
//!
//! The model may ask for phase, score and kill-signal updates by writing a
//! control line of its own at the start of a line. Those lines are held back
//! until complete, validated, and re-emitted by the relay; malformed lines and
//! lines claiming a reserved event type are dropped. Nothing the model writes
//! can therefore reach the client as an unvalidated control line.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use tracing::{debug, error, warn};

use proveit_protocol::{EVENT_PREFIX, StreamEvent, parse_event_line};

use crate::llm::{ContentBlockKind, ErrorClass, LLMError, ModelEvent, ModelStream, WEB_SEARCH_TOOL};

/// Wraps one upstream [`ModelStream`] and yields the encoded body.
///
/// The upstream stream is dropped as soon as it finishes or fails, and also
/// when the relay itself is dropped (client disconnect).
pub struct StreamRelay {
    upstream: Option<ModelStream>,
    encoder: Encoder,
    label: &'static str,
}

impl StreamRelay {
    #[must_use]
    pub fn new(upstream: ModelStream, label: &'static str) -> Self {
        Self {
            upstream: Some(upstream),
            encoder: Encoder::new(),
            label,
        }
    }

    /// A relay for a model call that failed before streaming started.
    #[must_use]
    pub fn failed(err: LLMError, label: &'static str) -> Self {
        let mut relay = Self {
            upstream: None,
            encoder: Encoder::new(),
            label,
        };
        relay.encoder.fail(&err, label);
        relay
    }
}

impl Stream for StreamRelay {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(bytes) = this.encoder.pending.pop_front() {
                return Poll::Ready(Some(Ok(bytes)));
            }
            let Some(upstream) = this.upstream.as_mut() else {
                return Poll::Ready(None);
            };

            match upstream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => this.encoder.handle(event),
                Poll::Ready(Some(Err(e))) => {
                    this.upstream = None;
                    this.encoder.fail(&e, this.label);
                }
                Poll::Ready(None) => {
                    this.upstream = None;
                    this.encoder.finish();
                    debug!(endpoint = this.label, "Model stream complete");
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for StreamRelay {
    fn drop(&mut self) {
        if self.upstream.is_some() {
            debug!(
                endpoint = self.label,
                "Client went away mid-stream, releasing model stream"
            );
        }
    }
}

// ============================================================================
// Encoder
// ============================================================================

struct ToolCapture {
    index: usize,
    input: String,
}

#[derive(Deserialize)]
struct SearchInput {
    query: String,
}

/// Encoding state, kept separate from polling so the rules read top-down.
struct Encoder {
    pending: VecDeque<Bytes>,
    /// Whether the last byte written was a line break (or nothing was written).
    at_line_start: bool,
    /// Start of a model line that may turn out to be a control line.
    held: String,
    search_active: bool,
    tool: Option<ToolCapture>,
}

impl Encoder {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            at_line_start: true,
            held: String::new(),
            search_active: false,
            tool: None,
        }
    }

    fn handle(&mut self, event: ModelEvent) {
        match event {
            ModelEvent::BlockStart {
                index,
                block: ContentBlockKind::ToolUse { name },
            } if name == WEB_SEARCH_TOOL => {
                self.tool = Some(ToolCapture {
                    index,
                    input: String::new(),
                });
                self.search_active = true;
                self.control(StreamEvent::Searching { active: true });
            }
            ModelEvent::BlockStart {
                block: ContentBlockKind::Text,
                ..
            } => {
                if self.search_active {
                    self.search_active = false;
                    self.control(StreamEvent::Searching { active: false });
                }
            }
            ModelEvent::BlockStart { .. } => {}
            ModelEvent::TextDelta { text, .. } => self.model_text(&text),
            ModelEvent::InputJsonDelta {
                index,
                partial_json,
            } => {
                if let Some(tool) = self.tool.as_mut()
                    && tool.index == index
                {
                    tool.input.push_str(&partial_json);
                }
            }
            ModelEvent::BlockStop { index } => {
                if self.tool.as_ref().is_some_and(|t| t.index == index)
                    && let Some(tool) = self.tool.take()
                {
                    match serde_json::from_str::<SearchInput>(&tool.input) {
                        Ok(SearchInput { query }) if !query.trim().is_empty() => {
                            self.control(StreamEvent::SearchQuery { query });
                        }
                        Ok(_) => {}
                        Err(e) => debug!(error = %e, "Discarding unparseable search input"),
                    }
                }
            }
        }
    }

    fn finish(&mut self) {
        if self.search_active {
            self.search_active = false;
            self.control(StreamEvent::Searching { active: false });
        }
        self.control(StreamEvent::Done);
    }

    fn fail(&mut self, err: &LLMError, label: &'static str) {
        let class = err.class();
        match class {
            ErrorClass::Unknown => error!(endpoint = label, error = %err, "Model stream failed"),
            _ => warn!(endpoint = label, error = %err, class = ?class, "Model stream failed"),
        }
        self.flush_held();
        self.control(StreamEvent::Error {
            message: class.user_message().to_string(),
        });
    }

    /// Feed model narrative, intercepting lines that start with the prefix.
    fn model_text(&mut self, mut text: &str) {
        while !text.is_empty() {
            let split = text.find('\n').map_or(text.len(), |i| i + 1);
            let (piece, rest) = text.split_at(split);
            text = rest;

            if self.held.is_empty() && !self.at_line_start {
                self.write_text(piece);
                continue;
            }

            self.held.push_str(piece);
            if self.held.ends_with('\n') {
                self.release_held();
            } else if !could_be_control_line(&self.held) {
                let narrative = std::mem::take(&mut self.held);
                self.write_text(&narrative);
            }
        }
    }

    fn release_held(&mut self) {
        let line = std::mem::take(&mut self.held);
        let content = line.trim_end_matches(['\n', '\r']);
        match parse_event_line(content) {
            None => self.write_text(&line),
            Some(Ok(event)) if event.is_model_directive() => self.write_event(&event),
            Some(Ok(event)) => debug!(?event, "Dropping reserved control line from model output"),
            Some(Err(e)) => debug!(error = %e, "Dropping malformed control line from model output"),
        }
    }

    fn flush_held(&mut self) {
        if !self.held.is_empty() {
            self.release_held();
        }
    }

    /// Emit a relay-originated event.
    fn control(&mut self, event: StreamEvent) {
        self.flush_held();
        self.write_event(&event);
    }

    fn write_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.at_line_start = text.ends_with('\n');
        self.pending.push_back(Bytes::from(text.to_owned()));
    }

    fn write_event(&mut self, event: &StreamEvent) {
        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, ?event, "Failed to encode control event");
                return;
            }
        };
        if !self.at_line_start {
            self.pending.push_back(Bytes::from_static(b"\n"));
        }
        self.pending.push_back(Bytes::from(line));
        self.at_line_start = true;
    }
}

fn could_be_control_line(partial: &str) -> bool {
    partial.starts_with(EVENT_PREFIX) || EVENT_PREFIX.starts_with(partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use proveit_protocol::Phase;

    fn upstream(events: Vec<Result<ModelEvent, LLMError>>) -> ModelStream {
        Box::pin(futures::stream::iter(events))
    }

    async fn body(events: Vec<Result<ModelEvent, LLMError>>) -> String {
        let chunks: Vec<Bytes> = StreamRelay::new(upstream(events), "test")
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        chunks
            .iter()
            .map(|b| std::str::from_utf8(b).unwrap())
            .collect()
    }

    fn text_start(index: usize) -> Result<ModelEvent, LLMError> {
        Ok(ModelEvent::BlockStart {
            index,
            block: ContentBlockKind::Text,
        })
    }

    fn text(index: usize, text: &str) -> Result<ModelEvent, LLMError> {
        Ok(ModelEvent::TextDelta {
            index,
            text: text.to_string(),
        })
    }

    fn tool_start(index: usize, name: &str) -> Result<ModelEvent, LLMError> {
        Ok(ModelEvent::BlockStart {
            index,
            block: ContentBlockKind::ToolUse {
                name: name.to_string(),
            },
        })
    }

    fn args(index: usize, json: &str) -> Result<ModelEvent, LLMError> {
        Ok(ModelEvent::InputJsonDelta {
            index,
            partial_json: json.to_string(),
        })
    }

    fn stop(index: usize) -> Result<ModelEvent, LLMError> {
        Ok(ModelEvent::BlockStop { index })
    }

    #[tokio::test]
    async fn plain_text_then_done() {
        let out = body(vec![text_start(0), text(0, "Hello\nworld"), stop(0)]).await;
        assert_eq!(out, "Hello\nworld\ndata: {\"type\":\"done\"}\n");
    }

    #[tokio::test]
    async fn no_extra_break_when_text_ends_a_line() {
        let out = body(vec![text_start(0), text(0, "Hello\n")]).await;
        assert_eq!(out, "Hello\ndata: {\"type\":\"done\"}\n");
    }

    #[tokio::test]
    async fn search_lifecycle() {
        let out = body(vec![
            tool_start(0, "web_search"),
            args(0, "{\"que"),
            args(0, "ry\":\"x\"}"),
            stop(0),
            text_start(1),
            text(1, "done"),
        ])
        .await;

        assert_eq!(
            out,
            concat!(
                "data: {\"type\":\"searching\",\"active\":true}\n",
                "data: {\"type\":\"search_query\",\"query\":\"x\"}\n",
                "data: {\"type\":\"searching\",\"active\":false}\n",
                "done\n",
                "data: {\"type\":\"done\"}\n",
            )
        );
    }

    #[tokio::test]
    async fn malformed_search_input_is_discarded() {
        let out = body(vec![
            tool_start(0, "web_search"),
            args(0, "{\"query\":"),
            stop(0),
        ])
        .await;

        assert!(!out.contains("search_query"));
        assert!(!out.contains("{\\\"query"));
        assert!(out.ends_with("data: {\"type\":\"searching\",\"active\":false}\ndata: {\"type\":\"done\"}\n"));
    }

    #[tokio::test]
    async fn other_tools_never_leak_arguments() {
        let out = body(vec![
            tool_start(0, "calculator"),
            args(0, "{\"expr\":\"1+1\"}"),
            stop(0),
        ])
        .await;

        assert_eq!(out, "data: {\"type\":\"done\"}\n");
    }

    #[tokio::test]
    async fn model_directive_is_reencoded() {
        let out = body(vec![
            text_start(0),
            text(0, "Got it.\n\nda"),
            text(0, "ta: {\"type\":\"phase_change\",  \"phase\":\"discovery\"}\nNext?"),
        ])
        .await;

        assert_eq!(
            out,
            concat!(
                "Got it.\n\n",
                "data: {\"type\":\"phase_change\",\"phase\":\"discovery\"}\n",
                "Next?\n",
                "data: {\"type\":\"done\"}\n",
            )
        );
    }

    #[tokio::test]
    async fn model_cannot_forge_reserved_events() {
        let out = body(vec![
            text_start(0),
            text(0, "data: {\"type\":\"done\"}\ndata: {broken\nok\n"),
        ])
        .await;

        assert_eq!(out, "ok\ndata: {\"type\":\"done\"}\n");
    }

    #[tokio::test]
    async fn prefix_mid_line_is_narrative() {
        let out = body(vec![text_start(0), text(0, "say data: {} here\n")]).await;
        assert_eq!(out, "say data: {} here\ndata: {\"type\":\"done\"}\n");
    }

    #[tokio::test]
    async fn directive_without_trailing_newline_at_end() {
        let out = body(vec![
            text_start(0),
            text(0, "Summary.\ndata: {\"type\":\"phase_change\",\"phase\":\"findings\"}"),
        ])
        .await;

        let expected_phase = StreamEvent::PhaseChange {
            phase: Phase::Findings,
        }
        .to_line()
        .unwrap();
        assert_eq!(
            out,
            format!("Summary.\n{expected_phase}data: {{\"type\":\"done\"}}\n")
        );
    }

    #[tokio::test]
    async fn upstream_error_emits_single_classified_error() {
        let out = body(vec![
            text_start(0),
            text(0, "partial"),
            Err(LLMError::Api {
                status: 429,
                message: "slow down".into(),
            }),
            text(0, "never seen"),
        ])
        .await;

        assert_eq!(
            out,
            "partial\ndata: {\"type\":\"error\",\"message\":\"Rate limit reached. Please wait a moment and try again.\"}\n"
        );
    }

    #[tokio::test]
    async fn error_on_first_poll() {
        let out = body(vec![Err(LLMError::Stream {
            error_type: "weird_error".into(),
            message: "internal details".into(),
        })])
        .await;

        assert_eq!(
            out,
            "data: {\"type\":\"error\",\"message\":\"Something went wrong. Please try again.\"}\n"
        );
        assert!(!out.contains("internal details"));
    }

    #[tokio::test]
    async fn failed_constructor_emits_error_only() {
        let chunks: Vec<Bytes> = StreamRelay::failed(LLMError::MissingApiKey, "test")
            .map(|c| c.unwrap())
            .collect()
            .await;
        let out: String = chunks
            .iter()
            .map(|b| std::str::from_utf8(b).unwrap())
            .collect();

        assert_eq!(
            out,
            "data: {\"type\":\"error\",\"message\":\"Service configuration error. Contact support.\"}\n"
        );
    }

    #[tokio::test]
    async fn dropping_relay_drops_upstream() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        struct Flag(Arc<AtomicBool>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let flag = Flag(dropped.clone());
        let pending = futures::stream::iter(vec![text_start(0), text(0, "hi")])
            .chain(futures::stream::pending())
            .map(move |event| {
                let _ = &flag;
                event
            });
        let mut relay = StreamRelay::new(Box::pin(pending), "test");

        assert_eq!(relay.next().await.unwrap().unwrap(), Bytes::from("hi"));
        assert!(!dropped.load(Ordering::SeqCst));
        drop(relay);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
