//! Server-Sent Events parser for upstream model responses.
//!
//! Only the fields vendors actually use are kept: `event:` and `data:`.
//! Multi-line `data:` payloads are joined with `\n`; a blank line ends an
//! event. Comments, `id:` and `retry:` are ignored.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

/// One assembled SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

enum Field<'a> {
    Event(&'a str),
    Data(&'a str),
    Blank,
    Ignored,
}

fn parse_field(line: &str) -> Field<'_> {
    if line.is_empty() {
        return Field::Blank;
    }
    let (name, value) = line.split_once(':').unwrap_or((line, ""));
    let value = value.strip_prefix(' ').unwrap_or(value);
    match name {
        "event" => Field::Event(value),
        "data" => Field::Data(value),
        _ => Field::Ignored,
    }
}

/// Stream adapter from raw response bytes to [`SseEvent`]s.
pub struct SseEventStream<S> {
    inner: S,
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    done: bool,
}

impl<S> SseEventStream<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            done: false,
        }
    }

    /// Feed one line; returns an event when the line completes one.
    fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        match parse_field(line) {
            Field::Event(name) => self.event = Some(name.to_string()),
            Field::Data(data) => self.data.push(data.to_string()),
            Field::Blank => return self.take_event(),
            Field::Ignored => {}
        }
        None
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: self.event.take(),
            data,
        })
    }
}

impl<S, E> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
                let line = String::from_utf8_lossy(&raw[..line_end]);
                let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
                if let Some(event) = self.push_line(&line) {
                    return Poll::Ready(Some(Ok(event)));
                }
                continue;
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    self.done = true;
                    let rest = std::mem::take(&mut self.buffer);
                    if !rest.is_empty() {
                        let line = String::from_utf8_lossy(&rest).into_owned();
                        self.push_line(line.strip_suffix('\r').unwrap_or(&line));
                    }
                    return Poll::Ready(self.take_event().map(Ok));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
