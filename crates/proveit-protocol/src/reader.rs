//! Client-side decoder for the hybrid stream.
//!
//! The body may arrive in any chunking: a control line can be split
//! mid-JSON across several reads, or many lines can share one read. The
//! reader keeps one byte buffer, cuts complete lines on `\n`, and only
//! decodes UTF-8 per line, so multi-byte characters split across chunks
//! survive intact.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tracing::debug;

use crate::event::{StreamEvent, parse_event_line};

/// A decoded piece of the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Narrative text, line terminator included when the line was complete.
    Text(String),
    /// A control event.
    Event(StreamEvent),
}

/// Stream adapter that turns raw body bytes into [`StreamChunk`]s.
///
/// One reader per response body; it is not reusable once exhausted.
pub struct StreamReader<S> {
    inner: S,
    buffer: Vec<u8>,
    done: bool,
}

impl<S> StreamReader<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            done: false,
        }
    }
}

fn decode_line(line: &str) -> Option<StreamChunk> {
    if line.is_empty() {
        return None;
    }

    match parse_event_line(line) {
        Some(Ok(event)) => Some(StreamChunk::Event(event)),
        Some(Err(e)) => {
            debug!(error = %e, line = %line, "Dropping malformed control line");
            None
        }
        None => Some(StreamChunk::Text(format!("{line}\n"))),
    }
}

impl<S, E> Stream for StreamReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<StreamChunk, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
                let line = String::from_utf8_lossy(&line[..line_end]);
                if let Some(chunk) = decode_line(&line) {
                    return Poll::Ready(Some(Ok(chunk)));
                }
                continue;
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    self.done = true;
                    if self.buffer.is_empty() {
                        return Poll::Ready(None);
                    }
                    let rest = std::mem::take(&mut self.buffer);
                    let text = String::from_utf8_lossy(&rest).into_owned();
                    return Poll::Ready(Some(Ok(StreamChunk::Text(text))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
