//! Wire contract shared by the ProveIt server and its clients.
//!
//! A response body is a single UTF-8 byte stream. Any line that starts with
//! [`EVENT_PREFIX`] carries exactly one JSON-encoded [`StreamEvent`]; every
//! other byte is narrative text written by the model.
//!
//! The server side encodes with [`StreamEvent::to_line`]; clients decode with
//! [`StreamReader`], which accepts the body in arbitrary chunk boundaries.

mod event;
mod reader;
mod types;

pub use event::{EVENT_PREFIX, StreamEvent, parse_event_line};
pub use reader::{StreamChunk, StreamReader};
pub use types::{
    ConfidenceScores, KillSignalKind, KillSignalReport, ParsePhaseError, Phase, Score, ScoreError,
};
