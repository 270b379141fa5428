//! Streaming text fragments and server-sent-event line decoding

use serde::Deserialize;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::error::Result;

/// End-of-stream sentinel carried in the `data:` field
pub const DONE_SENTINEL: &str = "[DONE]";

/// Fragment yielded once when the upstream connection drops mid-reply.
///
/// The stream ends cleanly afterwards, so the caller sees a partial reply
/// rather than an error. This is lossy: the missing tail is not recovered.
pub const INTERRUPTED_NOTICE: &str = "\n\n[Response interrupted: the connection was lost]";

/// A lazy, finite, non-restartable sequence of reply fragments
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// What one `data:` payload of a completion stream means
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamData {
    /// Text to append to the reply
    Fragment(String),
    /// The sentinel; no more data follows
    Done,
    /// Valid chunk without text (role header, finish marker, usage)
    Empty,
    /// Not JSON, or JSON of the wrong shape
    Malformed,
}

/// Decode the payload of one `data:` line
pub fn parse_stream_data(data: &str) -> StreamData {
    let data = data.trim();
    if data == DONE_SENTINEL {
        return StreamData::Done;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(StreamData::Fragment)
            .unwrap_or(StreamData::Empty),
        Err(_) => StreamData::Malformed,
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
