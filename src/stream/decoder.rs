//! Decoding of a single `data:` payload into an incremental text delta.
use serde::Deserialize;

use crate::mode::ResponseMode;

/// The result of decoding one frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Incremental content. `text` may be empty (role-only or keep-alive frames).
    Delta {
        text: String,
        mode: Option<ResponseMode>,
    },
    /// The backend reported an error inside the stream.
    Error(String),
    /// Terminator sentinel.
    Done,
}

/// Why a payload could not be turned into a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailure {
    /// Truncated or syntactically broken JSON; worth retrying with more bytes.
    Incomplete,
    /// Well-formed JSON that is not a chunk object; retrying cannot help.
    Unexpected,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    #[serde(default)]
    message: Option<String>,
}

const DONE_SENTINEL: &str = "[DONE]";

/// Check if a payload is the end-of-stream sentinel.
#[must_use]
pub fn is_done_payload(payload: &str) -> bool {
    payload.trim() == DONE_SENTINEL
}

/// Decode the JSON text following `data: `.
///
/// Missing fields are "no delta this frame", never an error.
///
/// # Errors
///
/// Returns [`DecodeFailure::Incomplete`] for JSON that fails to parse and
/// [`DecodeFailure::Unexpected`] for valid JSON of the wrong shape.
pub fn decode_payload(payload: &str) -> Result<Frame, DecodeFailure> {
    if is_done_payload(payload) {
        return Ok(Frame::Done);
    }

    let chunk: ChatChunk = serde_json::from_str(payload).map_err(|err| {
        if err.is_data() {
            DecodeFailure::Unexpected
        } else {
            DecodeFailure::Incomplete
        }
    })?;

    if let Some(error) = chunk.error {
        return Ok(Frame::Error(
            error
                .message
                .unwrap_or_else(|| "upstream reported an error".to_string()),
        ));
    }

    let mut text = String::new();
    if let Some(content) = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
    {
        text = content;
    }

    Ok(Frame::Delta {
        text,
        mode: chunk.mode.as_deref().and_then(ResponseMode::parse),
    })
}
