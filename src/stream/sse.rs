/// Line reader for `data:`-framed model streams, plus SSE encoding helpers
/// used by the host service.
///
/// The reader buffers partial lines across network chunks and reassembles
/// `data:` frames whose JSON was split by a stray line break.
use memchr::memchr_iter;

use super::decoder::{decode_payload, DecodeFailure, Frame};

/// Upper bound for a pushed-back fragment awaiting its continuation.
const MAX_PENDING_FRAGMENT_BYTES: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Utf8Carry: reassembles UTF-8 sequences split across chunks
// ---------------------------------------------------------------------------

/// Holds the trailing bytes of an incomplete UTF-8 sequence between chunks.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the decodable prefix of `pending + bytes` to `out`.
    ///
    /// Invalid sequences are replaced with U+FFFD; an incomplete trailing
    /// sequence is kept for the next call.
    pub fn push(&mut self, bytes: &[u8], out: &mut String) {
        if self.pending.is_empty() {
            if let Ok(text) = std::str::from_utf8(bytes) {
                out.push_str(text);
                return;
            }
        }

        self.pending.extend_from_slice(bytes);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                    let text = unsafe { std::str::from_utf8_unchecked(&self.pending[..valid_up_to]) };
                    out.push_str(text);
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid_up_to);
                            return;
                        }
                        Some(invalid_len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid_len);
                        }
                    }
                }
            }
        }
    }

    /// Number of bytes still waiting for the rest of their sequence.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// LineReader: incremental `data:` line reader
// ---------------------------------------------------------------------------

enum LineKind {
    Ignored,
    Frame(Frame),
    Incomplete,
    Unexpected,
}

fn classify_line(line: &str) -> LineKind {
    let Some(payload) = line.strip_prefix("data:") else {
        return LineKind::Ignored;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    match decode_payload(payload) {
        Ok(frame) => LineKind::Frame(frame),
        Err(DecodeFailure::Incomplete) => LineKind::Incomplete,
        Err(DecodeFailure::Unexpected) => LineKind::Unexpected,
    }
}

/// Incremental reader for `data: {json}` line streams.
///
/// Feed it text chunks (arriving at arbitrary boundaries) and it yields
/// decoded [`Frame`]s in arrival order. Reading stops at the `[DONE]`
/// sentinel; later input is ignored.
pub struct LineReader {
    buffer: String,
    read_offset: usize,
    fragment: Option<String>,
    finished: bool,
}

impl LineReader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            fragment: None,
            finished: false,
        }
    }

    /// Feed raw text and return any frames completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<Frame> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append completed frames into a caller-provided buffer.
    ///
    /// Rules:
    /// - lines end at `\n`; one trailing `\r` is stripped
    /// - empty lines, `:` comments and non-`data:` lines are skipped
    /// - `data: [DONE]` ends the stream and is emitted as [`Frame::Done`]
    /// - a `data:` line whose JSON does not parse is held back and joined
    ///   with the next line before being retried
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<Frame>) {
        if self.finished {
            return;
        }
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            processed_up_to = line_end + 1;
            if Self::process_line(line, &mut self.fragment, out) {
                self.finished = true;
                break;
            }
        }

        if self.finished {
            self.buffer.clear();
            self.read_offset = 0;
            self.fragment = None;
            return;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush at physical end of stream.
    ///
    /// An unterminated last line is processed as if it ended with `\n`;
    /// anything still unparseable afterwards is dropped with a warning.
    pub fn finish_into(&mut self, out: &mut Vec<Frame>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let tail = std::mem::take(&mut self.buffer);
        let tail = &tail[self.read_offset..];
        self.read_offset = 0;
        let tail = tail.strip_suffix('\r').unwrap_or(tail);
        if !tail.is_empty() {
            Self::process_line(tail, &mut self.fragment, out);
        }

        if let Some(fragment) = self.fragment.take() {
            tracing::warn!(
                dropped_bytes = fragment.len(),
                "stream ended with an unparseable data frame"
            );
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns `true` when the line was the `[DONE]` sentinel.
    fn process_line(line: &str, fragment: &mut Option<String>, out: &mut Vec<Frame>) -> bool {
        if let Some(mut held) = fragment.take() {
            held.push_str(line);
            match classify_line(&held) {
                LineKind::Frame(frame) => return Self::emit(frame, out),
                LineKind::Unexpected => {
                    tracing::warn!(bytes = held.len(), "dropping data frame with unexpected shape");
                    return false;
                }
                LineKind::Ignored | LineKind::Incomplete => {}
            }

            return match classify_line(line) {
                LineKind::Frame(frame) => {
                    tracing::warn!(
                        dropped_bytes = held.len() - line.len(),
                        "dropping stale partial data frame"
                    );
                    Self::emit(frame, out)
                }
                LineKind::Incomplete => {
                    tracing::warn!(
                        dropped_bytes = held.len() - line.len(),
                        "dropping stale partial data frame"
                    );
                    *fragment = Some(line.to_owned());
                    false
                }
                LineKind::Unexpected => {
                    tracing::warn!(bytes = line.len(), "dropping data frame with unexpected shape");
                    false
                }
                LineKind::Ignored => {
                    if held.len() <= MAX_PENDING_FRAGMENT_BYTES {
                        *fragment = Some(held);
                    } else {
                        tracing::warn!(
                            dropped_bytes = held.len(),
                            "partial data frame exceeded the buffer limit"
                        );
                    }
                    false
                }
            };
        }

        match classify_line(line) {
            LineKind::Frame(frame) => Self::emit(frame, out),
            LineKind::Incomplete => {
                tracing::debug!(bytes = line.len(), "holding back partial data frame");
                *fragment = Some(line.to_owned());
                false
            }
            LineKind::Unexpected => {
                tracing::warn!(bytes = line.len(), "dropping data frame with unexpected shape");
                false
            }
            LineKind::Ignored => false,
        }
    }

    #[inline]
    fn emit(frame: Frame, out: &mut Vec<Frame>) -> bool {
        let done = frame == Frame::Done;
        out.push(frame);
        done
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// A named SSE frame sent from the host service to the UI.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Encode an [`SseFrame`] into SSE wire text.
///
/// - If `event` is `Some`: `event: {event}\ndata: {data}\n\n`
/// - If `event` is `None`: `data: {data}\n\n`
///
/// Multi-line data is split over several `data:` lines.
#[must_use]
pub fn encode_sse_frame(frame: &SseFrame) -> String {
    let mut out = String::with_capacity(16 + frame.data.len());
    if let Some(event) = frame.event.as_deref() {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    for line in frame.data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}
