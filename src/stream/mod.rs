pub mod decoder;
pub mod sse;

pub use decoder::{decode_payload, is_done_payload, Frame};
pub use sse::{encode_sse_frame, LineReader, SseFrame, Utf8Carry};

use futures_util::Stream;

use crate::error::GenerationError;

/// Bytes-in, frames-out decoder for one response body.
///
/// Chains [`Utf8Carry`] and [`LineReader`] so callers can feed raw network
/// chunks directly.
#[derive(Default)]
pub struct FrameDecoder {
    utf8: Utf8Carry,
    lines: LineReader,
    text: String,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one network chunk, appending completed frames to `out`.
    pub fn push_bytes(&mut self, bytes: &[u8], out: &mut Vec<Frame>) {
        self.text.clear();
        self.utf8.push(bytes, &mut self.text);
        if !self.text.is_empty() {
            self.lines.feed_into(&self.text, out);
        }
    }

    /// Flush at physical end of stream.
    pub fn finish(&mut self, out: &mut Vec<Frame>) {
        if self.utf8.pending_len() > 0 {
            tracing::warn!(
                dropped_bytes = self.utf8.pending_len(),
                "stream ended inside a UTF-8 sequence"
            );
        }
        self.lines.finish_into(out);
    }

    /// `true` once the `[DONE]` sentinel was read or [`Self::finish`] ran.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lines.is_finished()
    }
}

struct PendingFrames {
    frames: Vec<Frame>,
    head: usize,
}

impl PendingFrames {
    fn pop_front(&mut self) -> Option<Frame> {
        if self.head >= self.frames.len() {
            return None;
        }
        let frame = std::mem::replace(&mut self.frames[self.head], Frame::Done);
        self.head += 1;
        if self.head == self.frames.len() {
            self.frames.clear();
            self.head = 0;
        }
        Some(frame)
    }
}

/// Turn a response body into a stream of decoded frames.
///
/// The stream ends right after [`Frame::Done`], or at physical end of the
/// body once the trailing partial line has been flushed. A transport error
/// is yielded once and ends the stream.
pub fn frame_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<Frame, GenerationError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            FrameDecoder::new(),
            PendingFrames {
                frames: Vec::with_capacity(8),
                head: 0,
            },
            false,
        ),
        |(mut stream, mut decoder, mut pending, mut ended)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((Ok(frame), (stream, decoder, pending, ended)));
                }
                if ended || decoder.is_finished() {
                    return None;
                }

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => decoder.push_bytes(&bytes, &mut pending.frames),
                    Some(Err(err)) => {
                        ended = true;
                        let err = GenerationError::Transport(format!("stream read failed: {err}"));
                        return Some((Err(err), (stream, decoder, pending, ended)));
                    }
                    None => {
                        decoder.finish(&mut pending.frames);
                        ended = true;
                    }
                }
            }
        },
    )
}
