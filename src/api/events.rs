//! Session events delivered to the UI as server-sent events.
use std::convert::Infallible;
use std::sync::Arc;

use axum::response::Response;
use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{format_error, GenerationError};
use crate::session::{ChunkUpdate, GenerationObserver, GenerationResult};
use crate::state::ChatController;
use crate::stream::{encode_sse_frame, SseFrame};

pub(crate) const EVENT_CHUNK: &str = "chunk";
pub(crate) const EVENT_COMPLETE: &str = "complete";
pub(crate) const EVENT_ERROR: &str = "error";
pub(crate) const EVENT_CANCELLED: &str = "cancelled";

/// Observer that forwards session events to one SSE response.
///
/// When the client goes away the session is stopped.
pub(crate) struct SseObserver {
    tx: mpsc::UnboundedSender<String>,
    controller: Arc<ChatController>,
    result: Option<GenerationResult>,
    disconnected: bool,
}

impl SseObserver {
    pub(crate) fn new(tx: mpsc::UnboundedSender<String>, controller: Arc<ChatController>) -> Self {
        Self {
            tx,
            controller,
            result: None,
            disconnected: false,
        }
    }

    pub(crate) fn take_result(&mut self) -> Option<GenerationResult> {
        self.result.take()
    }

    pub(crate) fn send<T: Serialize>(&mut self, event: &str, payload: &T) {
        if self.disconnected {
            return;
        }
        let data = match serde_json::to_string(payload) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(event, error = %err, "failed to encode session event");
                return;
            }
        };
        let frame = encode_sse_frame(&SseFrame {
            event: Some(event.to_owned()),
            data,
        });
        if self.tx.send(frame).is_err() {
            self.disconnected = true;
            tracing::debug!(event, "client disconnected, stopping session");
            self.controller.stop();
        }
    }
}

impl GenerationObserver for SseObserver {
    fn on_chunk(&mut self, update: &ChunkUpdate<'_>) {
        self.send(EVENT_CHUNK, update);
    }

    fn on_complete(&mut self, result: &GenerationResult) {
        self.result = Some(result.clone());
    }

    fn on_error(&mut self, error: &GenerationError) {
        let (_, body) = format_error(error);
        self.send(EVENT_ERROR, &body);
    }
}

/// Body stream draining encoded frames until the sender is dropped.
pub(crate) fn event_stream(
    rx: mpsc::UnboundedReceiver<String>,
) -> impl Stream<Item = Result<bytes::Bytes, Infallible>> + Send {
    futures_util::stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((Ok(bytes::Bytes::from(frame)), rx))
    })
}

pub(crate) fn sse_ok_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
