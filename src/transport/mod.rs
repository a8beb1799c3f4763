mod backend;
mod http_transport;
mod retry_policy;

use std::future::Future;

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::error::GenerationError;
use crate::protocol::ChatCompletionRequest;

pub use backend::HttpBackend;
pub use http_transport::HttpTransport;

/// Raw response body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, GenerationError>>;

/// An opened generation response: headers (for the mode signal) and body.
pub struct ModelStream {
    pub headers: http::HeaderMap,
    pub body: ByteStream,
}

impl ModelStream {
    #[must_use]
    pub fn new(headers: http::HeaderMap, body: ByteStream) -> Self {
        Self { headers, body }
    }
}

/// Source of streamed completions for a session.
///
/// A non-2xx reply must be reported as [`GenerationError::Upstream`] so the
/// status maps to the right user-facing message.
pub trait ChatBackend: Send + Sync {
    fn open_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> impl Future<Output = Result<ModelStream, GenerationError>> + Send;
}

impl<B: ChatBackend> ChatBackend for std::sync::Arc<B> {
    fn open_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> impl Future<Output = Result<ModelStream, GenerationError>> + Send {
        (**self).open_stream(request)
    }
}
