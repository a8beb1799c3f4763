use futures_util::StreamExt;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};

use crate::config::AppConfig;
use crate::error::GenerationError;
use crate::protocol::ChatCompletionRequest;

use super::{ChatBackend, HttpTransport, ModelStream};

const ERROR_BODY_PREVIEW_CHARS: usize = 512;

/// [`ChatBackend`] speaking the streaming chat-completions protocol over HTTP.
pub struct HttpBackend {
    transport: HttpTransport,
    url: url::Url,
    headers: HeaderMap,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns [`GenerationError::Config`] when the endpoint URL, API key or
    /// proxy cannot be used.
    pub fn from_config(config: &AppConfig) -> Result<Self, GenerationError> {
        let transport = HttpTransport::new(&config.server, config.upstream.proxy.as_deref())?;
        let url = completions_url(&config.upstream.base_url)?;
        let headers = request_headers(&config.upstream.api_key)?;
        Ok(Self {
            transport,
            url,
            headers,
        })
    }

    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }
}

impl ChatBackend for HttpBackend {
    async fn open_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ModelStream, GenerationError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| GenerationError::Internal(format!("request encoding failed: {e}")))?;
        let response = self
            .transport
            .send_stream(&self.url, &self.headers, body.into())
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "backend rejected generation request");
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                message: upstream_error_message(&raw),
            });
        }

        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| GenerationError::Transport(e.to_string())))
            .boxed();
        Ok(ModelStream { headers, body })
    }
}

fn completions_url(base_url: &str) -> Result<url::Url, GenerationError> {
    let joined = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    url::Url::parse(&joined)
        .map_err(|e| GenerationError::Config(format!("Invalid upstream URL '{joined}': {e}")))
}

fn request_headers(api_key: &str) -> Result<HeaderMap, GenerationError> {
    let mut headers = HeaderMap::with_capacity(3);
    let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| GenerationError::Config("API key is not a valid header value".into()))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    Ok(headers)
}

/// Best-effort message from an error body: `error.message`, `message`, or
/// the start of the raw text.
fn upstream_error_message(raw: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .or_else(|| value.get("error"))
            .and_then(serde_json::Value::as_str);
        if let Some(message) = message {
            return message.to_owned();
        }
    }
    raw.trim().chars().take(ERROR_BODY_PREVIEW_CHARS).collect()
}
