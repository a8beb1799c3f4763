use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::GenerationError;

use super::retry_policy::{status_retry_delay, transport_retry_delay};

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, GenerationError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| GenerationError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| GenerationError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client for the model backend.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client from the server pool/timeout settings and an optional
    /// explicit proxy.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Config`] when the proxy URL is invalid or
    /// the client cannot be built.
    pub fn new(config: &ServerConfig, proxy_url: Option<&str>) -> Result<Self, GenerationError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(config.timeout),
            config.http_use_env_proxy,
            proxy_url,
        )?;
        Ok(Self { client })
    }

    /// POST `body` and return the response once headers arrive; the caller
    /// reads the body as a stream.
    ///
    /// Retriable statuses (429/503/529) and transient transport failures are
    /// retried a bounded number of times. Any other non-2xx response is
    /// returned as is.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Transport`] when the request cannot be
    /// executed and retries are exhausted.
    pub async fn send_stream(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, GenerationError> {
        let mut attempt = 0;
        loop {
            let mut request = reqwest::Request::new(http::Method::POST, url.clone());
            *request.headers_mut() = headers.clone();
            *request.body_mut() = Some(reqwest::Body::from(body.clone()));

            match self.client.execute(request).await {
                Ok(response) => {
                    let Some(delay) =
                        status_retry_delay(response.status(), response.headers(), attempt)
                    else {
                        return Ok(response);
                    };
                    tracing::debug!(
                        status = response.status().as_u16(),
                        retry_attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        "retrying generation request after retriable status"
                    );
                    drop(response);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let message = err.to_string();
                    let Some(delay) = transport_retry_delay(&message, attempt) else {
                        return Err(GenerationError::Transport(message));
                    };
                    tracing::debug!(
                        retry_attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        error = %message,
                        "retrying generation request after transport error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_proxy_is_config_error() {
        let result = HttpTransport::new(&ServerConfig::default(), Some("::not a url::"));
        assert!(matches!(result, Err(GenerationError::Config(_))));
    }

    #[test]
    fn test_builds_without_proxy() {
        assert!(HttpTransport::new(&ServerConfig::default(), None).is_ok());
    }
}
