//! When and how long to wait before re-sending a generation request.
//!
//! Retries only happen before the response stream opens; once deltas flow,
//! a failure ends the session.
use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;

use crate::util::contains_ascii_case_insensitive;

pub(crate) const RETRY_MAX_ATTEMPTS: u32 = 2;
const RETRY_BACKOFF_BASE_MS: u64 = 100;
const RETRY_BACKOFF_MAX_MS: u64 = 1_000;
const RETRY_AFTER_MAX_SECS: u64 = 30;
const RETRY_RESET_SECOND_MS: u64 = 10;

const TRANSIENT_TRANSPORT_SIGNATURES: [&[u8]; 9] = [
    b"timed out",
    b"timeout",
    b"connection reset",
    b"connection aborted",
    b"broken pipe",
    b"http2 error",
    b"connection refused",
    b"unexpected eof",
    b"stream closed",
];

// Dropped pooled connections; a fresh connection usually succeeds at once.
const STALE_CONNECTION_SIGNATURES: [&[u8]; 6] = [
    b"connection reset",
    b"connection aborted",
    b"broken pipe",
    b"http2 error",
    b"unexpected eof",
    b"stream closed",
];

/// Delay before retrying an upstream reply with `status`, or `None` when the
/// reply should be surfaced as is.
#[must_use]
pub(crate) fn status_retry_delay(
    status: http::StatusCode,
    headers: &http::HeaderMap,
    attempt: u32,
) -> Option<Duration> {
    if attempt >= RETRY_MAX_ATTEMPTS || !matches!(status.as_u16(), 429 | 503 | 529) {
        return None;
    }
    Some(parse_retry_after_delay(headers).unwrap_or_else(|| backoff_delay(attempt)))
}

/// Delay before retrying after a transport failure described by `message`,
/// or `None` when the failure is not transient or attempts are exhausted.
#[must_use]
pub(crate) fn transport_retry_delay(message: &str, attempt: u32) -> Option<Duration> {
    if attempt >= RETRY_MAX_ATTEMPTS || !matches_any(message, &TRANSIENT_TRANSPORT_SIGNATURES) {
        return None;
    }
    if matches_any(message, &STALE_CONNECTION_SIGNATURES) {
        return Some(if attempt == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(RETRY_RESET_SECOND_MS)
        });
    }
    Some(backoff_delay(attempt))
}

fn matches_any(message: &str, signatures: &[&[u8]]) -> bool {
    let haystack = message.as_bytes();
    signatures
        .iter()
        .any(|needle| contains_ascii_case_insensitive(haystack, needle))
}

fn backoff_delay(attempt: u32) -> Duration {
    let multiplier = 1_u64 << attempt.min(10);
    Duration::from_millis(
        RETRY_BACKOFF_BASE_MS
            .saturating_mul(multiplier)
            .min(RETRY_BACKOFF_MAX_MS),
    )
}

/// `Retry-After` as delta-seconds or an HTTP date, capped.
fn parse_retry_after_delay(headers: &http::HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds.min(RETRY_AFTER_MAX_SECS)));
    }

    let target = httpdate::parse_http_date(raw).ok()?;
    let delay = target.duration_since(SystemTime::now()).unwrap_or_default();
    Some(delay.min(Duration::from_secs(RETRY_AFTER_MAX_SECS)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_headers() -> http::HeaderMap {
        http::HeaderMap::new()
    }

    #[test]
    fn test_retriable_statuses() {
        for code in [429, 503, 529] {
            let status = http::StatusCode::from_u16(code).unwrap();
            assert!(status_retry_delay(status, &no_headers(), 0).is_some());
        }
        for code in [400, 401, 402, 403, 500, 502] {
            let status = http::StatusCode::from_u16(code).unwrap();
            assert!(status_retry_delay(status, &no_headers(), 0).is_none());
        }
    }

    #[test]
    fn test_status_retry_exhausts() {
        let status = http::StatusCode::TOO_MANY_REQUESTS;
        assert!(status_retry_delay(status, &no_headers(), RETRY_MAX_ATTEMPTS).is_none());
    }

    #[test]
    fn test_retry_after_seconds_is_capped() {
        let mut headers = http::HeaderMap::new();
        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("5"));
        assert_eq!(parse_retry_after_delay(&headers), Some(Duration::from_secs(5)));
        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("3600"));
        assert_eq!(
            parse_retry_after_delay(&headers),
            Some(Duration::from_secs(RETRY_AFTER_MAX_SECS))
        );
    }

    #[test]
    fn test_retry_after_http_date() {
        let target = SystemTime::now() + Duration::from_secs(2);
        let mut headers = http::HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            http::HeaderValue::from_str(&httpdate::fmt_http_date(target)).unwrap(),
        );
        let delay = parse_retry_after_delay(&headers).unwrap();
        assert!(delay <= Duration::from_secs(RETRY_AFTER_MAX_SECS));
    }

    #[test]
    fn test_invalid_retry_after_falls_back_to_backoff() {
        let mut headers = http::HeaderMap::new();
        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("not-a-delay"));
        assert_eq!(
            status_retry_delay(http::StatusCode::SERVICE_UNAVAILABLE, &headers, 1),
            Some(Duration::from_millis(200))
        );
    }

    #[test]
    fn test_stale_connection_retries_immediately() {
        assert_eq!(
            transport_retry_delay("connection reset by peer", 0),
            Some(Duration::ZERO)
        );
        assert_eq!(
            transport_retry_delay("unexpected EOF while reading", 1),
            Some(Duration::from_millis(RETRY_RESET_SECOND_MS))
        );
    }

    #[test]
    fn test_timeout_uses_backoff() {
        assert_eq!(
            transport_retry_delay("operation timed out", 0),
            Some(Duration::from_millis(RETRY_BACKOFF_BASE_MS))
        );
    }

    #[test]
    fn test_non_transient_transport_error_is_final() {
        assert!(transport_retry_delay("invalid certificate", 0).is_none());
        assert!(transport_retry_delay("connection reset", RETRY_MAX_ATTEMPTS).is_none());
    }
}
