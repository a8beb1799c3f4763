use serde_json::json;

/// Error type shared by the generation pipeline and the host service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Model returned an empty response")]
    EmptyResponse,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category, used to pick the user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    SessionExpired,
    InsufficientBalance,
    PlanRequired,
    RateLimited,
    UpstreamUnavailable,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::SessionExpired,
        402 => ErrorCategory::InsufficientBalance,
        403 => ErrorCategory::PlanRequired,
        429 => ErrorCategory::RateLimited,
        500 | 502 | 503 | 504 | 529 => ErrorCategory::UpstreamUnavailable,
        _ => ErrorCategory::Unknown,
    }
}

impl GenerationError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GenerationError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            GenerationError::Upstream { status, .. } => category_from_upstream_status(*status),
            GenerationError::Transport(_) => ErrorCategory::UpstreamUnavailable,
            GenerationError::Config(_)
            | GenerationError::Protocol(_)
            | GenerationError::EmptyResponse
            | GenerationError::Internal(_) => ErrorCategory::Unknown,
        }
    }

    /// Message suitable for a dismissible, retryable notification.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self.category() {
            ErrorCategory::InvalidRequest => "The request could not be processed. Please rephrase and try again.",
            ErrorCategory::SessionExpired => "Your session has expired. Please sign in again.",
            ErrorCategory::InsufficientBalance => {
                "Insufficient credits. Please top up your balance to continue."
            }
            ErrorCategory::PlanRequired => "This model requires a paid plan. Please upgrade to use it.",
            ErrorCategory::RateLimited => "Too many requests. Please wait a moment and try again.",
            ErrorCategory::UpstreamUnavailable => {
                "The AI service is temporarily unavailable. Please try again shortly."
            }
            ErrorCategory::Unknown => "Something went wrong while generating. Please try again.",
        }
    }
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code
// ---------------------------------------------------------------------------

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::SessionExpired => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::InsufficientBalance => http::StatusCode::PAYMENT_REQUIRED,
        ErrorCategory::PlanRequired => http::StatusCode::FORBIDDEN,
        ErrorCategory::RateLimited => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::UpstreamUnavailable => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::Unknown => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Format an error as (`status_code`, JSON body) for the host service.
#[must_use]
pub fn format_error(err: &GenerationError) -> (http::StatusCode, serde_json::Value) {
    let status = http_status_for_category(err.category());
    let body = json!({
        "error": {
            "message": err.user_message(),
            "detail": err.to_string(),
            "status": status.as_u16(),
        }
    });
    (status, body)
}

impl axum::response::IntoResponse for GenerationError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}
