//! Usage accounting for completed generations.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mode::ResponseMode;
use crate::protocol::ChatCompletionRequest;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimate the prompt tokens of a backend request, summed over all turns.
#[must_use]
pub fn estimate_request_tokens(request: &ChatCompletionRequest) -> u64 {
    request
        .messages
        .iter()
        .map(|message| estimate_tokens(&message.content))
        .sum()
}

/// What a completed generation consumed; handed to the usage ledger.
///
/// No pricing is applied here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub session_id: u64,
    pub model: String,
    pub mode: ResponseMode,
    /// Length in characters of the delivered document or reply.
    pub output_chars: usize,
    pub estimated_input_tokens: u64,
    pub estimated_output_tokens: u64,
    pub duration_ms: u64,
    /// Unix seconds at completion.
    pub finished_at: u64,
}

impl UsageReport {
    #[must_use]
    pub fn new(
        session_id: u64,
        model: &str,
        mode: ResponseMode,
        input_tokens: u64,
        output: &str,
        duration: Duration,
    ) -> Self {
        Self {
            session_id,
            model: model.to_owned(),
            mode,
            output_chars: output.chars().count(),
            estimated_input_tokens: input_tokens,
            estimated_output_tokens: estimate_tokens(output),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            finished_at: crate::util::unix_now_secs(),
        }
    }
}
