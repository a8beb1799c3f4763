use serde::Serialize;

use crate::error::GenerationError;
use crate::extract::Completeness;
use crate::mode::ResponseMode;
use crate::observability::UsageReport;

use super::state::StatusType;

/// Per-delta notification.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkUpdate<'a> {
    pub session_id: u64,
    pub delta: &'a str,
    pub mode: ResponseMode,
    pub status_type: StatusType,
    pub status_message: &'static str,
    pub progress: u8,
    pub chunk_count: u64,
}

/// What a completed session delivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    pub session_id: u64,
    pub mode: ResponseMode,
    /// The final document (artifact) or the reasoning-free reply text.
    pub content: String,
    /// `None` on the conversation path.
    pub completeness: Option<Completeness>,
    pub usage: UsageReport,
}

/// Callbacks for one `generate` call.
///
/// At most one of `on_complete` and `on_error` fires; neither fires for a
/// cancelled or superseded session.
pub trait GenerationObserver: Send {
    fn on_chunk(&mut self, _update: &ChunkUpdate<'_>) {}

    fn on_complete(&mut self, _result: &GenerationResult) {}

    fn on_error(&mut self, _error: &GenerationError) {}
}

impl GenerationObserver for () {}
