use serde::{Deserialize, Serialize};

use crate::progress::Phase;

/// Coarse status shown next to the progress bar.
///
/// Phases are declared in pipeline order so the derived ordering matches
/// how a normal run advances.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    #[default]
    Analyzing,
    Planning,
    Building,
    Styling,
    Finalizing,
    Complete,
    Error,
    Conversation,
}

impl From<Phase> for StatusType {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Analyzing => StatusType::Analyzing,
            Phase::Planning => StatusType::Planning,
            Phase::Building => StatusType::Building,
            Phase::Styling => StatusType::Styling,
            Phase::Finalizing => StatusType::Finalizing,
        }
    }
}

/// Terminal transition a session took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Status message of a stopped or superseded session.
pub const STOPPED_MESSAGE: &str = "Generation stopped";
pub(crate) const RESPONDING_MESSAGE: &str = "Responding...";
pub(crate) const PAGE_READY_MESSAGE: &str = "Your page is ready!";
pub(crate) const REPLY_READY_MESSAGE: &str = "Response complete";

/// Observable state of one generation; the UI gets clones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSession {
    pub session_id: u64,
    pub is_generating: bool,
    pub status_type: StatusType,
    pub status_message: String,
    pub progress: u8,
    /// Every delta in arrival order; never rewritten.
    pub accumulated_text: String,
    /// Best page recovered so far; lags the stream, never reverts to empty.
    pub last_extracted_document: String,
    pub is_complete: bool,
    pub is_conversation: bool,
    pub conversation_response: String,
    pub error: Option<String>,
    pub outcome: Option<SessionOutcome>,
    pub chunk_count: u64,
}

impl GenerationSession {
    /// Fresh state for a session that just started.
    #[must_use]
    pub fn started(session_id: u64) -> Self {
        Self {
            session_id,
            is_generating: true,
            status_message: Phase::Analyzing.status_message().to_owned(),
            ..Self::default()
        }
    }

    /// `true` once completion, failure or cancellation was recorded.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.outcome.is_some()
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.is_generating = false;
        self.is_complete = false;
        self.error = None;
        self.status_message = STOPPED_MESSAGE.to_owned();
        self.outcome = Some(SessionOutcome::Cancelled);
    }

    pub(crate) fn mark_failed(&mut self, message: &str) {
        self.is_generating = false;
        self.is_complete = false;
        self.progress = 0;
        self.status_type = StatusType::Error;
        self.status_message = message.to_owned();
        self.error = Some(message.to_owned());
        self.outcome = Some(SessionOutcome::Failed);
    }
}
