//! Collaborators that receive the results of completed sessions.
//!
//! The engine never charges or persists on its own; the host calls these
//! after a session completes, and never after an error or a stop.
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::observability::UsageReport;
use crate::protocol::Message;

/// One file of a generated project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub path: String,
    pub content: String,
}

impl ProjectFile {
    pub const INDEX_PATH: &'static str = "index.html";

    /// The single entry page of a generated site.
    #[must_use]
    pub fn index(document: &str) -> Self {
        Self {
            path: Self::INDEX_PATH.to_owned(),
            content: document.to_owned(),
        }
    }
}

/// Persists generated pages.
pub trait ArtifactStore: Send + Sync {
    /// # Errors
    ///
    /// Implementations report storage failures; the session result stands.
    fn save(
        &self,
        chat_id: &str,
        document: &str,
        files: &[ProjectFile],
        history: &[Message],
    ) -> Result<(), GenerationError>;
}

/// Charges completed generations.
pub trait UsageLedger: Send + Sync {
    /// # Errors
    ///
    /// Implementations report ledger failures; the session result stands.
    fn deduct(&self, report: &UsageReport) -> Result<(), GenerationError>;
}

/// Store that only logs what it would persist.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingArtifactStore;

impl ArtifactStore for LoggingArtifactStore {
    fn save(
        &self,
        chat_id: &str,
        document: &str,
        files: &[ProjectFile],
        history: &[Message],
    ) -> Result<(), GenerationError> {
        tracing::info!(
            chat_id,
            document_bytes = document.len(),
            files = files.len(),
            history_turns = history.len(),
            "artifact saved"
        );
        Ok(())
    }
}

/// Ledger that only logs the usage it would charge.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingUsageLedger;

impl UsageLedger for LoggingUsageLedger {
    fn deduct(&self, report: &UsageReport) -> Result<(), GenerationError> {
        tracing::info!(
            session_id = report.session_id,
            model = %report.model,
            output_tokens = report.estimated_output_tokens,
            duration_ms = report.duration_ms,
            "usage recorded"
        );
        Ok(())
    }
}
