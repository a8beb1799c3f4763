//! Conversation vs. artifact classification for a response.
use serde::{Deserialize, Serialize};

/// What kind of answer the backend is streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Plain assistant text shown in the chat.
    Conversation,
    /// A generated or modified web page.
    Artifact,
}

impl ResponseMode {
    /// Parse a marker value. Unknown values yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("conversation") || raw.eq_ignore_ascii_case("chat") {
            Some(ResponseMode::Conversation)
        } else if raw.eq_ignore_ascii_case("artifact")
            || raw.eq_ignore_ascii_case("generate")
            || raw.eq_ignore_ascii_case("modify")
        {
            Some(ResponseMode::Artifact)
        } else {
            None
        }
    }
}

/// Decides the response mode once per session.
///
/// The header signal wins; otherwise the first frame carrying a `mode`
/// field decides. Once [`ModeClassifier::decide`] has been called the
/// answer never changes.
#[derive(Debug, Clone, Default)]
pub struct ModeClassifier {
    decided: Option<ResponseMode>,
    locked: bool,
}

impl ModeClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the response header named `header_name`, if present.
    #[must_use]
    pub fn from_headers(headers: &http::HeaderMap, header_name: &str) -> Self {
        let decided = headers
            .get(header_name)
            .and_then(|value| value.to_str().ok())
            .and_then(ResponseMode::parse);
        Self {
            decided,
            locked: decided.is_some(),
        }
    }

    /// Feed an in-band signal; ignored once the mode is settled.
    pub fn observe(&mut self, signal: Option<ResponseMode>) {
        if self.locked {
            return;
        }
        if let Some(mode) = signal {
            self.decided = Some(mode);
            self.locked = true;
        }
    }

    /// Settle the mode, defaulting to [`ResponseMode::Artifact`].
    pub fn decide(&mut self) -> ResponseMode {
        self.locked = true;
        *self.decided.get_or_insert(ResponseMode::Artifact)
    }

    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.locked
    }
}
