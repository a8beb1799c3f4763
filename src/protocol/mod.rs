//! Request types exchanged with the UI and the chat-completions backend.
pub mod chat;

use serde::{Deserialize, Serialize};

pub use chat::{build_chat_request, ChatCompletionRequest, DEFAULT_SYSTEM_PROMPT};

/// Author of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A user's prompt plus everything needed to turn it into a backend call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    /// The page being modified, if any.
    #[serde(default)]
    pub current_document: Option<String>,
    /// Model override; the configured default is used when absent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub history: Vec<Message>,
}

impl GenerateRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// `true` when the request edits an existing page.
    #[must_use]
    pub fn is_modification(&self) -> bool {
        self.current_document
            .as_deref()
            .is_some_and(|doc| !doc.trim().is_empty())
    }
}
