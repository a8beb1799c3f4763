use serde::{Deserialize, Serialize};

use super::{GenerateRequest, Message, Role};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a web designer that builds single-file pages. \
When the user asks for a page or a change to a page, reply with one complete HTML document \
starting with <!DOCTYPE html> and ending with </html>, styled with Tailwind CSS utility classes. \
When the user asks a question or chats, reply in plain text without any HTML document.";

/// Streaming chat-completions request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
}

/// Build the backend request for `request`.
///
/// Layout: system prompt, prior history, then the user turn. A modification
/// request carries the current page inside the user turn.
#[must_use]
pub fn build_chat_request(
    request: &GenerateRequest,
    model: &str,
    system_prompt: Option<&str>,
) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(request.history.len() + 2);
    messages.push(Message::new(
        Role::System,
        system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT),
    ));
    messages.extend(
        request
            .history
            .iter()
            .filter(|turn| turn.role != Role::System)
            .cloned(),
    );
    messages.push(Message::new(Role::User, user_turn(request)));

    ChatCompletionRequest {
        model: model.to_owned(),
        messages,
        stream: true,
    }
}

fn user_turn(request: &GenerateRequest) -> String {
    let prompt = request.prompt.trim();
    match request.current_document.as_deref() {
        Some(document) if request.is_modification() => format!(
            "Here is the current page:\n```html\n{}\n```\n\nApply this change and return the full updated page:\n{prompt}",
            document.trim()
        ),
        _ => prompt.to_owned(),
    }
}
