use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::collab::ProjectFile;
use crate::error::GenerationError;
use crate::mode::ResponseMode;
use crate::protocol::{GenerateRequest, Message, Role};
use crate::session::{GenerationResult, SessionOutcome, STOPPED_MESSAGE};
use crate::state::{AppState, ChatController};

use super::events::{
    event_stream, sse_ok_response, SseObserver, EVENT_CANCELLED, EVENT_COMPLETE,
};

#[derive(Debug, Deserialize)]
struct GenerateBody {
    chat_id: String,
    #[serde(flatten)]
    request: GenerateRequest,
}

#[derive(Debug, Deserialize)]
struct StopBody {
    chat_id: String,
}

fn parse_body<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, GenerationError> {
    serde_json::from_slice(bytes)
        .map_err(|e| GenerationError::InvalidRequest(format!("Invalid JSON body: {e}")))
}

fn require_chat_id(chat_id: &str) -> Result<(), GenerationError> {
    if chat_id.trim().is_empty() {
        return Err(GenerationError::InvalidRequest("chat_id is required".into()));
    }
    Ok(())
}

/// `POST /v1/generate`: start a session and stream its events.
///
/// Any session already running for the chat is cancelled; its stream ends
/// with a `cancelled` event.
pub fn generate_handler(state: Arc<AppState>, bytes: &[u8]) -> Response {
    let body: GenerateBody = match parse_body(bytes) {
        Ok(body) => body,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = require_chat_id(&body.chat_id) {
        return err.into_response();
    }
    if let Some(model) = body.request.model.as_deref() {
        let models = &state.config.upstream.models;
        if !models.is_empty() && !models.iter().any(|known| known == model) {
            return GenerationError::InvalidRequest(format!("Unknown model '{model}'"))
                .into_response();
        }
    }

    let controller = state.controller(&body.chat_id);
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_session(state, controller, body, tx));
    sse_ok_response(Body::from_stream(event_stream(rx)))
}

async fn run_session(
    state: Arc<AppState>,
    controller: Arc<ChatController>,
    body: GenerateBody,
    tx: mpsc::UnboundedSender<String>,
) {
    let GenerateBody { chat_id, request } = body;
    let mut history = request.history.clone();
    history.push(Message::new(Role::User, request.prompt.clone()));

    let mut observer = SseObserver::new(tx, Arc::clone(&controller));
    match controller.generate(request, &mut observer).await {
        SessionOutcome::Completed => {
            if let Some(result) = observer.take_result() {
                persist(&state, &chat_id, history, &result);
                observer.send(EVENT_COMPLETE, &result);
            }
        }
        SessionOutcome::Failed => {}
        SessionOutcome::Cancelled => {
            observer.send(EVENT_CANCELLED, &json!({ "message": STOPPED_MESSAGE }));
        }
    }
}

/// Hand a completed session to the collaborators. Failures are logged; the
/// result has already been produced.
fn persist(state: &AppState, chat_id: &str, mut history: Vec<Message>, result: &GenerationResult) {
    history.push(Message::new(Role::Assistant, result.content.clone()));
    if result.mode == ResponseMode::Artifact {
        let files = [ProjectFile::index(&result.content)];
        if let Err(err) = state
            .store()
            .save(chat_id, &result.content, &files, &history)
        {
            tracing::warn!(chat_id, error = %err, "failed to save artifact");
        }
    }
    if let Err(err) = state.ledger().deduct(&result.usage) {
        tracing::warn!(chat_id, error = %err, "failed to record usage");
    }
}

/// `POST /v1/stop`: stop the running session of a chat. Idempotent.
pub fn stop_handler(state: &AppState, bytes: &[u8]) -> Response {
    let body: StopBody = match parse_body(bytes) {
        Ok(body) => body,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = require_chat_id(&body.chat_id) {
        return err.into_response();
    }
    let Some(controller) = state.existing_controller(&body.chat_id) else {
        return Json(json!({ "stopped": false })).into_response();
    };
    let was_generating = controller.is_generating();
    controller.stop();
    Json(json!({
        "stopped": was_generating,
        "session": controller.snapshot(),
    }))
    .into_response()
}

/// `GET /v1/session?chat_id=...`: snapshot of a chat's current session.
pub fn session_handler(state: &AppState, query: Option<&str>) -> Response {
    let chat_id = query
        .map(|query| url::form_urlencoded::parse(query.as_bytes()))
        .and_then(|mut pairs| pairs.find(|(key, _)| key == "chat_id"))
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();
    if let Err(err) = require_chat_id(&chat_id) {
        return err.into_response();
    }
    match state.existing_controller(&chat_id) {
        Some(controller) => Json(controller.snapshot()).into_response(),
        None => http::StatusCode::NOT_FOUND.into_response(),
    }
}
