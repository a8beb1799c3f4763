//! Generation session controller.
//!
//! One controller serves one chat context and runs at most one session at a
//! time. Each `generate` call owns its session from submit to a single
//! terminal transition (completed, failed or cancelled). All state writes go
//! through an identity check, so a session that was stopped or superseded
//! can never touch the state of its successor.
mod observer;
mod state;

use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::GenerationError;
use crate::extract::{self, strip_thinking};
use crate::mode::{ModeClassifier, ResponseMode};
use crate::observability::{self, estimate_request_tokens, UsageReport};
use crate::progress::{ProgressEstimator, ProgressStep, DEFAULT_PROGRESS_TABLE};
use crate::protocol::{build_chat_request, GenerateRequest};
use crate::stream::{frame_stream, Frame};
use crate::transport::ChatBackend;

pub use observer::{ChunkUpdate, GenerationObserver, GenerationResult};
pub use state::{GenerationSession, SessionOutcome, StatusType, STOPPED_MESSAGE};

use state::{PAGE_READY_MESSAGE, REPLY_READY_MESSAGE, RESPONDING_MESSAGE};

/// Controller tuning, usually taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub default_model: String,
    pub extract_every_chunks: u64,
    pub extract_interval: Duration,
    pub progress_table: Vec<ProgressStep>,
    pub mode_header: String,
    pub system_prompt: Option<String>,
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_model: config.upstream.default_model.clone(),
            extract_every_chunks: config.generation.extract_every_chunks,
            extract_interval: Duration::from_millis(config.generation.extract_interval_ms),
            progress_table: config.generation.progress_table.clone(),
            mode_header: config.upstream.mode_header.clone(),
            system_prompt: config.generation.system_prompt.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_model: "default".to_owned(),
            extract_every_chunks: 25,
            extract_interval: Duration::from_millis(750),
            progress_table: DEFAULT_PROGRESS_TABLE.to_vec(),
            mode_header: "x-response-mode".to_owned(),
            system_prompt: None,
        }
    }
}

struct ActiveSession {
    id: u64,
    cancel: CancellationToken,
}

/// Drives generation sessions against a [`ChatBackend`].
pub struct SessionController<B> {
    backend: B,
    settings: SessionSettings,
    state: RwLock<GenerationSession>,
    active: Mutex<Option<ActiveSession>>,
    next_session_id: AtomicU64,
}

/// Pipeline-local bookkeeping for the session being read.
struct SessionRun {
    id: u64,
    model: String,
    started: Instant,
    input_tokens: u64,
    classifier: ModeClassifier,
    mode: Option<ResponseMode>,
    progress: ProgressEstimator,
    text: String,
    since_extract: u64,
    last_extract: Instant,
}

/// Releases the active slot when `generate` returns or its future is
/// dropped; a dropped session is recorded as cancelled.
struct ActiveGuard<'a, B> {
    controller: &'a SessionController<B>,
    id: u64,
}

impl<B> Drop for ActiveGuard<'_, B> {
    fn drop(&mut self) {
        self.controller.mark_cancelled(self.id);
        let mut active = self.controller.active.lock();
        if active.as_ref().is_some_and(|session| session.id == self.id) {
            *active = None;
        }
    }
}

impl<B> SessionController<B> {
    #[must_use]
    pub fn new(backend: B, settings: SessionSettings) -> Self {
        Self {
            backend,
            settings,
            state: RwLock::new(GenerationSession::default()),
            active: Mutex::new(None),
            next_session_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Clone of the current session state.
    #[must_use]
    pub fn snapshot(&self) -> GenerationSession {
        self.state.read().clone()
    }

    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.state.read().is_generating
    }

    /// Stop the active session, if any. Idempotent.
    ///
    /// The state reflects the stop as soon as this returns; the transport
    /// read is aborted at its next suspension point.
    pub fn stop(&self) {
        let active = self.active.lock();
        let Some(session) = active.as_ref() else {
            return;
        };
        session.cancel.cancel();
        self.mark_cancelled(session.id);
    }

    /// Apply `apply` to the state if session `id` is current and still
    /// running.
    fn update<R>(&self, id: u64, apply: impl FnOnce(&mut GenerationSession) -> R) -> Option<R> {
        let mut state = self.state.write();
        if state.session_id != id || state.is_terminated() {
            return None;
        }
        Some(apply(&mut state))
    }

    fn mark_cancelled(&self, id: u64) {
        if self.update(id, GenerationSession::mark_cancelled).is_some() {
            tracing::info!(session_id = id, "generation stopped");
        }
    }

    /// Cancel whatever runs now and install a fresh session.
    fn begin(&self) -> (u64, CancellationToken) {
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
            self.mark_cancelled(previous.id);
        }
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *self.state.write() = GenerationSession::started(id);
        *active = Some(ActiveSession {
            id,
            cancel: cancel.clone(),
        });
        (id, cancel)
    }

    fn fail<O: GenerationObserver>(
        &self,
        id: u64,
        error: &GenerationError,
        observer: &mut O,
    ) -> SessionOutcome {
        let message = error.user_message();
        if self.update(id, |state| state.mark_failed(message)).is_none() {
            return SessionOutcome::Cancelled;
        }
        tracing::warn!(session_id = id, error = %error, "generation failed");
        observer.on_error(error);
        SessionOutcome::Failed
    }
}

impl<B: ChatBackend> SessionController<B> {
    /// Run one generation to its terminal transition.
    ///
    /// Any session already running on this controller is cancelled first.
    pub async fn generate<O: GenerationObserver>(
        &self,
        request: GenerateRequest,
        observer: &mut O,
    ) -> SessionOutcome {
        let (id, cancel) = self.begin();
        let started = Instant::now();
        let _guard = ActiveGuard {
            controller: self,
            id,
        };

        if request.prompt.trim().is_empty() {
            let error = GenerationError::InvalidRequest("prompt is empty".into());
            return self.fail(id, &error, observer);
        }

        let model = request
            .model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(self.settings.default_model.as_str())
            .to_owned();
        let chat_request =
            build_chat_request(&request, &model, self.settings.system_prompt.as_deref());
        tracing::info!(
            session_id = id,
            model = %model,
            modification = request.is_modification(),
            history_turns = request.history.len(),
            "generation started"
        );

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return SessionOutcome::Cancelled,
            opened = self.backend.open_stream(&chat_request) => opened,
        };
        let response = match opened {
            Ok(response) => response,
            Err(error) => return self.fail(id, &error, observer),
        };

        let mut run = SessionRun {
            id,
            model,
            started,
            input_tokens: estimate_request_tokens(&chat_request),
            classifier: ModeClassifier::from_headers(&response.headers, &self.settings.mode_header),
            mode: None,
            progress: ProgressEstimator::new(self.settings.progress_table.clone()),
            text: String::new(),
            since_extract: 0,
            last_extract: Instant::now(),
        };

        let mut frames = pin!(frame_stream(response.body));
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return SessionOutcome::Cancelled,
                next = frames.next() => next,
            };
            match next {
                None | Some(Ok(Frame::Done)) => break,
                Some(Err(error)) => return self.fail(id, &error, observer),
                Some(Ok(Frame::Error(message))) => {
                    return self.fail(id, &GenerationError::Protocol(message), observer);
                }
                Some(Ok(Frame::Delta { text, mode })) => {
                    run.classifier.observe(mode);
                    if text.is_empty() {
                        continue;
                    }
                    if !self.apply_delta(&mut run, &text, observer) {
                        return SessionOutcome::Cancelled;
                    }
                }
            }
        }

        self.complete(run, observer)
    }

    /// Fold one content delta into the session. `false` when the session
    /// is no longer current.
    fn apply_delta<O: GenerationObserver>(
        &self,
        run: &mut SessionRun,
        delta: &str,
        observer: &mut O,
    ) -> bool {
        let mode = match run.mode {
            Some(mode) => mode,
            None => {
                let mode = run.classifier.decide();
                run.mode = Some(mode);
                tracing::debug!(session_id = run.id, ?mode, "response mode decided");
                mode
            }
        };
        run.text.push_str(delta);
        let step = run.progress.advance();
        let chunk_count = run.progress.chunk_count();

        let applied = match mode {
            ResponseMode::Artifact => {
                let preview = if self.cadence_due(run) {
                    self.extract_preview(run)
                } else {
                    None
                };
                self.update(run.id, |state| {
                    state.accumulated_text.push_str(delta);
                    state.chunk_count = chunk_count;
                    state.status_type = state.status_type.max(step.phase.into());
                    state.status_message = step.phase.status_message().to_owned();
                    state.progress = state.progress.max(step.percent);
                    if let Some(html) = preview.filter(|html| !html.is_empty()) {
                        state.last_extracted_document = html;
                    }
                    (state.status_type, state.progress)
                })
                .map(|(status, progress)| (status, step.phase.status_message(), progress))
            }
            ResponseMode::Conversation => {
                let reply = self
                    .cadence_due(run)
                    .then(|| strip_thinking(&run.text).trim().to_owned());
                self.update(run.id, |state| {
                    state.accumulated_text.push_str(delta);
                    state.chunk_count = chunk_count;
                    state.is_conversation = true;
                    state.status_type = StatusType::Conversation;
                    state.status_message = RESPONDING_MESSAGE.to_owned();
                    state.progress = state.progress.max(step.percent);
                    if let Some(reply) = reply {
                        state.conversation_response = reply;
                    }
                    state.progress
                })
                .map(|progress| (StatusType::Conversation, RESPONDING_MESSAGE, progress))
            }
        };

        let Some((status_type, status_message, progress)) = applied else {
            return false;
        };
        observer.on_chunk(&ChunkUpdate {
            session_id: run.id,
            delta,
            mode,
            status_type,
            status_message,
            progress,
            chunk_count,
        });
        true
    }

    /// Count one delta against the refresh cadence; `true` when the
    /// preview or reply should be recomputed now.
    fn cadence_due(&self, run: &mut SessionRun) -> bool {
        run.since_extract += 1;
        let due = run.since_extract >= self.settings.extract_every_chunks
            || run.last_extract.elapsed() >= self.settings.extract_interval;
        if due {
            run.since_extract = 0;
            run.last_extract = Instant::now();
        }
        due
    }

    fn extract_preview(&self, run: &SessionRun) -> Option<String> {
        let document = extract::extract(&run.text)?;
        tracing::debug!(
            session_id = run.id,
            chunk_count = run.progress.chunk_count(),
            bytes = document.html.len(),
            completeness = ?document.completeness,
            "preview extracted"
        );
        Some(document.html)
    }

    fn complete<O: GenerationObserver>(&self, run: SessionRun, observer: &mut O) -> SessionOutcome {
        let id = run.id;
        let Some(mode) = run.mode else {
            return self.fail(id, &GenerationError::EmptyResponse, observer);
        };

        let (content, completeness) = match mode {
            ResponseMode::Artifact => {
                let document = extract::finalize(&run.text);
                (document.html, Some(document.completeness))
            }
            ResponseMode::Conversation => (strip_thinking(&run.text).trim().to_owned(), None),
        };

        let usage = UsageReport::new(
            id,
            &run.model,
            mode,
            run.input_tokens,
            &content,
            run.started.elapsed(),
        );
        let applied = self.update(id, |state| {
            state.is_generating = false;
            state.is_complete = true;
            state.status_type = StatusType::Complete;
            state.progress = 100;
            state.error = None;
            state.outcome = Some(SessionOutcome::Completed);
            match mode {
                ResponseMode::Artifact => {
                    state.status_message = PAGE_READY_MESSAGE.to_owned();
                    state.last_extracted_document.clone_from(&content);
                }
                ResponseMode::Conversation => {
                    state.status_message = REPLY_READY_MESSAGE.to_owned();
                    state.conversation_response.clone_from(&content);
                }
            }
        });
        if applied.is_none() {
            return SessionOutcome::Cancelled;
        }

        observability::log_generation_complete(&usage);
        observer.on_complete(&GenerationResult {
            session_id: id,
            mode,
            content,
            completeness,
            usage,
        });
        SessionOutcome::Completed
    }
}
