use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::collab::{ArtifactStore, LoggingArtifactStore, LoggingUsageLedger, UsageLedger};
use crate::config::AppConfig;
use crate::session::{SessionController, SessionSettings};
use crate::transport::HttpBackend;

const CHAT_SESSION_REGISTRY_MAX_ENTRIES: usize = 1024;

/// Controller type used by the host: one per chat, sharing one backend.
pub type ChatController = SessionController<Arc<HttpBackend>>;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    backend: Arc<HttpBackend>,
    settings: SessionSettings,
    sessions: RwLock<FxHashMap<String, Arc<ChatController>>>,
    store: Arc<dyn ArtifactStore>,
    ledger: Arc<dyn UsageLedger>,
}

impl AppState {
    /// State with collaborators that only log.
    #[must_use]
    pub fn new(config: AppConfig, backend: HttpBackend) -> Self {
        Self::with_collaborators(
            config,
            backend,
            Arc::new(LoggingArtifactStore),
            Arc::new(LoggingUsageLedger),
        )
    }

    #[must_use]
    pub fn with_collaborators(
        config: AppConfig,
        backend: HttpBackend,
        store: Arc<dyn ArtifactStore>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        let settings = SessionSettings::from_config(&config);
        Self {
            config,
            backend: Arc::new(backend),
            settings,
            sessions: RwLock::new(FxHashMap::default()),
            store,
            ledger,
        }
    }

    /// The controller of `chat_id`, created on first use.
    pub fn controller(&self, chat_id: &str) -> Arc<ChatController> {
        if let Some(existing) = self.sessions.read().get(chat_id) {
            return existing.clone();
        }

        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(chat_id) {
            return existing.clone();
        }
        if sessions.len() >= CHAT_SESSION_REGISTRY_MAX_ENTRIES {
            sessions.retain(|_, controller| {
                controller.is_generating() || Arc::strong_count(controller) > 1
            });
            tracing::debug!(retained = sessions.len(), "pruned idle chat sessions");
        }
        let controller = Arc::new(SessionController::new(
            Arc::clone(&self.backend),
            self.settings.clone(),
        ));
        sessions.insert(chat_id.to_owned(), controller.clone());
        controller
    }

    /// The controller of `chat_id` if one was ever created.
    #[must_use]
    pub fn existing_controller(&self, chat_id: &str) -> Option<Arc<ChatController>> {
        self.sessions.read().get(chat_id).cloned()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn store(&self) -> &dyn ArtifactStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn ledger(&self) -> &dyn UsageLedger {
        self.ledger.as_ref()
    }
}
