//! Session registry: thread-safe create/lookup/close.
//!
//! Lookups are lock-free reads on a concurrent map; long-running work (close
//! drains, renewals) happens on the target session only, never while holding
//! registry state.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{LecternError, LecternResult};
use crate::matching::{SlideIndexRegistry, SlideMatcher};
use crate::metrics::MetricsCollector;
use crate::recognizer::{RecognizerClient, RecognizerConfig};
use crate::results::{ResultHandler, ResultSink};
use crate::state::Config;

use super::session::{Session, SessionConfig, SessionInfo, SessionSummary};
use super::SessionStatus;

/// Parameters for creating one session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    /// Caller-chosen id; generated when absent.
    pub session_id: Option<String>,
    /// Tag linking to the externally built slide deck.
    pub presentation_id: String,
    /// External lecture identifier carried through to the webhook.
    pub lecture_id: Option<i64>,
    /// Language override; falls back to the configured default.
    pub language: Option<String>,
    /// Model override; falls back to the configured default.
    pub model: Option<String>,
    pub interim_results: bool,
}

/// Registry of live sessions.
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    recognizer: Arc<dyn RecognizerClient>,
    indexes: Arc<SlideIndexRegistry>,
    metrics: Arc<MetricsCollector>,
    config: Config,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        recognizer: Arc<dyn RecognizerClient>,
        indexes: Arc<SlideIndexRegistry>,
        metrics: Arc<MetricsCollector>,
        config: Config,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            recognizer,
            indexes,
            metrics,
            config,
        }
    }

    /// Creates and registers a session. Fails if the id is already taken.
    pub fn create(
        &self,
        request: CreateSessionRequest,
        sink: Arc<dyn ResultSink>,
    ) -> LecternResult<Arc<Session>> {
        let session_id = request
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let language = request
            .language
            .unwrap_or_else(|| self.config.default_language.clone());
        let model = request
            .model
            .unwrap_or_else(|| self.config.default_model.clone());

        let matcher = self
            .indexes
            .get(&request.presentation_id)
            .map(|index| Arc::new(SlideMatcher::new(index, self.config.matching)));

        let handler = Arc::new(ResultHandler::new(
            session_id.clone(),
            request.presentation_id.clone(),
            matcher,
            sink,
        ));

        let mut recognizer_config =
            RecognizerConfig::new(language.clone(), model.clone(), request.interim_results);
        recognizer_config.credentials_path = self.config.credentials_path.clone();
        recognizer_config.project_id = self.config.project_id.clone();

        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(_) => Err(LecternError::SessionExists(session_id)),
            Entry::Vacant(entry) => {
                let session = Session::new(
                    session_id.clone(),
                    request.presentation_id.clone(),
                    SessionConfig {
                        language,
                        model,
                        interim_results: request.interim_results,
                        lecture_id: request.lecture_id,
                    },
                    recognizer_config,
                    Arc::clone(&self.recognizer),
                    handler,
                    Arc::clone(&self.metrics),
                    &self.config.audio,
                    self.config.close_grace,
                );
                entry.insert(Arc::clone(&session));
                self.metrics
                    .on_session_created(&session_id, &request.presentation_id);
                log::info!(
                    "[Manager] Session created: {} (presentation={})",
                    session_id,
                    request.presentation_id
                );
                Ok(session)
            }
        }
    }

    /// Looks up a session by id.
    pub fn get(&self, session_id: &str) -> LecternResult<Arc<Session>> {
        self.sessions
            .get(session_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| LecternError::SessionNotFound(session_id.to_string()))
    }

    /// Closes a session and removes it from the registry.
    pub async fn close(&self, session_id: &str) -> LecternResult<SessionSummary> {
        let session = self.get(session_id)?;
        let result = session.close().await;
        // A session leaves the registry once it reaches a terminal state,
        // even when the close itself reported an error.
        if session.status().is_terminal() {
            self.sessions.remove(session_id);
        }
        result
    }

    /// Drops a session that never became usable (failed start).
    pub fn discard(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            self.metrics.on_session_closed(session_id, 0.0);
            log::info!("[Manager] Session discarded: {}", session_id);
        }
    }

    /// All sessions currently in the Active state.
    #[must_use]
    pub fn list_active(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|r| r.value().status() == SessionStatus::Active)
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    /// Introspection rows for every registered session.
    #[must_use]
    pub fn list_info(&self) -> Vec<SessionInfo> {
        self.sessions.iter().map(|r| r.value().info()).collect()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Closes every remaining session (graceful shutdown).
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|r| r.key().clone()).collect();
        for session_id in ids {
            if let Err(e) = self.close(&session_id).await {
                log::warn!("[Manager] Failed to close {} on shutdown: {}", session_id, e);
                self.sessions.remove(&session_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::fake::ScriptedRecognizer;
    use crate::results::NoopSink;

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(ScriptedRecognizer::default()),
            Arc::new(SlideIndexRegistry::new()),
            Arc::new(MetricsCollector::new()),
            Config::default(),
        )
    }

    fn request(id: Option<&str>) -> CreateSessionRequest {
        CreateSessionRequest {
            session_id: id.map(str::to_string),
            presentation_id: "p1".into(),
            lecture_id: Some(1),
            language: None,
            model: None,
            interim_results: true,
        }
    }

    #[tokio::test]
    async fn create_registers_and_duplicate_fails() {
        let manager = manager();
        let session = manager.create(request(Some("s1")), Arc::new(NoopSink)).unwrap();
        assert_eq!(session.session_id(), "s1");
        assert_eq!(manager.count(), 1);

        let err = manager.create(request(Some("s1")), Arc::new(NoopSink)).unwrap_err();
        assert!(matches!(err, LecternError::SessionExists(_)));
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let manager = manager();
        let a = manager.create(request(None), Arc::new(NoopSink)).unwrap();
        let b = manager.create(request(None), Arc::new(NoopSink)).unwrap();
        assert_ne!(a.session_id(), b.session_id());
    }

    #[tokio::test]
    async fn get_unknown_session_fails() {
        let manager = manager();
        assert!(matches!(
            manager.get("missing").unwrap_err(),
            LecternError::SessionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn close_removes_from_registry() {
        let manager = manager();
        let session = manager.create(request(Some("s1")), Arc::new(NoopSink)).unwrap();
        session.start().await.unwrap();

        let summary = manager.close("s1").await.unwrap();
        assert_eq!(summary.session_id, "s1");
        assert_eq!(manager.count(), 0);
        assert!(manager.get("s1").is_err());
    }

    #[tokio::test]
    async fn list_active_excludes_initializing() {
        let manager = manager();
        let s1 = manager.create(request(Some("s1")), Arc::new(NoopSink)).unwrap();
        manager.create(request(Some("s2")), Arc::new(NoopSink)).unwrap();
        s1.start().await.unwrap();

        let active = manager.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id(), "s1");
        assert_eq!(manager.list_info().len(), 2);
    }

    #[tokio::test]
    async fn session_defaults_come_from_config() {
        let manager = manager();
        let session = manager.create(request(Some("s1")), Arc::new(NoopSink)).unwrap();
        assert_eq!(session.config().language, "ja-JP");
        assert_eq!(session.config().model, "latest_long");
    }

    #[tokio::test]
    async fn discard_removes_without_close() {
        let manager = manager();
        manager.create(request(Some("s1")), Arc::new(NoopSink)).unwrap();
        manager.discard("s1");
        assert_eq!(manager.count(), 0);
    }
}
