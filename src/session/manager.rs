//! # Session Registry
//!
//! Tracks the live sessions of the server, one per WebSocket connection.
//!
//! ## Resource Management:
//! - Enforces the maximum number of concurrent sessions
//! - Removing a session always disposes it (recognizer and storage)
//! - `close_all` disposes every session on shutdown

use crate::error::{SessionError, SessionResult};
use crate::session::controller::{SessionController, SessionInfo};
use crate::session::SessionServices;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

pub struct SessionRegistry {
    /// Live sessions mapped by connection id
    sessions: RwLock<HashMap<String, Arc<SessionController>>>,

    max_concurrent_sessions: usize,

    services: SessionServices,
}

/// Summary of the registry for the HTTP API.
#[derive(Debug, Serialize)]
pub struct RegistrySummary {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub state_counts: HashMap<String, usize>,
    pub sessions: Vec<SessionInfo>,
}

impl SessionRegistry {
    pub fn new(max_concurrent_sessions: usize, services: SessionServices) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
            services,
        }
    }

    /// Create a session for a new connection.
    ///
    /// ## Parameters:
    /// - **session_id**: connection id to register under; generated if None
    ///
    /// ## Returns:
    /// - **Ok(controller)**: the new, uninitialized session
    /// - **Err(SessionError::Capacity)**: the limit is reached
    /// - **Err(SessionError::State)**: the id is already registered
    pub fn create_session(&self, session_id: Option<String>) -> SessionResult<Arc<SessionController>> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(SessionError::Capacity(format!(
                "maximum concurrent sessions ({}) reached",
                self.max_concurrent_sessions
            )));
        }

        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if sessions.contains_key(&session_id) {
            return Err(SessionError::State(format!(
                "session id '{}' already exists",
                session_id
            )));
        }

        let controller = Arc::new(SessionController::new(session_id.clone(), self.services.clone()));
        sessions.insert(session_id.clone(), controller.clone());

        info!(session_id = %session_id, active = sessions.len(), "Session created");
        Ok(controller)
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<SessionController>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(session_id).cloned()
    }

    /// Remove a session and dispose it. Returns false if it was not registered.
    pub async fn close_session(&self, session_id: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            sessions.remove(session_id)
        };

        match removed {
            Some(controller) => {
                controller.dispose().await;
                info!(session_id = %session_id, "Session closed");
                true
            }
            None => {
                warn!(session_id = %session_id, "Tried to close unknown session");
                false
            }
        }
    }

    /// Dispose every session.
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            sessions.drain().map(|(_, controller)| controller).collect()
        };

        if !drained.is_empty() {
            info!(count = drained.len(), "Closing all sessions");
        }
        for controller in drained {
            controller.dispose().await;
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_concurrent_sessions
    }

    pub fn get_active_session_ids(&self) -> Vec<String> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.keys().cloned().collect()
    }

    pub async fn get_sessions_summary(&self) -> RegistrySummary {
        let controllers: Vec<_> = {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            sessions.values().cloned().collect()
        };

        let mut state_counts = HashMap::new();
        let mut infos = Vec::with_capacity(controllers.len());
        for controller in controllers {
            let info = controller.info().await;
            *state_counts.entry(info.state.as_str().to_string()).or_insert(0) += 1;
            infos.push(info);
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        RegistrySummary {
            total_sessions: infos.len(),
            max_sessions: self.max_concurrent_sessions,
            state_counts,
            sessions: infos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::controller::tests::{MockCompletion, MockResume};
    use crate::session::controller::SessionState;
    use crate::session::settings::tests::sample_settings;
    use crate::speech::tests::MockSpeechEngine;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn registry(limit: usize) -> (SessionRegistry, Arc<MockSpeechEngine>, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let speech = Arc::new(MockSpeechEngine::default());
        let services = SessionServices {
            resume: Arc::new(MockResume::default()),
            completion: Arc::new(MockCompletion::default()),
            speech: speech.clone(),
            synthesis_timeout: Duration::from_secs(5),
            storage_root: root.path().to_path_buf(),
        };
        (SessionRegistry::new(limit, services), speech, root)
    }

    #[test]
    fn test_session_limit() {
        let (registry, _, _root) = registry(2);

        registry.create_session(Some("a".to_string())).unwrap();
        registry.create_session(None).unwrap();
        let err = registry.create_session(Some("c".to_string())).unwrap_err();

        assert_eq!(err.kind(), "capacity_error");
        assert_eq!(registry.active_session_count(), 2);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (registry, _, _root) = registry(4);
        registry.create_session(Some("a".to_string())).unwrap();
        assert!(registry.create_session(Some("a".to_string())).is_err());
        assert_eq!(registry.get_active_session_ids(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let (registry, _, _root) = registry(4);
        let a = registry.create_session(Some("a".to_string())).unwrap();
        let b = registry.create_session(Some("b".to_string())).unwrap();

        a.initialize(sample_settings()).await.unwrap();
        a.handle_question("Question 1").await.unwrap();

        assert_eq!(a.info().await.turns, 3);
        assert_eq!(b.info().await.turns, 0);
        assert_eq!(b.state(), SessionState::Uninitialized);
        assert_ne!(a.storage().dir(), b.storage().dir());
    }

    #[tokio::test]
    async fn test_close_session_disposes() {
        let (registry, speech, _root) = registry(4);
        let session = registry.create_session(Some("a".to_string())).unwrap();
        session.initialize(sample_settings()).await.unwrap();

        assert!(registry.close_session("a").await);
        assert!(!registry.close_session("a").await);

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(speech.released.load(Ordering::SeqCst), 1);
        assert!(registry.get_session("a").is_none());

        // Freed capacity can be reused
        registry.create_session(Some("a".to_string())).unwrap();
    }

    #[tokio::test]
    async fn test_summary_and_close_all() {
        let (registry, _, _root) = registry(4);
        let a = registry.create_session(Some("a".to_string())).unwrap();
        let b = registry.create_session(Some("b".to_string())).unwrap();
        a.initialize(sample_settings()).await.unwrap();

        let summary = registry.get_sessions_summary().await;
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.max_sessions, 4);
        assert_eq!(summary.state_counts.get("ready"), Some(&1));
        assert_eq!(summary.state_counts.get("uninitialized"), Some(&1));

        registry.close_all().await;
        assert_eq!(registry.active_session_count(), 0);
        assert_eq!(a.state(), SessionState::Closed);
        assert_eq!(b.state(), SessionState::Closed);
    }
}
