//! Session resolution and the current-session snapshot.
//!
//! The network half of each operation is a free async fn that runs off the
//! continuation boundary; its result is applied to [`SessionController`] by
//! the owner once it has re-checked the generation.

use session_backend::{
    BackendError, CreateSession, DatasetSummary, Message, Session, SessionBackend, SessionId,
    SessionSettings, SessionSummary,
};
use tracing::{debug, warn};

use crate::error::SessionResolutionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    Create(CreateSession),
    Resume(SessionId),
}

impl SessionRequest {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Resume(_) => "resume",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Created,
    Resumed,
}

/// Session state fetched for one entry, not yet installed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSession {
    pub session: Session,
    /// Persisted conversation, oldest first. Always empty for new sessions.
    pub history: Vec<Message>,
    pub origin: SessionOrigin,
}

/// Owns the current session and the last session listing.
#[derive(Debug, Default)]
pub struct SessionController {
    current: Option<Session>,
    cached: Vec<SessionSummary>,
    list_error: Option<String>,
}

impl SessionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<&SessionId> {
        self.current.as_ref().map(|session| &session.id)
    }

    /// Last successful listing; kept when a later listing fails.
    pub fn cached_sessions(&self) -> &[SessionSummary] {
        &self.cached
    }

    pub fn last_list_error(&self) -> Option<&str> {
        self.list_error.as_deref()
    }

    pub fn install(&mut self, session: Session) {
        debug!(session_id = %session.id, "session installed");
        self.current = Some(session);
    }

    pub fn clear(&mut self) -> Option<Session> {
        self.current.take()
    }

    /// Records a completed upload against the current session.
    pub fn bind_dataset(&mut self, dataset: DatasetSummary, documents: &[String]) {
        let Some(session) = self.current.as_mut() else {
            return;
        };
        for name in documents {
            if !session.documents.contains(name) {
                session.documents.push(name.clone());
            }
        }
        session.dataset = Some(dataset);
    }

    pub fn record_listing(&mut self, result: &Result<Vec<SessionSummary>, BackendError>) {
        match result {
            Ok(sessions) => {
                self.cached = sessions.clone();
                self.list_error = None;
            }
            Err(error) => {
                warn!(%error, "session listing failed; keeping cached list");
                self.list_error = Some(error.to_string());
            }
        }
    }

    /// Replaces the current snapshot when it still refers to the same session.
    pub fn apply_settings(&mut self, session: Session) -> bool {
        match self.current.as_mut() {
            Some(current) if current.id == session.id => {
                *current = session;
                true
            }
            _ => false,
        }
    }
}

/// Creates a new session. Never retried.
pub async fn create_session(
    backend: &dyn SessionBackend,
    request: &CreateSession,
) -> Result<Session, SessionResolutionError> {
    backend
        .create_session(request)
        .await
        .map_err(SessionResolutionError::Creation)
}

/// Fetches session state by id, then its persisted history. A failed history
/// fetch is treated as empty history.
pub async fn resume_session(
    backend: &dyn SessionBackend,
    session_id: &SessionId,
) -> Result<ResolvedSession, SessionResolutionError> {
    let session = backend
        .fetch_session(session_id)
        .await
        .map_err(|error| SessionResolutionError::resume(session_id.clone(), error))?;

    let history = match backend.fetch_history(session_id).await {
        Ok(history) => history,
        Err(error) => {
            warn!(%session_id, %error, "history fetch failed; continuing with empty history");
            Vec::new()
        }
    };

    Ok(ResolvedSession {
        session,
        history,
        origin: SessionOrigin::Resumed,
    })
}

pub async fn resolve(
    backend: &dyn SessionBackend,
    request: SessionRequest,
) -> Result<ResolvedSession, SessionResolutionError> {
    match request {
        SessionRequest::Create(create) => {
            let session = create_session(backend, &create).await?;
            Ok(ResolvedSession {
                session,
                history: Vec::new(),
                origin: SessionOrigin::Created,
            })
        }
        SessionRequest::Resume(session_id) => resume_session(backend, &session_id).await,
    }
}

pub async fn list_sessions(
    backend: &dyn SessionBackend,
    owner_id: &str,
) -> Result<Vec<SessionSummary>, BackendError> {
    backend.list_sessions(owner_id).await
}

/// Validates locally before any network call.
pub async fn update_settings(
    backend: &dyn SessionBackend,
    session_id: &SessionId,
    settings: &SessionSettings,
) -> Result<Session, BackendError> {
    settings.validate()?;
    backend.update_settings(session_id, settings).await
}
