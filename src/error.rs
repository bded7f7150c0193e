use session_backend::{BackendError, SessionId};
use thiserror::Error;

/// Creation or resume failure. Fatal to the navigation attempt: no partial
/// session state is kept.
#[derive(Debug, Error)]
pub enum SessionResolutionError {
    #[error("failed to create session: {0}")]
    Creation(#[source] BackendError),

    #[error("failed to resume session {session_id}: {source}")]
    Resume {
        session_id: SessionId,
        #[source]
        source: BackendError,
    },
}

impl SessionResolutionError {
    #[must_use]
    pub fn resume(session_id: SessionId, source: BackendError) -> Self {
        Self::Resume { session_id, source }
    }
}

/// Per-submission upload failure. The pending queue is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("no active session to upload into")]
    NoSession,

    #[error("no files are queued for upload")]
    EmptyQueue,

    #[error("an upload is already in flight")]
    InFlight,

    #[error("upload failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync runtime has shut down")]
    Shutdown,

    #[error("no active session")]
    NoSession,

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
