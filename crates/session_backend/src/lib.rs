//! Provider-neutral contract for a session-scoped conversation backend.
//!
//! This crate defines the shared domain types (sessions, messages, inbound
//! envelopes, connection states) and the collaborator traits consumed by the
//! sync core. It contains no transport details and performs no I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

/// Opaque server-assigned session identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Relative weighting of the retrieval strategies used for a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalWeights {
    pub semantic: f64,
    pub keyword: f64,
    pub knowledge_graph: f64,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            semantic: 0.4,
            keyword: 0.3,
            knowledge_graph: 0.3,
        }
    }
}

impl RetrievalWeights {
    /// Tolerance applied when checking that the weights sum to one.
    pub const SUM_TOLERANCE: f64 = 0.001;

    #[must_use]
    pub fn sum(&self) -> f64 {
        self.semantic + self.keyword + self.knowledge_graph
    }
}

/// Per-session generation and retrieval configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub weights: RetrievalWeights,
    pub temperature: f64,
    pub max_context_length: u32,
    pub similarity_threshold: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            weights: RetrievalWeights::default(),
            temperature: 0.85,
            max_context_length: 2000,
            similarity_threshold: 0.4,
        }
    }
}

impl SessionSettings {
    /// Checks the settings locally before they are sent to a backend.
    pub fn validate(&self) -> Result<(), BackendError> {
        let weights = [
            ("semantic", self.weights.semantic),
            ("keyword", self.weights.keyword),
            ("knowledge_graph", self.weights.knowledge_graph),
        ];
        for (name, value) in weights {
            if !(0.0..=1.0).contains(&value) {
                return Err(BackendError::invalid_settings(format!(
                    "{name} weight must be within [0, 1], got {value}"
                )));
            }
        }
        if (self.weights.sum() - 1.0).abs() > RetrievalWeights::SUM_TOLERANCE {
            return Err(BackendError::invalid_settings(format!(
                "weights must sum to 1.0, got {:.3}",
                self.weights.sum()
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(BackendError::invalid_settings(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if self.max_context_length == 0 {
            return Err(BackendError::invalid_settings(
                "max_context_length must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(BackendError::invalid_settings(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// Summary statistics of a dataset bound to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSummary {
    pub name: String,
    pub path: String,
    pub rows: u64,
    pub columns: u64,
    pub column_names: Vec<String>,
    pub missing_values: Option<BTreeMap<String, u64>>,
}

impl DatasetSummary {
    /// Empty dataset attached to the onboarding upload prompt.
    #[must_use]
    pub fn placeholder() -> Self {
        Self::default()
    }

    /// True when no storage path is bound.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.path.trim().is_empty()
    }
}

/// Full session state as returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub owner_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub documents: Vec<String>,
    pub dataset: Option<DatasetSummary>,
    pub settings: SessionSettings,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
}

impl Session {
    /// Returns the bound dataset unless it is only a placeholder.
    #[must_use]
    pub fn bound_dataset(&self) -> Option<&DatasetSummary> {
        self.dataset
            .as_ref()
            .filter(|dataset| !dataset.is_placeholder())
    }
}

/// Lightweight listing entry used for history navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub description: Option<String>,
    pub updated_at: Option<OffsetDateTime>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
            description: session.description.clone(),
            updated_at: session.updated_at,
        }
    }
}

/// Input for the session-creation collaborator.
#[derive(Clone, PartialEq, Eq)]
pub struct CreateSession {
    pub owner_id: String,
    /// Credential forwarded to the downstream agent pipeline.
    pub api_key: String,
    pub title: String,
    pub description: Option<String>,
}

impl fmt::Debug for CreateSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateSession")
            .field("owner_id", &self.owner_id)
            .field("api_key", &"<redacted>")
            .field("title", &self.title)
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Retrieved document reference backing an answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub title: String,
    pub score: f64,
}

/// Closed set of message shapes. Every consumer matches exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text,
    Answer { sources: Vec<Source> },
    Dataset { dataset: DatasetSummary },
    /// Cue for the UI to render an inline upload affordance.
    UploadPrompt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: OffsetDateTime,
}

impl Message {
    #[must_use]
    pub fn new(
        role: Role,
        content: impl Into<String>,
        kind: MessageKind,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            role,
            content: content.into(),
            kind,
            timestamp,
        }
    }

    #[must_use]
    pub fn user_text(content: impl Into<String>, timestamp: OffsetDateTime) -> Self {
        Self::new(Role::User, content, MessageKind::Text, timestamp)
    }

    #[must_use]
    pub fn assistant_text(content: impl Into<String>, timestamp: OffsetDateTime) -> Self {
        Self::new(Role::Assistant, content, MessageKind::Text, timestamp)
    }

    #[must_use]
    pub fn dataset(
        content: impl Into<String>,
        dataset: DatasetSummary,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self::new(
            Role::Assistant,
            content,
            MessageKind::Dataset { dataset },
            timestamp,
        )
    }

    pub fn sources(&self) -> &[Source] {
        match &self.kind {
            MessageKind::Answer { sources } => sources,
            MessageKind::Text | MessageKind::Dataset { .. } | MessageKind::UploadPrompt => &[],
        }
    }

    pub fn dataset_summary(&self) -> Option<&DatasetSummary> {
        match &self.kind {
            MessageKind::Dataset { dataset } => Some(dataset),
            MessageKind::Text | MessageKind::Answer { .. } | MessageKind::UploadPrompt => None,
        }
    }
}

/// One parsed unit of data received over the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Message(Message),
    /// Drives loading indicators.
    Status { busy: bool },
    /// Non-terminal server-reported error.
    Error { description: String },
    /// Idle keep-alive traffic. Never delivered to message observers.
    KeepAlive,
}

/// Frame written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    UserMessage { content: String },
    KeepAlive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    ReconnectPending,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::ReconnectPending => "reconnect-pending",
            Self::Failed => "failed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// No connection exists and none is scheduled.
    pub fn is_quiescent(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint and credential a transport connects to.
#[derive(Clone, PartialEq, Eq)]
pub struct TransportTarget {
    pub endpoint: String,
    pub session_id: SessionId,
    /// Bearer credential, carried as a query parameter on the socket URL.
    pub credential: String,
}

impl fmt::Debug for TransportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportTarget")
            .field("endpoint", &self.endpoint)
            .field("session_id", &self.session_id)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// In-memory file queued for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime: Option<String>,
    pub content: Arc<[u8]>,
}

impl UploadFile {
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            mime: None,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Byte-level upload progress callback: `(sent, total)`.
pub type UploadProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("session {0} was not found")]
    NotFound(SessionId),

    #[error("request was not authorized: {0}")]
    Unauthorized(String),

    #[error("request was rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("backend transport failure: {0}")]
    Transport(String),

    #[error("failed to decode backend response: {0}")]
    Decode(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

impl BackendError {
    #[must_use]
    pub fn invalid_settings(reason: impl Into<String>) -> Self {
        Self::InvalidSettings(reason.into())
    }

    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }
}

/// Connection-level failure. Recovered by the reconnect policy until the
/// attempt ceiling is reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("reconnect attempts exhausted after {attempts} consecutive failures")]
    Exhausted { attempts: u32 },

    #[error("transport is already active")]
    AlreadyActive,
}

/// Malformed or unrecognized inbound frame. Only the single frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unrecognized frame kind '{0}'")]
    UnknownKind(String),

    #[error("frame kind '{kind}' is missing field '{field}'")]
    MissingField { kind: String, field: &'static str },
}

/// Result of reading one frame from an open connection.
pub type InboundFrame = Result<Envelope, ProtocolError>;

/// Request/response collaborator for session state.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn create_session(&self, request: &CreateSession) -> Result<Session, BackendError>;

    async fn fetch_session(&self, session_id: &SessionId) -> Result<Session, BackendError>;

    /// Ordered newest first.
    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<SessionSummary>, BackendError>;

    /// Persisted conversation, oldest first. Empty when none exists.
    async fn fetch_history(&self, session_id: &SessionId) -> Result<Vec<Message>, BackendError>;

    async fn upload(
        &self,
        session_id: &SessionId,
        files: &[UploadFile],
        progress: UploadProgress,
    ) -> Result<DatasetSummary, BackendError>;

    async fn update_settings(
        &self,
        session_id: &SessionId,
        settings: &SessionSettings,
    ) -> Result<Session, BackendError>;
}

/// Factory for bidirectional session-scoped connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &TransportTarget) -> Result<Box<dyn Connection>, TransportError>;
}

/// One established connection.
///
/// `recv` must be cancel-safe: the transport races it against keep-alive
/// ticks and outbound frames.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: &OutboundFrame) -> Result<(), TransportError>;

    /// `None` once the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>>;

    async fn close(&mut self);
}
