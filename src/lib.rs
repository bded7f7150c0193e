//! Real-time sync core for session-scoped conversations.
//!
//! Invariant: one task owns all session state. Network work runs elsewhere
//! and re-enters only as continuations tagged with the generation or upload
//! epoch that started it.
//!
//! # Public API Overview
//! - Drive a session from a UI via [`SyncHandle`], obtained from
//!   [`SyncRuntime::spawn`] or [`SyncRuntime::spawn_http`].
//! - Observe state through [`Snapshot`] values published on a watch channel.
//! - Embed the state machine directly with [`SyncApp`] and a custom [`SyncHost`].
//! - Use [`TransportClient`] on its own for a reconnecting session socket.

pub mod app;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod transport;
pub mod upload;

pub use crate::app::{Generation, Snapshot, SyncApp, SyncHost};
pub use crate::config::{SyncConfig, TransportConfig};
pub use crate::controller::{
    ResolvedSession, SessionController, SessionOrigin, SessionRequest,
};
pub use crate::error::{SessionResolutionError, SyncError, UploadError};
pub use crate::logging::init_tracing;
pub use crate::runtime::{SyncHandle, SyncRuntime};
pub use crate::transport::{backoff_delay, PendingClose, TransportClient, TransportEvent};
pub use crate::upload::{
    synthetic_burst, SubmitOutcome, UploadCoordinator, UploadOutcome, UploadState, UploadTicket,
    FOLLOW_UP_MESSAGE,
};

/// Domain types shared with backends.
pub use message_log::{AppendOutcome, LogEntry, MessageLog};
pub use session_backend::{
    ConnectionState, CreateSession, DatasetSummary, Envelope, Message, MessageKind, Role, Session,
    SessionId, SessionSettings, SessionSummary, UploadFile,
};
