//! Session-scoped sync state machine.
//!
//! [`SyncApp`] never performs I/O. It asks a [`SyncHost`] to start work and is
//! later fed the results as continuations tagged with the generation (session
//! entries) or epoch (uploads) they were started under. Continuations carrying
//! an outdated tag are dropped.

use std::time::Duration;

use message_log::{reconcile_history, LogEntry, MessageLog, DEFAULT_BUCKET_WIDTH};
use session_backend::{
    BackendError, ConnectionState, DatasetSummary, Envelope, Message, OutboundFrame, Session,
    SessionId, SessionSummary, TransportError, UploadFile,
};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::controller::{ResolvedSession, SessionController, SessionOrigin, SessionRequest};
use crate::error::{SessionResolutionError, UploadError};
use crate::transport::TransportEvent;
use crate::upload::{SubmitOutcome, UploadCoordinator, UploadOutcome, UploadState, UploadTicket};

pub type Generation = u64;

const NOT_CONNECTED_ERROR: &str = "Not connected; message was not sent";

/// Reactive view handed to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub session: Option<Session>,
    pub messages: Vec<LogEntry>,
    pub connection: ConnectionState,
    pub connection_open: bool,
    pub busy: bool,
    pub last_error: Option<String>,
    pub upload_pending: Vec<String>,
    pub upload_progress: u8,
    pub upload_state: UploadState,
    /// Set when the last session entry failed; the UI returns to a session-less view.
    pub redirect_to_lobby: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            session: None,
            messages: Vec::new(),
            connection: ConnectionState::Idle,
            connection_open: false,
            busy: false,
            last_error: None,
            upload_pending: Vec::new(),
            upload_progress: 0,
            upload_state: UploadState::Idle,
            redirect_to_lobby: false,
        }
    }
}

impl Snapshot {
    pub fn contents(&self) -> Vec<&str> {
        self.messages
            .iter()
            .map(|entry| entry.message.content.as_str())
            .collect()
    }
}

/// Side effects requested by [`SyncApp`].
pub trait SyncHost {
    /// Begin a clean transport shutdown; answered by [`SyncApp::on_transport_closed`].
    fn close_transport(&mut self);
    /// Answered by [`SyncApp::on_session_resolved`].
    fn resolve_session(&mut self, generation: Generation, request: SessionRequest);
    fn open_transport(
        &mut self,
        generation: Generation,
        session_id: &SessionId,
    ) -> Result<(), TransportError>;
    fn send_frame(&mut self, frame: OutboundFrame) -> bool;
    fn connection_state(&self) -> ConnectionState;
    /// Answered by [`SyncApp::on_upload_progress`] and [`SyncApp::on_upload_finished`].
    fn start_upload(&mut self, session_id: SessionId, ticket: UploadTicket);
    /// Stop forwarding progress of the in-flight upload, if any.
    fn detach_upload(&mut self);
    fn publish(&mut self, snapshot: Snapshot);
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Detached,
    /// Waiting for the previous connection to reach `idle`.
    Closing { next: Option<SessionRequest> },
    Resolving,
    Active,
}

#[derive(Debug)]
pub struct SyncApp {
    generation: Generation,
    phase: Phase,
    controller: SessionController,
    log: MessageLog,
    uploads: UploadCoordinator,
    connection: ConnectionState,
    busy: bool,
    last_error: Option<String>,
    redirect_to_lobby: bool,
}

impl Default for SyncApp {
    fn default() -> Self {
        Self::new(UploadCoordinator::default(), DEFAULT_BUCKET_WIDTH)
    }
}

impl SyncApp {
    pub fn new(uploads: UploadCoordinator, dedup_bucket: Duration) -> Self {
        Self {
            generation: 0,
            phase: Phase::Detached,
            controller: SessionController::new(),
            log: MessageLog::new(None).with_bucket_width(dedup_bucket),
            uploads,
            connection: ConnectionState::Idle,
            busy: false,
            last_error: None,
            redirect_to_lobby: false,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn session(&self) -> Option<&Session> {
        self.controller.current()
    }

    pub fn current_session_id(&self) -> Option<&SessionId> {
        match self.phase {
            Phase::Active => self.controller.current_id(),
            Phase::Detached | Phase::Closing { .. } | Phase::Resolving => None,
        }
    }

    pub fn cached_sessions(&self) -> &[SessionSummary] {
        self.controller.cached_sessions()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.uploads
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            session: self.controller.current().cloned(),
            messages: self.log.entries().to_vec(),
            connection: self.connection,
            connection_open: self.connection.is_open(),
            busy: self.busy,
            last_error: self.last_error.clone(),
            upload_pending: self.uploads.pending_names(),
            upload_progress: self.uploads.progress_percent(),
            upload_state: self.uploads.state(),
            redirect_to_lobby: self.redirect_to_lobby,
        }
    }

    /// Navigates to a session (`None` leaves the current one).
    ///
    /// Bumps the generation, detaches any upload and closes the transport.
    /// The new session is resolved only once the old connection is `idle`.
    /// Pending upload files are kept only when the same session is entered
    /// again.
    pub fn enter_session(&mut self, request: Option<SessionRequest>, host: &mut dyn SyncHost) {
        self.generation += 1;
        info!(
            generation = self.generation,
            request = request.as_ref().map_or("leave", SessionRequest::label),
            "entering session"
        );

        let same_session = matches!(
            &request,
            Some(SessionRequest::Resume(id)) if self.controller.current_id() == Some(id)
        );
        if same_session {
            self.uploads.detach();
        } else {
            self.uploads.teardown();
        }
        host.detach_upload();
        self.busy = false;
        self.last_error = None;
        self.redirect_to_lobby = false;

        if let Phase::Closing { next } = &mut self.phase {
            *next = request;
        } else if host.connection_state().is_quiescent() {
            self.start_resolution(request, host);
        } else {
            self.phase = Phase::Closing { next: request };
            host.close_transport();
        }
        host.publish(self.snapshot());
    }

    pub fn on_transport_closed(&mut self, host: &mut dyn SyncHost) {
        let Phase::Closing { next } = &mut self.phase else {
            debug!("transport closed outside a session switch");
            return;
        };
        let next = next.take();
        self.connection = host.connection_state();
        self.start_resolution(next, host);
        host.publish(self.snapshot());
    }

    fn start_resolution(&mut self, request: Option<SessionRequest>, host: &mut dyn SyncHost) {
        self.controller.clear();
        if let Err(error) = self.log.reset(None, host.connection_state()) {
            error!(%error, "message log reset refused");
        }

        match request {
            Some(request) => {
                self.phase = Phase::Resolving;
                host.resolve_session(self.generation, request);
            }
            None => self.phase = Phase::Detached,
        }
    }

    /// Seeds the log and opens the transport for the resolved session.
    pub fn on_session_resolved(
        &mut self,
        generation: Generation,
        result: Result<ResolvedSession, SessionResolutionError>,
        now: OffsetDateTime,
        host: &mut dyn SyncHost,
    ) {
        if generation != self.generation || self.phase != Phase::Resolving {
            debug!(generation, current = self.generation, "discarding stale session resolution");
            return;
        }

        let resolved = match result {
            Ok(resolved) => resolved,
            Err(error) => {
                warn!(%error, "session resolution failed");
                self.phase = Phase::Detached;
                self.redirect_to_lobby = true;
                self.last_error = Some(error.to_string());
                host.publish(self.snapshot());
                return;
            }
        };

        let ResolvedSession {
            session,
            history,
            origin,
        } = resolved;
        let seed = match origin {
            SessionOrigin::Created => Vec::new(),
            SessionOrigin::Resumed => {
                let seed = reconcile_history(history, session.bound_dataset(), now);
                debug!(session_id = %session.id, seed = seed.label(), "history reconciled");
                seed.into_messages()
            }
        };

        let session_id = session.id.clone();
        let seeded = self
            .log
            .reset(Some(session_id.clone()), host.connection_state())
            .and_then(|()| self.log.seed(seed));
        if let Err(error) = seeded {
            error!(%error, "message log could not be seeded");
            self.phase = Phase::Detached;
            self.last_error = Some(error.to_string());
            host.publish(self.snapshot());
            return;
        }
        self.controller.install(session);
        self.phase = Phase::Active;

        if let Err(error) = host.open_transport(self.generation, &session_id) {
            warn!(%error, "transport open refused");
            self.last_error = Some(error.to_string());
        }
        self.connection = host.connection_state();
        host.publish(self.snapshot());
    }

    /// Connection state is global; envelopes and failures only count for the
    /// generation whose transport produced them.
    pub fn on_transport_event(
        &mut self,
        generation: Generation,
        event: TransportEvent,
        host: &mut dyn SyncHost,
    ) {
        match event {
            TransportEvent::StateChanged(state) => {
                self.connection = state;
                if !state.is_open() {
                    self.busy = false;
                }
            }
            TransportEvent::Envelope(envelope) => {
                if !self.accepts(generation) {
                    debug!(generation, "discarding envelope from stale transport");
                    return;
                }
                self.ingest(envelope);
            }
            TransportEvent::Failed(error) => {
                if !self.accepts(generation) {
                    return;
                }
                self.last_error = Some(error.to_string());
            }
        }
        host.publish(self.snapshot());
    }

    fn accepts(&self, generation: Generation) -> bool {
        generation == self.generation && self.phase == Phase::Active
    }

    fn ingest(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Message(message) => {
                self.log.append(message);
            }
            Envelope::Status { busy } => self.busy = busy,
            Envelope::Error { description } => {
                warn!(%description, "server reported an error");
                self.last_error = Some(description);
            }
            Envelope::KeepAlive => {}
        }
    }

    /// Sends and optimistically appends. Nothing is appended when the
    /// transport is not open.
    pub fn send_user_message(&mut self, text: &str, now: OffsetDateTime, host: &mut dyn SyncHost) {
        let content = text.trim();
        if content.is_empty() {
            return;
        }

        let sent = self.phase == Phase::Active
            && host.send_frame(OutboundFrame::UserMessage {
                content: content.to_string(),
            });
        if sent {
            self.log.append(Message::user_text(content, now));
            self.last_error = None;
        } else {
            self.last_error = Some(NOT_CONNECTED_ERROR.to_string());
        }
        host.publish(self.snapshot());
    }

    pub fn submit_files(&mut self, files: Vec<UploadFile>, host: &mut dyn SyncHost) -> SubmitOutcome {
        let outcome = self.uploads.submit(files);
        host.publish(self.snapshot());
        outcome
    }

    pub fn remove_file(&mut self, index: usize, host: &mut dyn SyncHost) -> Option<UploadFile> {
        let removed = self.uploads.remove(index);
        if removed.is_some() {
            host.publish(self.snapshot());
        }
        removed
    }

    pub fn start_upload(&mut self, host: &mut dyn SyncHost) -> Result<(), UploadError> {
        let session_id = self.current_session_id().cloned();
        let ticket = match self.uploads.begin(session_id.as_ref()) {
            Ok(ticket) => ticket,
            Err(error) => {
                self.last_error = Some(error.to_string());
                host.publish(self.snapshot());
                return Err(error);
            }
        };

        if let Some(session_id) = session_id {
            host.start_upload(session_id, ticket);
        }
        self.last_error = None;
        host.publish(self.snapshot());
        Ok(())
    }

    pub fn on_upload_progress(&mut self, epoch: u64, sent: u64, total: u64, host: &mut dyn SyncHost) {
        if self.uploads.record_progress(epoch, sent, total) {
            host.publish(self.snapshot());
        }
    }

    /// Commits the dataset binding and appends the synthetic burst, or keeps
    /// the queue and reports the error.
    pub fn on_upload_finished(
        &mut self,
        epoch: u64,
        result: Result<DatasetSummary, BackendError>,
        now: OffsetDateTime,
        host: &mut dyn SyncHost,
    ) {
        let Some(outcome) = self.uploads.finish(epoch, result, now) else {
            return;
        };

        match outcome {
            UploadOutcome::Succeeded {
                dataset,
                files,
                messages,
            } => {
                self.controller.bind_dataset(dataset, &files);
                // Every burst lands, even when an earlier upload produced the
                // same text within one dedup bucket.
                for message in messages {
                    self.log.append_distinct(message);
                }
            }
            UploadOutcome::Failed(error) => {
                self.last_error = Some(error.to_string());
            }
        }
        host.publish(self.snapshot());
    }

    pub fn on_sessions_listed(&mut self, result: &Result<Vec<SessionSummary>, BackendError>) {
        self.controller.record_listing(result);
    }

    /// Installs an updated session unless the user has navigated away since.
    pub fn on_settings_updated(&mut self, generation: Generation, session: Session, host: &mut dyn SyncHost) {
        if !self.accepts(generation) {
            debug!(generation, "discarding stale settings update");
            return;
        }
        if self.controller.apply_settings(session) {
            host.publish(self.snapshot());
        }
    }
}
