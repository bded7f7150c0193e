#![allow(dead_code)]

use session_backend::{
    ConnectionState, DatasetSummary, Message, OutboundFrame, Session, SessionId, SessionSettings,
    TransportError, UploadFile,
};
use session_sync::{
    Generation, ResolvedSession, SessionOrigin, SessionRequest, SessionResolutionError, Snapshot,
    SyncApp, SyncHost, TransportEvent, UploadTicket,
};
use time::macros::datetime;
use time::OffsetDateTime;

#[derive(Default)]
pub struct HostStub {
    pub state: Option<ConnectionState>,
    pub close_requests: usize,
    pub resolutions: Vec<(Generation, SessionRequest)>,
    pub opened: Vec<(Generation, SessionId)>,
    pub frames: Vec<OutboundFrame>,
    pub uploads: Vec<(SessionId, UploadTicket)>,
    pub detached_uploads: usize,
    pub published: Vec<Snapshot>,
}

impl HostStub {
    pub fn state(&self) -> ConnectionState {
        self.state.unwrap_or(ConnectionState::Idle)
    }
}

impl SyncHost for HostStub {
    fn close_transport(&mut self) {
        self.close_requests += 1;
        self.state = Some(ConnectionState::Closing);
    }

    fn resolve_session(&mut self, generation: Generation, request: SessionRequest) {
        self.resolutions.push((generation, request));
    }

    fn open_transport(
        &mut self,
        generation: Generation,
        session_id: &SessionId,
    ) -> Result<(), TransportError> {
        if !self.state().is_quiescent() {
            return Err(TransportError::AlreadyActive);
        }
        self.opened.push((generation, session_id.clone()));
        self.state = Some(ConnectionState::Connecting);
        Ok(())
    }

    fn send_frame(&mut self, frame: OutboundFrame) -> bool {
        if !self.state().is_open() {
            return false;
        }
        self.frames.push(frame);
        true
    }

    fn connection_state(&self) -> ConnectionState {
        self.state()
    }

    fn start_upload(&mut self, session_id: SessionId, ticket: UploadTicket) {
        self.uploads.push((session_id, ticket));
    }

    fn detach_upload(&mut self) {
        self.detached_uploads += 1;
    }

    fn publish(&mut self, snapshot: Snapshot) {
        self.published.push(snapshot);
    }
}

pub fn now() -> OffsetDateTime {
    datetime!(2024-03-01 12:00 UTC)
}

pub fn session(id: &str) -> Session {
    Session {
        id: SessionId::new(id),
        owner_id: Some("owner-1".to_string()),
        title: format!("session {id}"),
        description: None,
        documents: Vec::new(),
        dataset: None,
        settings: SessionSettings::default(),
        created_at: None,
        updated_at: None,
    }
}

pub fn resumed(id: &str, history: Vec<Message>) -> Result<ResolvedSession, SessionResolutionError> {
    Ok(ResolvedSession {
        session: session(id),
        history,
        origin: SessionOrigin::Resumed,
    })
}

pub fn resume(id: &str) -> Option<SessionRequest> {
    Some(SessionRequest::Resume(SessionId::new(id)))
}

/// Drives `app` into an open session `id` and returns its generation.
pub fn enter_open(app: &mut SyncApp, host: &mut HostStub, id: &str, history: Vec<Message>) -> Generation {
    app.enter_session(resume(id), host);
    if host.state() != ConnectionState::Idle {
        host.state = Some(ConnectionState::Idle);
        app.on_transport_closed(host);
    }
    let generation = app.generation();
    app.on_session_resolved(generation, resumed(id, history), now(), host);
    host.state = Some(ConnectionState::Open);
    app.on_transport_event(generation, TransportEvent::StateChanged(ConnectionState::Open), host);
    generation
}

pub fn dataset(name: &str) -> DatasetSummary {
    DatasetSummary {
        name: name.to_string(),
        path: format!("/data/{name}"),
        rows: 10,
        columns: 2,
        column_names: vec!["x".to_string(), "y".to_string()],
        missing_values: None,
    }
}

/// Queues `name`, starts the upload and returns the ticket handed to the host.
pub fn start_upload(app: &mut SyncApp, host: &mut HostStub, name: &str) -> UploadTicket {
    app.submit_files(vec![UploadFile::new(name, vec![1_u8; 8])], host);
    app.start_upload(host).expect("upload starts");
    let (_, ticket) = host.uploads.last().cloned().expect("upload requested");
    ticket
}
