//! Single-task driver for [`SyncApp`].
//!
//! One task owns the app, the transport client and the session state. User
//! commands and continuations of spawned network work arrive on two queues
//! drained by that task, so every mutation happens at a continuation boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use session_api::SessionApiConfig;
use session_backend::{
    BackendError, ConnectionState, Connector, CreateSession, DatasetSummary, OutboundFrame,
    Session, SessionBackend, SessionId, SessionSettings, SessionSummary, TransportError,
    TransportTarget, UploadFile, UploadProgress,
};
use session_backend_http::{HttpSessionBackend, WsConnector};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::app::{Generation, Snapshot, SyncApp, SyncHost};
use crate::config::SyncConfig;
use crate::controller::{self, ResolvedSession, SessionRequest};
use crate::error::{SessionResolutionError, SyncError, UploadError};
use crate::transport::{TransportClient, TransportEvent};
use crate::upload::{SubmitOutcome, UploadCoordinator, UploadTicket};

const USER_AGENT: &str = concat!("session_sync/", env!("CARGO_PKG_VERSION"));

enum Command {
    Enter(Option<SessionRequest>),
    SendUserMessage(String),
    SubmitFiles {
        files: Vec<UploadFile>,
        reply: oneshot::Sender<SubmitOutcome>,
    },
    RemoveFile {
        index: usize,
        reply: oneshot::Sender<Option<UploadFile>>,
    },
    StartUpload {
        reply: oneshot::Sender<Result<(), UploadError>>,
    },
    ListSessions {
        owner_id: String,
        reply: oneshot::Sender<Result<Vec<SessionSummary>, BackendError>>,
    },
    UpdateSettings {
        settings: SessionSettings,
        reply: oneshot::Sender<Result<Session, SyncError>>,
    },
}

/// What the sync task reads from the handle side. Shutdown is kept apart
/// from [`Command`] because only the run loop can honour it.
enum Inbound {
    Command(Command),
    Shutdown(oneshot::Sender<()>),
}

enum Continuation {
    TransportClosed,
    Transport {
        generation: Generation,
        event: TransportEvent,
    },
    SessionResolved {
        generation: Generation,
        result: Result<ResolvedSession, SessionResolutionError>,
    },
    UploadProgress {
        epoch: u64,
        sent: u64,
        total: u64,
    },
    UploadFinished {
        epoch: u64,
        result: Result<DatasetSummary, BackendError>,
    },
    SessionsListed {
        result: Result<Vec<SessionSummary>, BackendError>,
        reply: oneshot::Sender<Result<Vec<SessionSummary>, BackendError>>,
    },
    SettingsUpdated {
        generation: Generation,
        result: Result<Session, BackendError>,
        reply: oneshot::Sender<Result<Session, SyncError>>,
    },
}

/// Performs the effects requested by [`SyncApp`] and routes their results
/// back as continuations.
struct RuntimeHost {
    backend: Arc<dyn SessionBackend>,
    transport: TransportClient,
    continuations: mpsc::UnboundedSender<Continuation>,
    snapshots: watch::Sender<Snapshot>,
    transport_generation: Arc<AtomicU64>,
    endpoint: String,
    credential: String,
    upload_gate: Option<CancellationToken>,
}

impl RuntimeHost {
    fn spawn_continuation<F>(&self, work: F)
    where
        F: std::future::Future<Output = Continuation> + Send + 'static,
    {
        let continuations = self.continuations.clone();
        tokio::spawn(async move {
            let continuation = work.await;
            let _ = continuations.send(continuation);
        });
    }

    fn list_sessions(
        &self,
        owner_id: String,
        reply: oneshot::Sender<Result<Vec<SessionSummary>, BackendError>>,
    ) {
        let backend = Arc::clone(&self.backend);
        self.spawn_continuation(async move {
            let result = controller::list_sessions(backend.as_ref(), &owner_id).await;
            Continuation::SessionsListed { result, reply }
        });
    }

    fn update_settings(
        &self,
        generation: Generation,
        session_id: SessionId,
        settings: SessionSettings,
        reply: oneshot::Sender<Result<Session, SyncError>>,
    ) {
        let backend = Arc::clone(&self.backend);
        self.spawn_continuation(async move {
            let result = controller::update_settings(backend.as_ref(), &session_id, &settings).await;
            Continuation::SettingsUpdated {
                generation,
                result,
                reply,
            }
        });
    }

    async fn shutdown(&mut self) {
        self.detach_upload();
        self.transport.close().await;
    }
}

impl SyncHost for RuntimeHost {
    fn close_transport(&mut self) {
        let pending = self.transport.begin_close();
        let continuations = self.continuations.clone();
        tokio::spawn(async move {
            pending.finished().await;
            let _ = continuations.send(Continuation::TransportClosed);
        });
    }

    fn resolve_session(&mut self, generation: Generation, request: SessionRequest) {
        let backend = Arc::clone(&self.backend);
        self.spawn_continuation(async move {
            let result = controller::resolve(backend.as_ref(), request).await;
            Continuation::SessionResolved { generation, result }
        });
    }

    fn open_transport(
        &mut self,
        generation: Generation,
        session_id: &SessionId,
    ) -> Result<(), TransportError> {
        self.transport_generation.store(generation, Ordering::Release);
        self.transport.open(TransportTarget {
            endpoint: self.endpoint.clone(),
            session_id: session_id.clone(),
            credential: self.credential.clone(),
        })
    }

    fn send_frame(&mut self, frame: OutboundFrame) -> bool {
        self.transport.send(frame)
    }

    fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    fn start_upload(&mut self, session_id: SessionId, ticket: UploadTicket) {
        let gate = CancellationToken::new();
        if let Some(previous) = self.upload_gate.replace(gate.clone()) {
            previous.cancel();
        }

        let UploadTicket { epoch, files } = ticket;
        let progress_sink = self.continuations.clone();
        let progress: UploadProgress = Arc::new(move |sent, total| {
            if !gate.is_cancelled() {
                let _ = progress_sink.send(Continuation::UploadProgress { epoch, sent, total });
            }
        });

        let backend = Arc::clone(&self.backend);
        // The request runs to completion even when detached; its completion is
        // discarded by the epoch check.
        self.spawn_continuation(async move {
            let result = backend.upload(&session_id, &files, progress).await;
            Continuation::UploadFinished { epoch, result }
        });
    }

    fn detach_upload(&mut self) {
        if let Some(gate) = self.upload_gate.take() {
            gate.cancel();
        }
    }

    fn publish(&mut self, snapshot: Snapshot) {
        self.snapshots.send_replace(snapshot);
    }
}

pub struct SyncRuntime;

impl SyncRuntime {
    /// Spawns the sync task on the current tokio runtime.
    pub fn spawn(
        backend: Arc<dyn SessionBackend>,
        connector: Arc<dyn Connector>,
        config: SyncConfig,
        credential: impl Into<String>,
    ) -> SyncHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (continuations_tx, continuations_rx) = mpsc::unbounded_channel();
        let (snapshots_tx, snapshots_rx) = watch::channel(Snapshot::default());

        let transport = TransportClient::new(connector, config.transport);
        let transport_generation = Arc::new(AtomicU64::new(0));
        let observer_generation = Arc::clone(&transport_generation);
        let observer_sink = continuations_tx.clone();
        transport.on_message(move |event| {
            let _ = observer_sink.send(Continuation::Transport {
                generation: observer_generation.load(Ordering::Acquire),
                event: event.clone(),
            });
        });

        let host = RuntimeHost {
            backend,
            transport,
            continuations: continuations_tx,
            snapshots: snapshots_tx,
            transport_generation,
            endpoint: config.socket_endpoint().to_string(),
            credential: credential.into(),
            upload_gate: None,
        };
        let app = SyncApp::new(UploadCoordinator::new(config.upload_cap), config.dedup_bucket);
        tokio::spawn(run(app, host, commands_rx, continuations_rx));

        SyncHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        }
    }

    /// Spawns against the REST backend and socket endpoint named by `config`.
    pub fn spawn_http(config: SyncConfig, credential: impl Into<String>) -> Result<SyncHandle, BackendError> {
        let credential = credential.into();
        let mut api_config = SessionApiConfig::new(credential.clone())
            .with_base_url(config.api_base_url.clone())
            .with_user_agent(USER_AGENT);
        if let Some(socket_url) = &config.socket_url {
            api_config = api_config.with_socket_url(socket_url.clone());
        }

        let backend = HttpSessionBackend::new(api_config)?;
        let mut config = config;
        config.socket_url = Some(backend.socket_endpoint()?);
        Ok(Self::spawn(
            Arc::new(backend),
            Arc::new(WsConnector::new()),
            config,
            credential,
        ))
    }
}

async fn run(
    mut app: SyncApp,
    mut host: RuntimeHost,
    mut commands: mpsc::UnboundedReceiver<Inbound>,
    mut continuations: mpsc::UnboundedReceiver<Continuation>,
) {
    host.publish(app.snapshot());

    loop {
        tokio::select! {
            biased;
            Some(continuation) = continuations.recv() => {
                apply_continuation(&mut app, &mut host, continuation);
            }
            inbound = commands.recv() => match inbound {
                Some(Inbound::Command(command)) => apply_command(&mut app, &mut host, command),
                Some(Inbound::Shutdown(reply)) => {
                    host.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                None => {
                    host.shutdown().await;
                    break;
                }
            },
        }
    }

    info!("sync runtime stopped");
}

fn apply_command(app: &mut SyncApp, host: &mut RuntimeHost, command: Command) {
    match command {
        Command::Enter(request) => app.enter_session(request, host),
        Command::SendUserMessage(text) => {
            app.send_user_message(&text, OffsetDateTime::now_utc(), host);
        }
        Command::SubmitFiles { files, reply } => {
            let _ = reply.send(app.submit_files(files, host));
        }
        Command::RemoveFile { index, reply } => {
            let _ = reply.send(app.remove_file(index, host));
        }
        Command::StartUpload { reply } => {
            let _ = reply.send(app.start_upload(host));
        }
        Command::ListSessions { owner_id, reply } => host.list_sessions(owner_id, reply),
        Command::UpdateSettings { settings, reply } => {
            if let Err(error) = settings.validate() {
                let _ = reply.send(Err(error.into()));
                return;
            }
            let Some(session_id) = app.current_session_id().cloned() else {
                let _ = reply.send(Err(SyncError::NoSession));
                return;
            };
            host.update_settings(app.generation(), session_id, settings, reply);
        }
    }
}

fn apply_continuation(app: &mut SyncApp, host: &mut RuntimeHost, continuation: Continuation) {
    match continuation {
        Continuation::TransportClosed => app.on_transport_closed(host),
        Continuation::Transport { generation, event } => {
            app.on_transport_event(generation, event, host);
        }
        Continuation::SessionResolved { generation, result } => {
            app.on_session_resolved(generation, result, OffsetDateTime::now_utc(), host);
        }
        Continuation::UploadProgress { epoch, sent, total } => {
            app.on_upload_progress(epoch, sent, total, host);
        }
        Continuation::UploadFinished { epoch, result } => {
            app.on_upload_finished(epoch, result, OffsetDateTime::now_utc(), host);
        }
        Continuation::SessionsListed { result, reply } => {
            app.on_sessions_listed(&result);
            let _ = reply.send(result);
        }
        Continuation::SettingsUpdated {
            generation,
            result,
            reply,
        } => {
            let reply_value = match result {
                Ok(session) => {
                    app.on_settings_updated(generation, session.clone(), host);
                    Ok(session)
                }
                Err(error) => Err(SyncError::Backend(error)),
            };
            let _ = reply.send(reply_value);
        }
    }
}

/// Cloneable producer surface for the UI layer.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Inbound>,
    snapshots: watch::Receiver<Snapshot>,
}

impl SyncHandle {
    fn dispatch(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .send(Inbound::Command(command))
            .map_err(|_| SyncError::Shutdown)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SyncError> {
        let (reply, response) = oneshot::channel();
        self.dispatch(command(reply))?;
        response.await.map_err(|_| SyncError::Shutdown)
    }

    /// Resumes `session_id`, or leaves the current session when `None`.
    pub fn enter_session(&self, session_id: Option<SessionId>) -> Result<(), SyncError> {
        self.dispatch(Command::Enter(session_id.map(SessionRequest::Resume)))
    }

    pub fn create_session(&self, request: CreateSession) -> Result<(), SyncError> {
        self.dispatch(Command::Enter(Some(SessionRequest::Create(request))))
    }

    pub fn send_user_message(&self, text: impl Into<String>) -> Result<(), SyncError> {
        self.dispatch(Command::SendUserMessage(text.into()))
    }

    pub async fn submit_files(&self, files: Vec<UploadFile>) -> Result<SubmitOutcome, SyncError> {
        self.request(|reply| Command::SubmitFiles { files, reply }).await
    }

    pub async fn remove_file(&self, index: usize) -> Result<Option<UploadFile>, SyncError> {
        self.request(|reply| Command::RemoveFile { index, reply }).await
    }

    pub async fn start_upload(&self) -> Result<(), SyncError> {
        self.request(|reply| Command::StartUpload { reply })
            .await?
            .map_err(SyncError::from)
    }

    pub async fn list_sessions(
        &self,
        owner_id: impl Into<String>,
    ) -> Result<Vec<SessionSummary>, SyncError> {
        let owner_id = owner_id.into();
        self.request(|reply| Command::ListSessions { owner_id, reply })
            .await?
            .map_err(SyncError::from)
    }

    pub async fn update_settings(&self, settings: SessionSettings) -> Result<Session, SyncError> {
        self.request(|reply| Command::UpdateSettings { settings, reply })
            .await?
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Closes the transport and stops the sync task.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        debug!("shutdown requested");
        let (reply, stopped) = oneshot::channel();
        self.commands
            .send(Inbound::Shutdown(reply))
            .map_err(|_| SyncError::Shutdown)?;
        stopped.await.map_err(|_| SyncError::Shutdown)
    }
}
