use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use session_backend::{
    BackendError, CreateSession, DatasetSummary, Message, Session, SessionBackend, SessionId,
    SessionSettings, SessionSummary, UploadFile, UploadProgress,
};
use time::OffsetDateTime;
use tokio::sync::oneshot;

use crate::lock_unpoisoned;

/// Record of one collaborator call, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateSession { title: String },
    FetchSession(SessionId),
    ListSessions(String),
    FetchHistory(SessionId),
    Upload { session_id: SessionId, files: Vec<String> },
    UpdateSettings(SessionId),
}

#[derive(Default)]
struct BackendState {
    sessions: HashMap<SessionId, Session>,
    order: Vec<SessionId>,
    histories: HashMap<SessionId, Vec<Message>>,
    next_id: u64,
    create_failures: VecDeque<BackendError>,
    failing_histories: HashSet<SessionId>,
    upload_results: VecDeque<Result<DatasetSummary, BackendError>>,
    history_holds: HashMap<SessionId, oneshot::Receiver<()>>,
    upload_holds: VecDeque<oneshot::Receiver<()>>,
    calls: Vec<MockCall>,
}

/// In-memory session backend with scriptable failures and hold points.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<BackendState>,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an existing session with default settings and returns it.
    pub fn add_session(&self, id: &str, title: &str) -> Session {
        let session = Session {
            id: SessionId::new(id),
            owner_id: Some("owner-1".to_owned()),
            title: title.to_owned(),
            description: None,
            documents: Vec::new(),
            dataset: None,
            settings: SessionSettings::default(),
            created_at: Some(OffsetDateTime::now_utc()),
            updated_at: Some(OffsetDateTime::now_utc()),
        };
        self.insert_session(session.clone());
        session
    }

    pub fn insert_session(&self, session: Session) {
        let mut state = lock_unpoisoned(&self.state);
        if !state.order.contains(&session.id) {
            state.order.push(session.id.clone());
        }
        state.sessions.insert(session.id.clone(), session);
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        lock_unpoisoned(&self.state)
            .sessions
            .get(&SessionId::new(id))
            .cloned()
    }

    pub fn bind_dataset(&self, id: &str, dataset: DatasetSummary) {
        if let Some(session) = lock_unpoisoned(&self.state)
            .sessions
            .get_mut(&SessionId::new(id))
        {
            session.dataset = Some(dataset);
        }
    }

    pub fn set_history(&self, id: &str, messages: Vec<Message>) {
        lock_unpoisoned(&self.state)
            .histories
            .insert(SessionId::new(id), messages);
    }

    pub fn fail_next_create(&self, error: BackendError) {
        lock_unpoisoned(&self.state).create_failures.push_back(error);
    }

    /// Every history fetch for `id` fails until the backend is dropped.
    pub fn fail_history(&self, id: &str) {
        lock_unpoisoned(&self.state)
            .failing_histories
            .insert(SessionId::new(id));
    }

    pub fn push_upload_result(&self, result: Result<DatasetSummary, BackendError>) {
        lock_unpoisoned(&self.state).upload_results.push_back(result);
    }

    /// Parks the next history fetch for `id` until the returned sender fires
    /// or is dropped.
    pub fn hold_history(&self, id: &str) -> oneshot::Sender<()> {
        let (release, hold) = oneshot::channel();
        lock_unpoisoned(&self.state)
            .history_holds
            .insert(SessionId::new(id), hold);
        release
    }

    /// Parks the next upload until the returned sender fires or is dropped.
    pub fn hold_upload(&self) -> oneshot::Sender<()> {
        let (release, hold) = oneshot::channel();
        lock_unpoisoned(&self.state).upload_holds.push_back(hold);
        release
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock_unpoisoned(&self.state).calls.clone()
    }

    fn record(&self, call: MockCall) {
        lock_unpoisoned(&self.state).calls.push(call);
    }
}

#[async_trait]
impl SessionBackend for MockBackend {
    async fn create_session(&self, request: &CreateSession) -> Result<Session, BackendError> {
        self.record(MockCall::CreateSession {
            title: request.title.clone(),
        });

        let mut state = lock_unpoisoned(&self.state);
        if let Some(error) = state.create_failures.pop_front() {
            return Err(error);
        }

        state.next_id += 1;
        let now = OffsetDateTime::now_utc();
        let session = Session {
            id: SessionId::new(format!("session-{}", state.next_id)),
            owner_id: Some(request.owner_id.clone()),
            title: request.title.clone(),
            description: request.description.clone(),
            documents: Vec::new(),
            dataset: None,
            settings: SessionSettings::default(),
            created_at: Some(now),
            updated_at: Some(now),
        };
        state.order.push(session.id.clone());
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn fetch_session(&self, session_id: &SessionId) -> Result<Session, BackendError> {
        self.record(MockCall::FetchSession(session_id.clone()));
        lock_unpoisoned(&self.state)
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(session_id.clone()))
    }

    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<SessionSummary>, BackendError> {
        self.record(MockCall::ListSessions(owner_id.to_owned()));
        let state = lock_unpoisoned(&self.state);
        Ok(state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.sessions.get(id))
            .filter(|session| session.owner_id.as_deref() == Some(owner_id))
            .map(SessionSummary::from)
            .collect())
    }

    async fn fetch_history(&self, session_id: &SessionId) -> Result<Vec<Message>, BackendError> {
        self.record(MockCall::FetchHistory(session_id.clone()));
        let hold = lock_unpoisoned(&self.state).history_holds.remove(session_id);
        if let Some(hold) = hold {
            let _ = hold.await;
        }

        let state = lock_unpoisoned(&self.state);
        if state.failing_histories.contains(session_id) {
            return Err(BackendError::Transport(format!(
                "history for {session_id} is unavailable"
            )));
        }
        Ok(state.histories.get(session_id).cloned().unwrap_or_default())
    }

    async fn upload(
        &self,
        session_id: &SessionId,
        files: &[UploadFile],
        progress: UploadProgress,
    ) -> Result<DatasetSummary, BackendError> {
        self.record(MockCall::Upload {
            session_id: session_id.clone(),
            files: files.iter().map(|file| file.name.clone()).collect(),
        });
        let hold = lock_unpoisoned(&self.state).upload_holds.pop_front();
        if let Some(hold) = hold {
            let _ = hold.await;
        }

        let total: u64 = files.iter().map(UploadFile::len).sum();
        progress(total / 2, total);
        progress(total, total);

        let mut state = lock_unpoisoned(&self.state);
        let result = state.upload_results.pop_front().unwrap_or_else(|| {
            let name = files
                .first()
                .map(|file| file.name.clone())
                .unwrap_or_default();
            Ok(DatasetSummary {
                path: format!("/data/{name}"),
                name,
                ..DatasetSummary::default()
            })
        });

        if let Ok(dataset) = &result {
            let session = state
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| BackendError::NotFound(session_id.clone()))?;
            session.dataset = Some(dataset.clone());
            session
                .documents
                .extend(files.iter().map(|file| file.name.clone()));
        }
        result
    }

    async fn update_settings(
        &self,
        session_id: &SessionId,
        settings: &SessionSettings,
    ) -> Result<Session, BackendError> {
        self.record(MockCall::UpdateSettings(session_id.clone()));
        settings.validate()?;

        let mut state = lock_unpoisoned(&self.state);
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| BackendError::NotFound(session_id.clone()))?;
        session.settings = *settings;
        session.updated_at = Some(OffsetDateTime::now_utc());
        Ok(session.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn created_sessions_are_listed_newest_first() {
        let backend = MockBackend::new();
        for title in ["first", "second"] {
            backend
                .create_session(&CreateSession {
                    owner_id: "u-1".to_owned(),
                    api_key: "k".to_owned(),
                    title: title.to_owned(),
                    description: None,
                })
                .await
                .expect("create");
        }

        let listed = backend.list_sessions("u-1").await.expect("list");
        let titles: Vec<_> = listed.iter().map(|summary| summary.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "first"]);
        assert!(backend
            .list_sessions("someone-else")
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn upload_binds_scripted_dataset_and_reports_progress() {
        let backend = MockBackend::new();
        backend.add_session("s-1", "t");
        backend.push_upload_result(Ok(DatasetSummary {
            name: "d.csv".to_owned(),
            path: "/data/d.csv".to_owned(),
            rows: 3,
            ..DatasetSummary::default()
        }));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_for_progress = Arc::clone(&seen);
        let dataset = backend
            .upload(
                &SessionId::new("s-1"),
                &[UploadFile::new("d.csv", vec![0_u8; 10])],
                Arc::new(move |sent, total| {
                    lock_unpoisoned(&seen_for_progress).push((sent, total));
                }),
            )
            .await
            .expect("upload");

        assert_eq!(dataset.rows, 3);
        assert_eq!(*lock_unpoisoned(&seen), vec![(5, 10), (10, 10)]);
        assert_eq!(
            backend.session("s-1").and_then(|session| session.dataset),
            Some(dataset)
        );
    }
}
