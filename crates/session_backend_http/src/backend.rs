use std::sync::Arc;

use async_trait::async_trait;
use session_api::payload::{CreateSessionPayload, UploadPart};
use session_api::{SessionApiClient, SessionApiConfig};
use session_backend::{
    BackendError, CreateSession, DatasetSummary, Message, Session, SessionBackend, SessionId,
    SessionSettings, SessionSummary, UploadFile, UploadProgress,
};
use time::OffsetDateTime;
use tracing::debug;

use crate::convert::{
    dataset_from_payload, map_api_error, message_from_history, session_from_payload,
    settings_to_payload,
};

/// Session backend speaking the REST API through [`SessionApiClient`].
#[derive(Debug)]
pub struct HttpSessionBackend {
    client: SessionApiClient,
}

impl HttpSessionBackend {
    pub fn new(config: SessionApiConfig) -> Result<Self, BackendError> {
        SessionApiClient::new(config)
            .map(Self::from_client)
            .map_err(|error| map_api_error(error, None))
    }

    #[must_use]
    pub fn from_client(client: SessionApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &SessionApiClient {
        &self.client
    }

    /// Socket endpoint matching this backend's configuration.
    pub fn socket_endpoint(&self) -> Result<String, BackendError> {
        self.client
            .socket_base()
            .map_err(|error| map_api_error(error, None))
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn create_session(&self, request: &CreateSession) -> Result<Session, BackendError> {
        let payload = CreateSessionPayload {
            user_id: request.owner_id.clone(),
            api_key: request.api_key.clone(),
            title: request.title.clone(),
            description: request.description.clone(),
        };
        self.client
            .create_session(&payload)
            .await
            .map(session_from_payload)
            .map_err(|error| map_api_error(error, None))
    }

    async fn fetch_session(&self, session_id: &SessionId) -> Result<Session, BackendError> {
        self.client
            .fetch_session(session_id.as_str())
            .await
            .map(session_from_payload)
            .map_err(|error| map_api_error(error, Some(session_id)))
    }

    /// Keeps the server's newest-first order. Sessions without an owner are
    /// visible to everyone holding the credential.
    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<SessionSummary>, BackendError> {
        let sessions = self
            .client
            .list_sessions()
            .await
            .map_err(|error| map_api_error(error, None))?;

        Ok(sessions
            .into_iter()
            .map(session_from_payload)
            .filter(|session| session.owner_id.as_deref().map_or(true, |owner| owner == owner_id))
            .map(|session| SessionSummary::from(&session))
            .collect())
    }

    async fn fetch_history(&self, session_id: &SessionId) -> Result<Vec<Message>, BackendError> {
        let items = self
            .client
            .fetch_history(session_id.as_str())
            .await
            .map_err(|error| map_api_error(error, Some(session_id)))?;

        let now = OffsetDateTime::now_utc();
        let messages: Vec<Message> = items
            .into_iter()
            .flat_map(|item| message_from_history(item, now))
            .collect();
        debug!(session_id = %session_id, count = messages.len(), "fetched history");
        Ok(messages)
    }

    async fn upload(
        &self,
        session_id: &SessionId,
        files: &[UploadFile],
        progress: UploadProgress,
    ) -> Result<DatasetSummary, BackendError> {
        let parts = files
            .iter()
            .map(|file| UploadPart {
                file_name: file.name.clone(),
                mime: file.mime.clone(),
                bytes: Arc::clone(&file.content),
            })
            .collect();

        let response = self
            .client
            .upload_files(session_id.as_str(), parts, move |sent, total| {
                progress(sent, total)
            })
            .await
            .map_err(|error| map_api_error(error, Some(session_id)))?;

        response
            .dataset
            .map(dataset_from_payload)
            .ok_or_else(|| BackendError::Decode("upload response carried no dataset".to_owned()))
    }

    async fn update_settings(
        &self,
        session_id: &SessionId,
        settings: &SessionSettings,
    ) -> Result<Session, BackendError> {
        settings.validate()?;
        self.client
            .update_settings(session_id.as_str(), &settings_to_payload(settings))
            .await
            .map(session_from_payload)
            .map_err(|error| map_api_error(error, Some(session_id)))
    }
}
