use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{stream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::SessionApiConfig;
use crate::error::{parse_error_message, SessionApiError};
use crate::headers::build_headers;
use crate::payload::{
    CreateSessionPayload, HistoryItem, SessionPayload, SettingsPayload, UploadPart,
    UploadResponse,
};
use crate::retry::{is_retryable_http_error, retry_delay, MAX_RETRIES};
use crate::url::{derive_socket_base, endpoint, normalize_base_url};

/// Size of each streamed upload chunk; progress is reported per chunk.
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug)]
pub struct SessionApiClient {
    http: Client,
    config: SessionApiConfig,
}

impl SessionApiClient {
    pub fn new(config: SessionApiConfig) -> Result<Self, SessionApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &SessionApiConfig {
        &self.config
    }

    pub fn base_url(&self) -> String {
        normalize_base_url(&self.config.base_url)
    }

    /// Socket base URL, derived from the REST base when not configured.
    pub fn socket_base(&self) -> Result<String, SessionApiError> {
        match self.config.socket_url.as_deref() {
            Some(explicit) if !explicit.trim().is_empty() => derive_socket_base(explicit),
            _ => derive_socket_base(&self.base_url()),
        }
    }

    pub fn build_headers(&self) -> Result<HeaderMap, SessionApiError> {
        let headers = build_headers(&self.config)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| SessionApiError::InvalidHeader(format!("key: {key}")))?,
                HeaderValue::from_str(&value)
                    .map_err(|_| SessionApiError::InvalidHeader(format!("value for {key}")))?,
            );
        }
        Ok(out)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, SessionApiError> {
        let url = endpoint(&self.base_url(), segments)?;
        Ok(self.http.request(method, url).headers(self.build_headers()?))
    }

    pub async fn create_session(
        &self,
        payload: &CreateSessionPayload,
    ) -> Result<SessionPayload, SessionApiError> {
        let request = self.request(Method::POST, &["rag", "session"])?.json(payload);
        let response = check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn fetch_session(&self, session_id: &str) -> Result<SessionPayload, SessionApiError> {
        self.get_json(&["rag", "session", session_id]).await
    }

    /// All sessions visible to the credential, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionPayload>, SessionApiError> {
        self.get_json(&["rag", "history"]).await
    }

    pub async fn fetch_history(&self, session_id: &str) -> Result<Vec<HistoryItem>, SessionApiError> {
        self.get_json(&["rag", session_id, "messages"]).await
    }

    pub async fn update_settings(
        &self,
        session_id: &str,
        settings: &SettingsPayload,
    ) -> Result<SessionPayload, SessionApiError> {
        let request = self
            .request(Method::PUT, &["rag", session_id, "settings"])?
            .json(settings);
        let response = check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Multipart upload with one `files` part per file. `progress` receives
    /// `(sent, total)` as the body is streamed. Uploads are never retried.
    pub async fn upload_files<F>(
        &self,
        session_id: &str,
        files: Vec<UploadPart>,
        progress: F,
    ) -> Result<UploadResponse, SessionApiError>
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        let total: u64 = files.iter().map(|file| file.bytes.len() as u64).sum();
        let progress = Arc::new(progress);
        let sent = Arc::new(AtomicU64::new(0));

        let mut form = Form::new();
        for file in files {
            let length = file.bytes.len() as u64;
            let body = progress_body(file.bytes, Arc::clone(&sent), total, Arc::clone(&progress));
            let mut part = Part::stream_with_length(body, length).file_name(file.file_name);
            if let Some(mime) = file.mime.as_deref() {
                part = part.mime_str(mime)?;
            }
            form = form.part("files", part);
        }

        let request = self
            .request(Method::POST, &["rag", session_id, "upload"])?
            .multipart(form);
        let response = check_status(request.send().await?).await?;
        let decoded: UploadResponse = response.json().await?;
        (*progress)(total, total);
        Ok(decoded)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, SessionApiError> {
        let response = self.get_with_retry(segments).await?;
        Ok(response.json().await?)
    }

    /// GETs are idempotent and retried on transient failures.
    async fn get_with_retry(&self, segments: &[&str]) -> Result<Response, SessionApiError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            match self.request(Method::GET, segments)?.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    last_status = Some(status);
                    let body = response.text().await.unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    if attempt < MAX_RETRIES && is_retryable_http_error(status.as_u16(), &body) {
                        debug!(%status, attempt, "retrying session API request");
                        last_error = Some(message);
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }

                    return Err(status_error(status, message));
                }
                Err(error) => {
                    let message = error.to_string();
                    if attempt < MAX_RETRIES {
                        warn!(attempt, error = %message, "session API request failed; retrying");
                        last_error = Some(message);
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }
                    last_error = Some(message);
                }
            }
        }

        Err(SessionApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }
}

async fn check_status(response: Response) -> Result<Response, SessionApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, parse_error_message(status, &body)))
}

fn status_error(status: StatusCode, message: String) -> SessionApiError {
    if status == StatusCode::NOT_FOUND {
        SessionApiError::NotFound(message)
    } else {
        SessionApiError::Status(status, message)
    }
}

fn progress_body<F>(
    bytes: Arc<[u8]>,
    sent: Arc<AtomicU64>,
    total: u64,
    progress: Arc<F>,
) -> Body
where
    F: Fn(u64, u64) + Send + Sync + 'static,
{
    Body::wrap_stream(progress_chunks(bytes, sent, total, progress))
}

/// Chunked stream that reports cumulative bytes handed to the connection.
fn progress_chunks<F>(
    bytes: Arc<[u8]>,
    sent: Arc<AtomicU64>,
    total: u64,
    progress: Arc<F>,
) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + Sync + 'static
where
    F: Fn(u64, u64) + Send + Sync + 'static,
{
    let ranges: Vec<(usize, usize)> = (0..bytes.len())
        .step_by(UPLOAD_CHUNK_BYTES)
        .map(|start| (start, (start + UPLOAD_CHUNK_BYTES).min(bytes.len())))
        .collect();

    stream::iter(ranges).map(move |(start, end)| {
        let chunk = bytes[start..end].to_vec();
        let so_far = sent.fetch_add(chunk.len() as u64, Ordering::AcqRel) + chunk.len() as u64;
        (*progress)(so_far.min(total), total);
        Ok(chunk)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn socket_base_is_derived_from_rest_base() {
        let client = SessionApiClient::new(
            SessionApiConfig::new("tok").with_base_url("https://api.example.com/"),
        )
        .expect("client");
        assert_eq!(
            client.socket_base().expect("socket base"),
            "wss://api.example.com"
        );

        let client = SessionApiClient::new(
            SessionApiConfig::new("tok")
                .with_base_url("https://api.example.com")
                .with_socket_url("http://rt.example.com:9000"),
        )
        .expect("client");
        assert_eq!(
            client.socket_base().expect("socket base"),
            "ws://rt.example.com:9000"
        );
    }

    #[tokio::test]
    async fn progress_chunks_report_cumulative_bytes() {
        let bytes: Arc<[u8]> = vec![7_u8; UPLOAD_CHUNK_BYTES * 2 + 10].into();
        let total = bytes.len() as u64;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_for_chunks = Arc::clone(&seen);

        let chunks: Vec<_> = progress_chunks(
            bytes,
            Arc::new(AtomicU64::new(0)),
            total,
            Arc::new(move |sent, total| {
                seen_for_chunks
                    .lock()
                    .expect("progress lock")
                    .push((sent, total));
            }),
        )
        .collect()
        .await;

        let chunk = UPLOAD_CHUNK_BYTES as u64;
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            *seen.lock().expect("progress lock"),
            vec![(chunk, total), (chunk * 2, total), (total, total)]
        );
    }
}
