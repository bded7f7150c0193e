//! Bounded upload queue with aggregate progress and an epoch guard.

use session_backend::{BackendError, DatasetSummary, Message, SessionId, UploadFile};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_UPLOAD_CAP;
use crate::error::UploadError;

pub const FOLLOW_UP_MESSAGE: &str = "What would you like to know about your data?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadState {
    #[default]
    Idle,
    InFlight,
    Succeeded,
    Failed,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InFlight => "in-flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub accepted: usize,
    /// Names of the files past the cap boundary, in submission order.
    pub dropped: Vec<String>,
}

/// One batch handed to the upload collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket {
    pub epoch: u64,
    pub files: Vec<UploadFile>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Succeeded {
        dataset: DatasetSummary,
        files: Vec<String>,
        /// Confirmation, statistics and follow-up, in append order.
        messages: Vec<Message>,
    },
    Failed(UploadError),
}

#[derive(Debug)]
pub struct UploadCoordinator {
    cap: usize,
    pending: Vec<UploadFile>,
    completed: usize,
    epoch: u64,
    state: UploadState,
    progress: u8,
    batch_len: usize,
}

impl Default for UploadCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_UPLOAD_CAP)
    }
}

impl UploadCoordinator {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            pending: Vec::new(),
            completed: 0,
            epoch: 0,
            state: UploadState::Idle,
            progress: 0,
            batch_len: 0,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn pending(&self) -> &[UploadFile] {
        &self.pending
    }

    pub fn pending_names(&self) -> Vec<String> {
        self.pending.iter().map(|file| file.name.clone()).collect()
    }

    /// Aggregate percentage over every byte of the in-flight batch.
    pub fn progress_percent(&self) -> u8 {
        self.progress
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Queues files up to the cap, counted across pending and completed files.
    /// Submissions past the cap boundary are dropped.
    pub fn submit(&mut self, files: Vec<UploadFile>) -> SubmitOutcome {
        let room = self
            .cap
            .saturating_sub(self.pending.len() + self.completed);
        let mut accepted = 0;
        let mut dropped = Vec::new();

        for file in files {
            if accepted < room {
                self.pending.push(file);
                accepted += 1;
            } else {
                dropped.push(file.name);
            }
        }

        if !dropped.is_empty() {
            debug!(cap = self.cap, dropped = dropped.len(), "upload queue full; dropping newest files");
        }
        SubmitOutcome { accepted, dropped }
    }

    /// Removes a pending file by position. Refused while a batch is in flight.
    pub fn remove(&mut self, index: usize) -> Option<UploadFile> {
        if self.state == UploadState::InFlight || index >= self.pending.len() {
            return None;
        }
        Some(self.pending.remove(index))
    }

    /// Moves the pending queue in flight for `session_id`.
    pub fn begin(&mut self, session_id: Option<&SessionId>) -> Result<UploadTicket, UploadError> {
        let Some(session_id) = session_id else {
            return Err(UploadError::NoSession);
        };
        if self.state == UploadState::InFlight {
            return Err(UploadError::InFlight);
        }
        if self.pending.is_empty() {
            return Err(UploadError::EmptyQueue);
        }

        self.epoch += 1;
        self.state = UploadState::InFlight;
        self.progress = 0;
        self.batch_len = self.pending.len();
        info!(%session_id, epoch = self.epoch, files = self.batch_len, "upload started");

        Ok(UploadTicket {
            epoch: self.epoch,
            files: self.pending.clone(),
        })
    }

    /// Returns true when the visible percentage changed.
    pub fn record_progress(&mut self, epoch: u64, sent: u64, total: u64) -> bool {
        if epoch != self.epoch || self.state != UploadState::InFlight {
            return false;
        }
        let percent = if total == 0 {
            100
        } else {
            (sent.min(total).saturating_mul(100) / total) as u8
        };
        // Never moves backwards within a batch.
        if percent <= self.progress {
            return false;
        }
        self.progress = percent;
        true
    }

    /// Applies the collaborator result. `None` when `epoch` is stale.
    ///
    /// On failure nothing is committed and the queue is left as it was.
    pub fn finish(
        &mut self,
        epoch: u64,
        result: Result<DatasetSummary, BackendError>,
        now: OffsetDateTime,
    ) -> Option<UploadOutcome> {
        if epoch != self.epoch || self.state != UploadState::InFlight {
            debug!(epoch, current = self.epoch, "ignoring stale upload completion");
            return None;
        }

        match result {
            Ok(dataset) => {
                let batch_len = self.batch_len.min(self.pending.len());
                let files: Vec<String> = self
                    .pending
                    .drain(..batch_len)
                    .map(|file| file.name)
                    .collect();
                self.completed += files.len();
                self.state = UploadState::Succeeded;
                self.progress = 100;
                self.batch_len = 0;
                info!(files = files.len(), rows = dataset.rows, "upload succeeded");

                let messages = synthetic_burst(&files, &dataset, now);
                Some(UploadOutcome::Succeeded {
                    dataset,
                    files,
                    messages,
                })
            }
            Err(error) => {
                warn!(%error, "upload failed; pending queue kept");
                self.state = UploadState::Failed;
                self.progress = 0;
                self.batch_len = 0;
                Some(UploadOutcome::Failed(UploadError::Backend(error.to_string())))
            }
        }
    }

    /// Invalidates the in-flight batch and zeroes progress. Used when the
    /// same session is entered again; pending files stay queued.
    pub fn detach(&mut self) {
        debug!(epoch = self.epoch, from = self.state.as_str(), "upload detached");
        self.epoch += 1;
        self.state = UploadState::Idle;
        self.progress = 0;
        self.completed = 0;
        self.batch_len = 0;
    }

    /// Detaches and drops the pending queue, which belongs to the session
    /// being left.
    pub fn teardown(&mut self) {
        self.detach();
        if !self.pending.is_empty() {
            debug!(files = self.pending.len(), "discarding pending uploads");
            self.pending.clear();
        }
    }
}

/// Confirmation, statistics summary and follow-up prompt for a finished upload.
pub fn synthetic_burst(
    file_names: &[String],
    dataset: &DatasetSummary,
    now: OffsetDateTime,
) -> Vec<Message> {
    let confirmation = format!("Uploaded {}.", file_names.join(", "));
    let statistics = format!(
        "Your dataset has {} rows and {} columns: {}.",
        dataset.rows,
        dataset.columns,
        dataset.column_names.join(", ")
    );

    vec![
        Message::assistant_text(confirmation, now),
        Message::dataset(statistics, dataset.clone(), now),
        Message::assistant_text(FOLLOW_UP_MESSAGE, now),
    ]
}
