mod dedup;
mod error;
mod log;
mod reconcile;

pub use dedup::{DedupKey, DEFAULT_BUCKET_WIDTH};
pub use error::MessageLogError;
pub use log::{AppendOutcome, LogEntry, MessageLog};
pub use reconcile::{
    reconcile_history, Seed, GREETING_MESSAGE, UPLOAD_PROMPT_MESSAGE, WELCOME_BACK_MESSAGE,
};
