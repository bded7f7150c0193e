use std::time::Duration;

use session_backend::{Message, Role, SessionId};
use sha2::{Digest, Sha256};

/// Width of the timestamp bucket folded into a dedup key.
pub const DEFAULT_BUCKET_WIDTH: Duration = Duration::from_secs(5);

/// Hex characters of the content digest kept in a key.
const CONTENT_HASH_LEN: usize = 16;

/// Identity used to recognize one logical message arriving by two paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    session_id: String,
    role: Role,
    content_hash: String,
    bucket: i64,
}

impl DedupKey {
    pub fn derive(session_id: Option<&SessionId>, message: &Message, bucket_width: Duration) -> Self {
        let width = i64::try_from(bucket_width.as_secs()).unwrap_or(i64::MAX).max(1);
        Self {
            session_id: session_id.map(SessionId::as_str).unwrap_or_default().to_owned(),
            role: message.role,
            content_hash: content_hash(&message.content),
            bucket: message.timestamp.unix_timestamp().div_euclid(width),
        }
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn bucket(&self) -> i64 {
        self.bucket
    }
}

fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(CONTENT_HASH_LEN);
    encoded
}
