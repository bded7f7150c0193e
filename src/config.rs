//! Environment configuration.

use std::env;
use std::time::Duration;

use session_api::url::DEFAULT_BASE_URL;

pub const API_URL_ENV_VAR: &str = "SESSION_SYNC_API_URL";
pub const SOCKET_URL_ENV_VAR: &str = "SESSION_SYNC_SOCKET_URL";
pub const RECONNECT_BASE_ENV_VAR: &str = "SESSION_SYNC_RECONNECT_BASE_MS";
pub const RECONNECT_MAX_ATTEMPTS_ENV_VAR: &str = "SESSION_SYNC_RECONNECT_MAX_ATTEMPTS";
pub const KEEPALIVE_ENV_VAR: &str = "SESSION_SYNC_KEEPALIVE_SECS";
pub const UPLOAD_CAP_ENV_VAR: &str = "SESSION_SYNC_UPLOAD_CAP";
pub const DEDUP_BUCKET_ENV_VAR: &str = "SESSION_SYNC_DEDUP_BUCKET_SECS";

pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const DEFAULT_UPLOAD_CAP: usize = 5;
pub const DEFAULT_DEDUP_BUCKET: Duration = Duration::from_secs(5);

/// Reconnect and keep-alive policy of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Delay before the first retry; doubled for every further consecutive failure.
    pub reconnect_base: Duration,
    /// Consecutive failures after which the transport gives up.
    pub max_attempts: u32,
    pub keep_alive: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_base: DEFAULT_RECONNECT_BASE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub api_base_url: String,
    /// Explicit socket base; derived from `api_base_url` when absent.
    pub socket_url: Option<String>,
    pub transport: TransportConfig,
    pub upload_cap: usize,
    pub dedup_bucket: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            socket_url: None,
            transport: TransportConfig::default(),
            upload_cap: DEFAULT_UPLOAD_CAP,
            dedup_bucket: DEFAULT_DEDUP_BUCKET,
        }
    }
}

impl SyncConfig {
    /// Missing, unparseable and zero values fall back to the defaults. A zero
    /// reconnect base is allowed and retries immediately.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base_url: env_string_opt(API_URL_ENV_VAR).unwrap_or(defaults.api_base_url),
            socket_url: env_string_opt(SOCKET_URL_ENV_VAR),
            transport: TransportConfig {
                reconnect_base: env_u64(RECONNECT_BASE_ENV_VAR)
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_RECONNECT_BASE),
                max_attempts: env_positive(RECONNECT_MAX_ATTEMPTS_ENV_VAR)
                    .and_then(|value| u32::try_from(value).ok())
                    .unwrap_or(DEFAULT_MAX_ATTEMPTS),
                keep_alive: env_positive(KEEPALIVE_ENV_VAR)
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_KEEP_ALIVE),
            },
            upload_cap: env_positive(UPLOAD_CAP_ENV_VAR)
                .and_then(|value| usize::try_from(value).ok())
                .unwrap_or(DEFAULT_UPLOAD_CAP),
            dedup_bucket: env_positive(DEDUP_BUCKET_ENV_VAR)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_DEDUP_BUCKET),
        }
    }

    /// Endpoint handed to the transport. `http(s)` bases are mapped onto the
    /// socket scheme when the URL is built.
    pub fn socket_endpoint(&self) -> &str {
        self.socket_url.as_deref().unwrap_or(&self.api_base_url)
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_string_opt(key).and_then(|value| value.parse::<u64>().ok())
}

fn env_positive(key: &str) -> Option<u64> {
    env_u64(key).filter(|value| *value > 0)
}
