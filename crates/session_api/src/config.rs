use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::url::DEFAULT_BASE_URL;

/// Transport configuration for session API requests.
#[derive(Clone)]
pub struct SessionApiConfig {
    /// Bearer credential passed to `Authorization` on REST calls.
    pub credential: String,
    /// Base URL for REST endpoints.
    pub base_url: String,
    /// Base URL for the socket endpoint. Derived from `base_url` when unset.
    pub socket_url: Option<String>,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
    /// Optional request timeout.
    pub timeout: Option<Duration>,
}

impl Default for SessionApiConfig {
    fn default() -> Self {
        Self {
            credential: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            socket_url: None,
            user_agent: None,
            extra_headers: BTreeMap::new(),
            timeout: None,
        }
    }
}

impl fmt::Debug for SessionApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionApiConfig")
            .field("credential", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("socket_url", &self.socket_url)
            .field("user_agent", &self.user_agent)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SessionApiConfig {
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_socket_url(mut self, socket_url: impl Into<String>) -> Self {
        self.socket_url = Some(socket_url.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}
