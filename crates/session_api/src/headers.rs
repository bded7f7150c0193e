use std::collections::BTreeMap;

use crate::config::SessionApiConfig;
use crate::error::SessionApiError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_AGENT: &str = "user-agent";

/// Build a deterministic header map for REST requests.
pub fn build_headers(
    config: &SessionApiConfig,
) -> Result<BTreeMap<String, String>, SessionApiError> {
    let credential = config.credential.trim();
    if credential.is_empty() {
        return Err(SessionApiError::MissingCredential);
    }

    let mut headers = BTreeMap::new();
    headers.insert(
        HEADER_AUTHORIZATION.to_owned(),
        format!("Bearer {credential}"),
    );
    headers.insert(HEADER_ACCEPT.to_owned(), "application/json".to_owned());
    headers.insert(
        HEADER_USER_AGENT.to_owned(),
        config
            .user_agent
            .as_deref()
            .and_then(sanitize_nonempty)
            .unwrap_or_else(default_user_agent),
    );

    for (key, value) in &config.extra_headers {
        let key = key.trim().to_ascii_lowercase();
        if key == HEADER_AUTHORIZATION {
            continue;
        }
        headers.insert(key, value.trim().to_owned());
    }

    Ok(headers)
}

fn sanitize_nonempty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn default_user_agent() -> String {
    format!("session_api/{}", env!("CARGO_PKG_VERSION"))
}
