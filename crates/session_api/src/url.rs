use url::Url;

use crate::error::SessionApiError;

/// Default base URL for session REST requests.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Query parameter carrying the credential on socket connections.
pub const SOCKET_TOKEN_PARAM: &str = "token";

/// Trim a base URL and drop trailing slashes, falling back to the default.
pub fn normalize_base_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };
    base.trim_end_matches('/').to_string()
}

/// Append percent-encoded path segments to a base URL.
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url, SessionApiError> {
    let mut url = parse_base(base)?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| SessionApiError::InvalidBaseUrl(base.to_owned()))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url)
}

/// Map a REST base URL onto the socket scheme (`http` to `ws`, `https` to `wss`).
pub fn derive_socket_base(rest_base: &str) -> Result<String, SessionApiError> {
    let mut url = parse_base(rest_base)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(SessionApiError::InvalidBaseUrl(format!(
                "unsupported scheme '{other}' in {rest_base}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| SessionApiError::InvalidBaseUrl(rest_base.to_owned()))?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Build `{socket_base}/ws/{session_id}/chat?token={credential}`.
///
/// The credential travels only in the query string; socket connections never
/// carry an `Authorization` header.
pub fn socket_url(
    socket_base: &str,
    session_id: &str,
    credential: &str,
) -> Result<Url, SessionApiError> {
    let base = derive_socket_base(socket_base)?;
    let mut url = endpoint(&base, &["ws", session_id, "chat"])?;
    url.query_pairs_mut()
        .clear()
        .append_pair(SOCKET_TOKEN_PARAM, credential);
    Ok(url)
}

fn parse_base(base: &str) -> Result<Url, SessionApiError> {
    Url::parse(&normalize_base_url(base))
        .map_err(|error| SessionApiError::InvalidBaseUrl(format!("{base}: {error}")))
}
