use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionApiError {
    #[error("credential is required")]
    MissingCredential,

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid header {0}")]
    InvalidHeader(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {0} {1}")]
    Status(StatusCode, String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(
        "retry exhausted after max attempts (status: {}, last_error: {last_error:?})",
        status_label(.status)
    )]
    RetryExhausted {
        status: Option<StatusCode>,
        last_error: Option<String>,
    },
}

impl SessionApiError {
    /// HTTP status carried by the error, when one was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(status, _) => Some(*status),
            Self::NotFound(_) => Some(StatusCode::NOT_FOUND),
            Self::RetryExhausted { status, .. } => *status,
            _ => None,
        }
    }
}

fn status_label(status: &Option<StatusCode>) -> String {
    status
        .map(|status| status.as_u16().to_string())
        .unwrap_or_else(|| "n/a".to_owned())
}

/// Error body shapes observed from the backend: `{"detail": ".."}` and
/// `{"error": {"message": ".."}}`.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    detail: Option<serde_json::Value>,
    error: Option<ErrorPayloadFields>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayloadFields {
    message: Option<String>,
}

pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorPayload>(body) {
        let detail = payload.detail.and_then(|detail| match detail {
            serde_json::Value::String(text) => Some(text),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        });
        let message = detail.or_else(|| payload.error.and_then(|error| error.message));
        if let Some(message) = message.filter(|message| !message.trim().is_empty()) {
            return message;
        }
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_string_is_preferred() {
        assert_eq!(
            parse_error_message(StatusCode::NOT_FOUND, r#"{"detail":"Session not found"}"#),
            "Session not found"
        );
    }

    #[test]
    fn nested_error_message_is_used() {
        assert_eq!(
            parse_error_message(
                StatusCode::BAD_REQUEST,
                r#"{"error":{"message":"bad input"}}"#
            ),
            "bad input"
        );
    }

    #[test]
    fn structured_detail_is_rendered_as_json() {
        let message = parse_error_message(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"detail":[{"loc":["body","title"],"msg":"field required"}]}"#,
        );
        assert!(message.contains("field required"));
    }

    #[test]
    fn empty_body_falls_back_to_reason_phrase() {
        assert_eq!(
            parse_error_message(StatusCode::SERVICE_UNAVAILABLE, ""),
            "Service Unavailable"
        );
        assert_eq!(
            parse_error_message(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down"
        );
    }
}
