use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::payload::{DatasetPayload, SourcePayload, WireRole};

/// Inbound socket frame after alias normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketFrame {
    Message(WireMessage),
    Status { busy: bool },
    Error { description: String },
    Ping,
    Pong,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub role: WireRole,
    pub content: String,
    pub sources: Vec<SourcePayload>,
    pub dataset: Option<DatasetPayload>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unrecognized frame kind '{0}'")]
    UnknownKind(String),

    #[error("frame kind '{kind}' is missing field '{field}'")]
    MissingField { kind: String, field: &'static str },
}

impl FrameError {
    fn missing(kind: &str, field: &'static str) -> Self {
        Self::MissingField {
            kind: kind.to_owned(),
            field,
        }
    }
}

/// Outbound socket frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingFrame<'a> {
    Message { content: &'a str },
    Ping,
}

impl OutgoingFrame<'_> {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse one UTF-8 JSON text frame.
pub fn parse_socket_frame(text: &str) -> Result<SocketFrame, FrameError> {
    let value = serde_json::from_str::<Value>(text)
        .map_err(|error| FrameError::Malformed(error.to_string()))?;
    map_frame(value)
}

fn map_frame(value: Value) -> Result<SocketFrame, FrameError> {
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(FrameError::Malformed("missing 'type'".to_owned()));
    };

    match kind {
        "message" | "info" | "initialize" => map_message(kind, &value).map(SocketFrame::Message),
        "status" => {
            let busy = value
                .get("busy")
                .or_else(|| value.get("content").and_then(|content| content.get("busy")))
                .and_then(Value::as_bool)
                .ok_or_else(|| FrameError::missing(kind, "busy"))?;
            Ok(SocketFrame::Status { busy })
        }
        "loading" => {
            let content = value.get("content");
            let busy = content
                .and_then(|content| content.get("is_loading"))
                .or(content)
                .and_then(Value::as_bool)
                .ok_or_else(|| FrameError::missing(kind, "is_loading"))?;
            Ok(SocketFrame::Status { busy })
        }
        "error" => Ok(SocketFrame::Error {
            description: error_description(&value),
        }),
        "ping" => Ok(SocketFrame::Ping),
        "pong" => Ok(SocketFrame::Pong),
        other => Err(FrameError::UnknownKind(other.to_owned())),
    }
}

fn map_message(kind: &str, value: &Value) -> Result<WireMessage, FrameError> {
    let content = value
        .get("content")
        .ok_or_else(|| FrameError::missing(kind, "content"))?;

    // Either a bare string with metadata beside it, or an object carrying the
    // text under one of several keys.
    let (text, body) = match content {
        Value::String(text) => (text.clone(), value),
        Value::Object(_) => {
            let text = ["content", "answer", "message"]
                .iter()
                .find_map(|key| content.get(*key).and_then(Value::as_str))
                .ok_or_else(|| FrameError::missing(kind, "content"))?;
            (text.to_owned(), content)
        }
        _ => return Err(FrameError::missing(kind, "content")),
    };

    let role = match body.get("role").or_else(|| value.get("role")).and_then(Value::as_str) {
        Some(raw) => WireRole::parse(raw)
            .ok_or_else(|| FrameError::Malformed(format!("unknown role '{raw}'")))?,
        None => WireRole::Assistant,
    };

    let sources = match body.get("sources").or_else(|| body.get("source")) {
        Some(Value::Null) | None => Vec::new(),
        Some(raw) => serde_json::from_value::<Vec<SourcePayload>>(raw.clone())
            .map_err(|error| FrameError::Malformed(format!("sources: {error}")))?,
    };

    let dataset = match body.get("dataset").or_else(|| value.get("dataset")) {
        Some(Value::Null) | None => None,
        Some(raw) => Some(
            serde_json::from_value::<DatasetPayload>(raw.clone())
                .map_err(|error| FrameError::Malformed(format!("dataset: {error}")))?,
        ),
    };

    let timestamp = body
        .get("timestamp")
        .or_else(|| value.get("timestamp"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    Ok(WireMessage {
        role,
        content: text,
        sources,
        dataset,
        timestamp,
    })
}

fn error_description(value: &Value) -> String {
    let content = value.get("content");
    content
        .and_then(Value::as_str)
        .or_else(|| content.and_then(|content| content.get("message")).and_then(Value::as_str))
        .or_else(|| content.and_then(|content| content.get("detail")).and_then(Value::as_str))
        .or_else(|| value.get("message").and_then(Value::as_str))
        .filter(|text| !text.trim().is_empty())
        .unwrap_or("unknown error")
        .to_owned()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn string_content_defaults_to_assistant() {
        let frame = parse_socket_frame(
            r#"{"type":"message","content":"Hi there","timestamp":"2024-02-01T10:00:00"}"#,
        )
        .expect("message frame");

        assert_eq!(
            frame,
            SocketFrame::Message(WireMessage {
                role: WireRole::Assistant,
                content: "Hi there".to_owned(),
                sources: Vec::new(),
                dataset: None,
                timestamp: Some("2024-02-01T10:00:00".to_owned()),
            })
        );
    }

    #[test]
    fn object_content_carries_answer_and_sources() {
        let frame = parse_socket_frame(
            r#"{"type":"message","content":{"answer":"42","sources":[{"title":"guide.pdf","similarity":0.91}]}}"#,
        )
        .expect("answer frame");

        let SocketFrame::Message(message) = frame else {
            panic!("expected message frame");
        };
        assert_eq!(message.content, "42");
        assert_eq!(
            message.sources,
            vec![SourcePayload {
                title: "guide.pdf".to_owned(),
                score: 0.91,
            }]
        );
    }

    #[test]
    fn info_and_initialize_alias_to_message() {
        for kind in ["info", "initialize"] {
            let frame = parse_socket_frame(&format!(r#"{{"type":"{kind}","content":"ready"}}"#))
                .expect("alias frame");
            assert!(matches!(frame, SocketFrame::Message(ref message) if message.content == "ready"));
        }
    }

    #[test]
    fn loading_alias_maps_to_status() {
        assert_eq!(
            parse_socket_frame(r#"{"type":"loading","content":{"is_loading":true}}"#),
            Ok(SocketFrame::Status { busy: true })
        );
        assert_eq!(
            parse_socket_frame(r#"{"type":"status","busy":false}"#),
            Ok(SocketFrame::Status { busy: false })
        );
    }

    #[test]
    fn error_frames_extract_description() {
        assert_eq!(
            parse_socket_frame(r#"{"type":"error","content":"rate limited"}"#),
            Ok(SocketFrame::Error {
                description: "rate limited".to_owned(),
            })
        );
        assert_eq!(
            parse_socket_frame(r#"{"type":"error","content":{"detail":"boom"}}"#),
            Ok(SocketFrame::Error {
                description: "boom".to_owned(),
            })
        );
        assert_eq!(
            parse_socket_frame(r#"{"type":"error"}"#),
            Ok(SocketFrame::Error {
                description: "unknown error".to_owned(),
            })
        );
    }

    #[test]
    fn malformed_frames_are_reported() {
        assert!(matches!(
            parse_socket_frame("not json"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            parse_socket_frame(r#"{"content":"x"}"#),
            Err(FrameError::Malformed(_))
        ));
        assert_eq!(
            parse_socket_frame(r#"{"type":"telemetry"}"#),
            Err(FrameError::UnknownKind("telemetry".to_owned()))
        );
        assert_eq!(
            parse_socket_frame(r#"{"type":"message"}"#),
            Err(FrameError::MissingField {
                kind: "message".to_owned(),
                field: "content",
            })
        );
    }

    #[test]
    fn outgoing_frames_match_wire_shape() {
        assert_eq!(
            OutgoingFrame::Message { content: "hello" }
                .encode()
                .expect("encode"),
            r#"{"type":"message","content":"hello"}"#
        );
        assert_eq!(
            OutgoingFrame::Ping.encode().expect("encode"),
            r#"{"type":"ping"}"#
        );
    }
}
