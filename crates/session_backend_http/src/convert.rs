use session_api::frames::{FrameError, WireMessage};
use session_api::payload::{
    DatasetPayload, HistoryItem, SessionPayload, SettingsPayload, SourcePayload, WireRole,
};
use session_api::timestamp::parse_timestamp;
use session_api::{SessionApiError, SocketFrame};
use session_backend::{
    BackendError, DatasetSummary, Envelope, InboundFrame, Message, MessageKind, ProtocolError,
    RetrievalWeights, Role, Session, SessionId, SessionSettings, Source,
};
use time::OffsetDateTime;
use tracing::warn;

pub fn session_from_payload(payload: SessionPayload) -> Session {
    Session {
        id: SessionId::new(payload.id),
        owner_id: payload.user_id,
        title: payload.title,
        description: payload.description,
        documents: payload.documents,
        dataset: payload.dataset.map(dataset_from_payload),
        settings: settings_from_payload(&payload.settings),
        created_at: payload.created_at.as_deref().and_then(parse_timestamp),
        updated_at: payload.updated_at.as_deref().and_then(parse_timestamp),
    }
}

/// Absent fields keep the local defaults.
fn settings_from_payload(payload: &SettingsPayload) -> SessionSettings {
    let defaults = SessionSettings::default();
    SessionSettings {
        weights: RetrievalWeights {
            semantic: payload.semantic_weight.unwrap_or(defaults.weights.semantic),
            keyword: payload.keyword_weight.unwrap_or(defaults.weights.keyword),
            knowledge_graph: payload
                .knowledge_graph_weight
                .unwrap_or(defaults.weights.knowledge_graph),
        },
        temperature: payload.temperature.unwrap_or(defaults.temperature),
        max_context_length: payload
            .max_context_length
            .unwrap_or(defaults.max_context_length),
        similarity_threshold: payload
            .similarity_threshold
            .unwrap_or(defaults.similarity_threshold),
    }
}

pub(crate) fn settings_to_payload(settings: &SessionSettings) -> SettingsPayload {
    SettingsPayload {
        semantic_weight: Some(settings.weights.semantic),
        keyword_weight: Some(settings.weights.keyword),
        knowledge_graph_weight: Some(settings.weights.knowledge_graph),
        temperature: Some(settings.temperature),
        max_context_length: Some(settings.max_context_length),
        similarity_threshold: Some(settings.similarity_threshold),
    }
}

pub(crate) fn dataset_from_payload(payload: DatasetPayload) -> DatasetSummary {
    let flat = payload.flatten();
    DatasetSummary {
        name: flat.name,
        path: flat.path,
        rows: flat.rows,
        columns: flat.columns,
        column_names: flat.column_names,
        missing_values: flat.missing_values,
    }
}

fn role_from_wire(role: WireRole) -> Role {
    match role {
        WireRole::User => Role::User,
        WireRole::Assistant => Role::Assistant,
    }
}

fn sources_from_payload(sources: Vec<SourcePayload>) -> Vec<Source> {
    sources
        .into_iter()
        .map(|source| Source {
            title: source.title,
            score: source.score,
        })
        .collect()
}

/// A bound dataset wins over sources. An assistant message carrying only a
/// placeholder dataset is the inline upload prompt.
fn message_kind(role: Role, sources: Vec<SourcePayload>, dataset: Option<DatasetPayload>) -> MessageKind {
    if let Some(dataset) = dataset.map(dataset_from_payload) {
        if !dataset.is_placeholder() {
            return MessageKind::Dataset { dataset };
        }
        if role == Role::Assistant {
            return MessageKind::UploadPrompt;
        }
    }
    if sources.is_empty() {
        MessageKind::Text
    } else {
        MessageKind::Answer {
            sources: sources_from_payload(sources),
        }
    }
}

fn timestamp_or(value: Option<&str>, fallback: OffsetDateTime) -> OffsetDateTime {
    value.and_then(parse_timestamp).unwrap_or(fallback)
}

/// Expand one persisted history item. A legacy exchange yields the question
/// followed by the answer; entries with an unknown role are skipped.
pub fn message_from_history(item: HistoryItem, now: OffsetDateTime) -> Vec<Message> {
    match item {
        HistoryItem::Message(entry) => {
            let Some(role) = WireRole::parse(&entry.role).map(role_from_wire) else {
                warn!(role = %entry.role, "skipping history entry with unknown role");
                return Vec::new();
            };
            let timestamp = timestamp_or(entry.timestamp.as_deref(), now);
            let kind = message_kind(role, entry.sources, entry.dataset);
            vec![Message::new(role, entry.content, kind, timestamp)]
        }
        HistoryItem::Exchange(exchange) => {
            let timestamp = timestamp_or(exchange.timestamp.as_deref(), now);
            let kind = message_kind(Role::Assistant, exchange.sources, None);
            vec![
                Message::user_text(exchange.question, timestamp),
                Message::new(Role::Assistant, exchange.answer, kind, timestamp),
            ]
        }
    }
}

fn message_from_wire(message: WireMessage, now: OffsetDateTime) -> Message {
    let role = role_from_wire(message.role);
    let timestamp = timestamp_or(message.timestamp.as_deref(), now);
    let kind = message_kind(role, message.sources, message.dataset);
    Message::new(role, message.content, kind, timestamp)
}

/// Map one parsed socket frame onto the domain envelope. Socket-level pings
/// and pongs both surface as keep-alive traffic.
pub fn envelope_from_frame(
    frame: Result<SocketFrame, FrameError>,
    now: OffsetDateTime,
) -> InboundFrame {
    match frame {
        Ok(SocketFrame::Message(message)) => Ok(Envelope::Message(message_from_wire(message, now))),
        Ok(SocketFrame::Status { busy }) => Ok(Envelope::Status { busy }),
        Ok(SocketFrame::Error { description }) => Ok(Envelope::Error { description }),
        Ok(SocketFrame::Ping | SocketFrame::Pong) => Ok(Envelope::KeepAlive),
        Err(FrameError::Malformed(reason)) => Err(ProtocolError::Malformed(reason)),
        Err(FrameError::UnknownKind(kind)) => Err(ProtocolError::UnknownKind(kind)),
        Err(FrameError::MissingField { kind, field }) => {
            Err(ProtocolError::MissingField { kind, field })
        }
    }
}

/// `session_id` names the session a 404 refers to, when the request had one.
pub fn map_api_error(error: SessionApiError, session_id: Option<&SessionId>) -> BackendError {
    match error {
        SessionApiError::NotFound(path) => match session_id {
            Some(id) => BackendError::NotFound(id.clone()),
            None => BackendError::rejected(404, path),
        },
        SessionApiError::MissingCredential => {
            BackendError::Unauthorized("credential is required".to_owned())
        }
        SessionApiError::Status(status, message) if matches!(status.as_u16(), 401 | 403) => {
            BackendError::Unauthorized(message)
        }
        SessionApiError::Status(status, message) => BackendError::rejected(status.as_u16(), message),
        SessionApiError::Serde(error) => BackendError::Decode(error.to_string()),
        SessionApiError::Request(error) if error.is_decode() => {
            BackendError::Decode(error.to_string())
        }
        other => BackendError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use session_api::parse_socket_frame;
    use time::macros::datetime;

    use super::*;

    fn now() -> OffsetDateTime {
        datetime!(2024-03-01 12:00:00 UTC)
    }

    fn history_item(json: &str) -> HistoryItem {
        serde_json::from_str(json).expect("history item json")
    }

    #[test]
    fn legacy_exchange_expands_into_question_then_answer() {
        let item = history_item(
            r#"{"question":"how many rows?","answer":"1000","sources":[{"title":"doc","similarity":0.9}],"timestamp":"2024-01-01T10:00:00"}"#,
        );

        let messages = message_from_history(item, now());

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::user_text("how many rows?", datetime!(2024-01-01 10:00:00 UTC)));
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(
            messages[1].sources(),
            &[Source {
                title: "doc".to_owned(),
                score: 0.9
            }]
        );
    }

    #[test]
    fn role_aliases_map_to_assistant_and_unknown_roles_are_skipped() {
        let analyzer = history_item(r#"{"role":"analyzer","content":"hi"}"#);
        let unknown = history_item(r#"{"role":"narrator","content":"hi"}"#);

        let messages = message_from_history(analyzer, now());
        assert_eq!(messages, vec![Message::assistant_text("hi", now())]);
        assert!(message_from_history(unknown, now()).is_empty());
    }

    #[test]
    fn unparseable_timestamp_falls_back_to_receive_time() {
        let item = history_item(r#"{"role":"user","content":"q","timestamp":"yesterday"}"#);
        assert_eq!(message_from_history(item, now())[0].timestamp, now());
    }

    #[test]
    fn placeholder_dataset_on_assistant_message_is_upload_prompt() {
        let item = history_item(
            r#"{"role":"assistant","content":"upload please","dataset":{"name":"","path":""}}"#,
        );
        assert_eq!(message_from_history(item, now())[0].kind, MessageKind::UploadPrompt);
    }

    #[test]
    fn nested_dataset_statistics_produce_dataset_message() {
        let frame = parse_socket_frame(
            r#"{"type":"info","role":"system","content":"ready","dataset":{"path":"/data/a.csv","statistics":{"rows":3,"column_names":["x","y"]}}}"#,
        );

        let Ok(Envelope::Message(message)) = envelope_from_frame(frame, now()) else {
            panic!("expected message envelope");
        };
        let dataset = message.dataset_summary().expect("dataset kind");
        assert_eq!(dataset.name, "a.csv");
        assert_eq!(dataset.rows, 3);
        assert_eq!(dataset.columns, 2);
    }

    #[test]
    fn socket_frames_map_onto_envelopes() {
        assert_eq!(
            envelope_from_frame(parse_socket_frame(r#"{"type":"ping"}"#), now()),
            Ok(Envelope::KeepAlive)
        );
        assert_eq!(
            envelope_from_frame(
                parse_socket_frame(r#"{"type":"loading","content":{"is_loading":true}}"#),
                now()
            ),
            Ok(Envelope::Status { busy: true })
        );
        assert!(matches!(
            envelope_from_frame(parse_socket_frame(r#"{"type":"telemetry"}"#), now()),
            Err(ProtocolError::UnknownKind(kind)) if kind == "telemetry"
        ));
        assert!(matches!(
            envelope_from_frame(parse_socket_frame("not json"), now()),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn settings_round_trip_through_payload() {
        let settings = SessionSettings {
            temperature: 0.2,
            ..SessionSettings::default()
        };
        assert_eq!(settings_from_payload(&settings_to_payload(&settings)), settings);
        assert_eq!(
            settings_from_payload(&SettingsPayload::default()),
            SessionSettings::default()
        );
    }

    #[test]
    fn api_errors_map_onto_backend_errors() {
        let id = SessionId::new("s-9");
        assert!(matches!(
            map_api_error(SessionApiError::NotFound("/rag/session/s-9".to_owned()), Some(&id)),
            BackendError::NotFound(found) if found == id
        ));
        assert!(matches!(
            map_api_error(SessionApiError::NotFound("/rag/history".to_owned()), None),
            BackendError::Rejected { status: 404, .. }
        ));
        assert!(matches!(
            map_api_error(SessionApiError::MissingCredential, None),
            BackendError::Unauthorized(_)
        ));

        let decode = serde_json::from_str::<SessionPayload>("{").expect_err("invalid json");
        assert!(matches!(
            map_api_error(SessionApiError::Serde(decode), None),
            BackendError::Decode(_)
        ));
    }
}
