use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use session_api::frames::OutgoingFrame;
use session_api::{parse_socket_frame, socket_url};
use session_backend::{
    Connection, Connector, Envelope, InboundFrame, OutboundFrame, ProtocolError, TransportError,
    TransportTarget,
};
use time::OffsetDateTime;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::convert::envelope_from_frame;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens `{endpoint}/ws/{session_id}/chat?token=..` sockets.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl WsConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, target: &TransportTarget) -> Result<Box<dyn Connection>, TransportError> {
        let url = socket_url(&target.endpoint, target.session_id.as_str(), &target.credential)
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        debug!(session_id = %target.session_id, endpoint = %target.endpoint, "opening socket");

        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                TransportError::Connect(format!(
                    "handshake timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

fn encode(frame: &OutboundFrame) -> Result<String, TransportError> {
    let outgoing = match frame {
        OutboundFrame::UserMessage { content } => OutgoingFrame::Message { content },
        OutboundFrame::KeepAlive => OutgoingFrame::Ping,
    };
    outgoing
        .encode()
        .map_err(|error| TransportError::Send(error.to_string()))
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
        let text = encode(frame)?;
        self.stream
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|error| TransportError::Send(error.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(error) => return Some(Err(TransportError::Closed(error.to_string()))),
            };

            let frame = match message {
                WsMessage::Text(text) => envelope_from_frame(
                    parse_socket_frame(text.as_str()),
                    OffsetDateTime::now_utc(),
                ),
                WsMessage::Binary(_) => Err(ProtocolError::Malformed(
                    "binary frames are not supported".to_owned(),
                )),
                WsMessage::Ping(_) | WsMessage::Pong(_) => Ok(Envelope::KeepAlive),
                WsMessage::Close(close) => {
                    debug!(?close, "socket closed by peer");
                    return None;
                }
                WsMessage::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }

    async fn close(&mut self) {
        if let Err(error) = self.stream.close(None).await {
            debug!(%error, "socket close handshake failed");
        }
    }
}
