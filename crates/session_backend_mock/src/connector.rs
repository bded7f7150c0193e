use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use session_backend::{
    Connection, Connector, Envelope, InboundFrame, OutboundFrame, ProtocolError, TransportError,
    TransportTarget,
};
use tokio::sync::mpsc;

use crate::lock_unpoisoned;

/// Outcome of one scripted connect attempt. Unscripted attempts accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectScript {
    Accept,
    Fail(String),
}

enum PeerAction {
    Deliver(InboundFrame),
    Drop,
}

/// Server side of one mock connection.
#[derive(Clone)]
pub struct MockPeer {
    inbound: mpsc::UnboundedSender<PeerAction>,
    sent: Arc<Mutex<Vec<OutboundFrame>>>,
    closed: Arc<AtomicBool>,
    target: TransportTarget,
}

impl MockPeer {
    /// Deliver an envelope to the client. Returns false once the client side is gone.
    pub fn push(&self, envelope: Envelope) -> bool {
        self.inbound.send(PeerAction::Deliver(Ok(envelope))).is_ok()
    }

    pub fn push_malformed(&self, error: ProtocolError) -> bool {
        self.inbound.send(PeerAction::Deliver(Err(error))).is_ok()
    }

    /// Simulate an unexpected connection drop.
    pub fn drop_connection(&self) {
        let _ = self.inbound.send(PeerAction::Drop);
    }

    /// Frames written by the client, in order.
    pub fn sent(&self) -> Vec<OutboundFrame> {
        lock_unpoisoned(&self.sent).clone()
    }

    /// True once the client closed this connection cleanly.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn target(&self) -> &TransportTarget {
        &self.target
    }
}

struct MockConnection {
    inbound: mpsc::UnboundedReceiver<PeerAction>,
    sent: Arc<Mutex<Vec<OutboundFrame>>>,
    closed: Arc<AtomicBool>,
    dropped: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
        if self.dropped || self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed("mock connection is gone".to_owned()));
        }
        lock_unpoisoned(&self.sent).push(frame.clone());
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        if self.dropped {
            return None;
        }
        match self.inbound.recv().await {
            Some(PeerAction::Deliver(frame)) => Some(Ok(frame)),
            Some(PeerAction::Drop) | None => {
                self.dropped = true;
                None
            }
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[derive(Default)]
struct ConnectorState {
    script: VecDeque<ConnectScript>,
    attempts: usize,
    targets: Vec<TransportTarget>,
    peers: Vec<MockPeer>,
}

/// Connector whose attempts follow a script and whose peers stay reachable
/// from the test.
#[derive(Default)]
pub struct MockConnector {
    state: Mutex<ConnectorState>,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_script(script: impl IntoIterator<Item = ConnectScript>) -> Self {
        let connector = Self::default();
        connector.push_script(script);
        connector
    }

    pub fn push_script(&self, script: impl IntoIterator<Item = ConnectScript>) {
        lock_unpoisoned(&self.state).script.extend(script);
    }

    /// Number of connect attempts so far, successful or not.
    pub fn attempts(&self) -> usize {
        lock_unpoisoned(&self.state).attempts
    }

    pub fn targets(&self) -> Vec<TransportTarget> {
        lock_unpoisoned(&self.state).targets.clone()
    }

    pub fn peers(&self) -> Vec<MockPeer> {
        lock_unpoisoned(&self.state).peers.clone()
    }

    pub fn latest_peer(&self) -> Option<MockPeer> {
        lock_unpoisoned(&self.state).peers.last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &TransportTarget) -> Result<Box<dyn Connection>, TransportError> {
        let mut state = lock_unpoisoned(&self.state);
        state.attempts += 1;
        state.targets.push(target.clone());

        match state.script.pop_front().unwrap_or(ConnectScript::Accept) {
            ConnectScript::Fail(reason) => Err(TransportError::Connect(reason)),
            ConnectScript::Accept => {
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let sent = Arc::new(Mutex::new(Vec::new()));
                let closed = Arc::new(AtomicBool::new(false));
                state.peers.push(MockPeer {
                    inbound: inbound_tx,
                    sent: Arc::clone(&sent),
                    closed: Arc::clone(&closed),
                    target: target.clone(),
                });
                Ok(Box::new(MockConnection {
                    inbound: inbound_rx,
                    sent,
                    closed,
                    dropped: false,
                }))
            }
        }
    }
}
