//! Reconnecting, session-scoped transport.
//!
//! One background task owns the live connection. It runs the
//! `connecting -> open -> reconnect-pending` loop, sends keep-alive frames
//! while idle, and forwards inbound envelopes to observers in arrival order.
//! Every state write and observer notification happens under one lock that
//! also checks the task's cancellation token, so nothing is emitted once
//! [`TransportClient::begin_close`] has run.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use session_backend::{
    Connection, ConnectionState, Connector, Envelope, OutboundFrame, TransportError,
    TransportTarget,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::TransportConfig;

/// Upper bound on the close handshake of a cancelled connection.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Largest backoff exponent; keeps the shift in range for long retry ceilings.
const MAX_BACKOFF_SHIFT: u32 = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    /// Inbound envelope other than keep-alive traffic.
    Envelope(Envelope),
    /// Terminal failure after the reconnect ceiling was reached.
    Failed(TransportError),
}

type Observer = Box<dyn FnMut(&TransportEvent) + Send>;

struct Shared {
    state: watch::Sender<ConnectionState>,
    observers: Mutex<Vec<Observer>>,
}

impl Shared {
    fn lock_observers(&self) -> MutexGuard<'_, Vec<Observer>> {
        lock_unpoisoned(&self.observers)
    }

    fn notify(observers: &mut [Observer], event: &TransportEvent) {
        for observer in observers.iter_mut() {
            observer(event);
        }
    }

    /// Writes `next` unless `cancel` fired. Returns false when cancelled.
    fn transition(&self, next: ConnectionState, cancel: &CancellationToken) -> bool {
        let mut observers = self.lock_observers();
        if cancel.is_cancelled() {
            return false;
        }
        self.write_state(&mut observers, next);
        true
    }

    /// Unconditional write, used by the owner after the task has been cancelled.
    fn force_transition(&self, next: ConnectionState) {
        let mut observers = self.lock_observers();
        self.write_state(&mut observers, next);
    }

    fn write_state(&self, observers: &mut [Observer], next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "transport state changed");
            Self::notify(observers, &TransportEvent::StateChanged(next));
        }
    }

    fn deliver(&self, envelope: Envelope, cancel: &CancellationToken) {
        let mut observers = self.lock_observers();
        if cancel.is_cancelled() {
            return;
        }
        Self::notify(&mut observers, &TransportEvent::Envelope(envelope));
    }

    fn fail(&self, error: TransportError, cancel: &CancellationToken) {
        let mut observers = self.lock_observers();
        if cancel.is_cancelled() {
            return;
        }
        self.write_state(&mut observers, ConnectionState::Failed);
        Self::notify(&mut observers, &TransportEvent::Failed(error));
    }
}

struct ActiveConnection {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns at most one connection task at a time.
pub struct TransportClient {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    shared: Arc<Shared>,
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
    active: Option<ActiveConnection>,
    target: Option<TransportTarget>,
}

impl TransportClient {
    pub fn new(connector: Arc<dyn Connector>, config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            connector,
            config,
            shared: Arc::new(Shared {
                state,
                observers: Mutex::new(Vec::new()),
            }),
            outbound: None,
            active: None,
            target: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Target of the most recent [`TransportClient::open`].
    pub fn target(&self) -> Option<&TransportTarget> {
        self.target.as_ref()
    }

    /// Registers an observer. Observers run in registration order on the
    /// connection task and must not call back into this client.
    pub fn on_message(&self, observer: impl FnMut(&TransportEvent) + Send + 'static) {
        self.shared.lock_observers().push(Box::new(observer));
    }

    /// Starts connecting to `target`. Reconnects reuse the same target.
    ///
    /// Refused while a connection exists, is scheduled, or is still closing.
    pub fn open(&mut self, target: TransportTarget) -> Result<(), TransportError> {
        if !self.state().is_quiescent() {
            return Err(TransportError::AlreadyActive);
        }
        if let Some(previous) = self.active.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.shared
            .force_transition(ConnectionState::Connecting);
        info!(session_id = %target.session_id, "opening transport");

        let task = tokio::spawn(run_connection(
            Arc::clone(&self.connector),
            self.config,
            target.clone(),
            Arc::clone(&self.shared),
            cancel.clone(),
            outbound_rx,
        ));
        self.outbound = Some(outbound_tx);
        self.active = Some(ActiveConnection { cancel, task });
        self.target = Some(target);
        Ok(())
    }

    /// Fire-and-forget send. Returns false, without error, when the
    /// connection is not open and the frame was dropped.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        if !self.state().is_open() {
            debug!("dropping outbound frame; transport is not open");
            return false;
        }
        match &self.outbound {
            Some(outbound) => outbound.send(frame).is_ok(),
            None => false,
        }
    }

    /// Cancels the connection task and any scheduled retry. The returned
    /// handle resolves once the task has finished and the state is `idle`.
    pub fn begin_close(&mut self) -> PendingClose {
        self.outbound = None;
        let task = match self.active.take() {
            Some(active) => {
                active.cancel.cancel();
                self.shared.force_transition(ConnectionState::Closing);
                Some(active.task)
            }
            None => None,
        };
        PendingClose {
            task,
            shared: Arc::clone(&self.shared),
        }
    }

    pub async fn close(&mut self) {
        self.begin_close().finished().await;
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}

/// In-progress clean shutdown returned by [`TransportClient::begin_close`].
pub struct PendingClose {
    task: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl PendingClose {
    pub async fn finished(self) {
        if let Some(task) = self.task {
            if let Err(error) = task.await {
                warn!(%error, "transport task ended abnormally");
            }
        }
        self.shared.force_transition(ConnectionState::Idle);
    }
}

/// Delay before reconnect attempt `attempt`, counted from 0 after a drop:
/// `base * 2^attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1_u32 << attempt.min(MAX_BACKOFF_SHIFT))
}

enum PumpExit {
    Cancelled,
    Dropped(String),
}

async fn run_connection(
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    target: TransportTarget,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    // Reconnect attempts made since the last successful open.
    let mut retries: u32 = 0;

    loop {
        if !shared.transition(ConnectionState::Connecting, &cancel) {
            return;
        }

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = connector.connect(&target) => result,
        };

        match connected {
            Ok(mut connection) => {
                retries = 0;
                if !shared.transition(ConnectionState::Open, &cancel) {
                    shutdown_connection(connection.as_mut()).await;
                    return;
                }

                match pump(connection.as_mut(), &config, &shared, &cancel, &mut outbound).await {
                    PumpExit::Cancelled => {
                        shutdown_connection(connection.as_mut()).await;
                        return;
                    }
                    PumpExit::Dropped(reason) => {
                        warn!(session_id = %target.session_id, %reason, "connection dropped");
                    }
                }

                // Frames queued for the lost connection are not replayed.
                while outbound.try_recv().is_ok() {}
            }
            Err(error) => {
                warn!(session_id = %target.session_id, %error, "connect attempt failed");
            }
        }

        if retries >= config.max_attempts {
            warn!(session_id = %target.session_id, attempts = retries, "reconnect attempts exhausted");
            shared.fail(TransportError::Exhausted { attempts: retries }, &cancel);
            return;
        }

        if !shared.transition(ConnectionState::ReconnectPending, &cancel) {
            return;
        }
        let delay = backoff_delay(config.reconnect_base, retries);
        retries = retries.saturating_add(1);
        info!(
            session_id = %target.session_id,
            attempt = retries,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn pump(
    connection: &mut dyn Connection,
    config: &TransportConfig,
    shared: &Shared,
    cancel: &CancellationToken,
    outbound: &mut mpsc::UnboundedReceiver<OutboundFrame>,
) -> PumpExit {
    let period = config.keep_alive;
    let mut keep_alive = tokio::time::interval_at(Instant::now() + period, period);
    keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PumpExit::Cancelled,
            Some(frame) = outbound.recv() => {
                if let Err(error) = connection.send(&frame).await {
                    return PumpExit::Dropped(error.to_string());
                }
                keep_alive.reset();
            }
            _ = keep_alive.tick() => {
                trace!("sending keep-alive");
                if let Err(error) = connection.send(&OutboundFrame::KeepAlive).await {
                    return PumpExit::Dropped(error.to_string());
                }
            }
            inbound = connection.recv() => match inbound {
                None => return PumpExit::Dropped("closed by peer".to_owned()),
                Some(Err(error)) => return PumpExit::Dropped(error.to_string()),
                Some(Ok(Ok(Envelope::KeepAlive))) => trace!("keep-alive received"),
                Some(Ok(Ok(envelope))) => shared.deliver(envelope, cancel),
                Some(Ok(Err(error))) => warn!(%error, "dropping malformed frame"),
            },
        }
    }
}

async fn shutdown_connection(connection: &mut dyn Connection) {
    if tokio::time::timeout(CLOSE_GRACE, connection.close()).await.is_err() {
        debug!("close handshake timed out");
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_reconnect_attempt() {
        let base = Duration::from_millis(1000);
        let delays: Vec<u128> = (0..5)
            .map(|attempt| backoff_delay(base, attempt).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn backoff_saturates_for_large_attempt_counts() {
        let delay = backoff_delay(Duration::from_secs(1), 200);
        assert_eq!(delay, Duration::from_secs(1 << MAX_BACKOFF_SHIFT));
    }
}
