use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use session_backend::{
    ConnectionState, Envelope, OutboundFrame, ProtocolError, SessionId, TransportError,
    TransportTarget,
};
use session_backend_mock::{ConnectScript, MockConnector};
use session_sync::{TransportClient, TransportConfig, TransportEvent};

fn config() -> TransportConfig {
    TransportConfig {
        reconnect_base: Duration::from_secs(1),
        max_attempts: 5,
        keep_alive: Duration::from_secs(30),
    }
}

fn target() -> TransportTarget {
    TransportTarget {
        endpoint: "ws://mock".to_string(),
        session_id: SessionId::new("s-1"),
        credential: "token".to_string(),
    }
}

fn fails(count: usize) -> Vec<ConnectScript> {
    (0..count)
        .map(|attempt| ConnectScript::Fail(format!("refused #{attempt}")))
        .collect()
}

fn record(client: &TransportClient) -> Arc<Mutex<Vec<TransportEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    client.on_message(move |event| sink.lock().expect("events lock").push(event.clone()));
    events
}

fn snapshot(events: &Arc<Mutex<Vec<TransportEvent>>>) -> Vec<TransportEvent> {
    events.lock().expect("events lock").clone()
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn open_client(connector: &Arc<MockConnector>) -> (TransportClient, Arc<Mutex<Vec<TransportEvent>>>) {
    let mut client = TransportClient::new(connector.clone(), config());
    let events = record(&client);
    client.open(target()).expect("open");
    eventually("open", || client.state() == ConnectionState::Open).await;
    (client, events)
}

#[tokio::test(start_paused = true)]
async fn recovers_after_a_drop_and_three_failed_attempts() {
    let connector = Arc::new(MockConnector::new());
    let (client, events) = open_client(&connector).await;

    connector.push_script(fails(3));
    connector.latest_peer().expect("peer").drop_connection();

    eventually("second connection", || connector.peers().len() == 2).await;
    eventually("reopen", || client.state() == ConnectionState::Open).await;

    assert_eq!(connector.attempts(), 5);
    let events = snapshot(&events);
    assert!(!events
        .iter()
        .any(|event| matches!(event, TransportEvent::Failed(_))));
    assert!(events.contains(&TransportEvent::StateChanged(
        ConnectionState::ReconnectPending
    )));
}

#[tokio::test(start_paused = true)]
async fn recovers_on_the_last_reconnect_attempt() {
    let connector = Arc::new(MockConnector::new());
    let (client, events) = open_client(&connector).await;

    connector.push_script(fails(4));
    connector.latest_peer().expect("peer").drop_connection();

    eventually("second connection", || connector.peers().len() == 2).await;
    eventually("reopen", || client.state() == ConnectionState::Open).await;

    // Initial connect plus five reconnect attempts.
    assert_eq!(connector.attempts(), 6);
    assert!(!snapshot(&events)
        .iter()
        .any(|event| matches!(event, TransportEvent::Failed(_))));
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_five_failed_reconnect_attempts() {
    let connector = Arc::new(MockConnector::new());
    let (client, events) = open_client(&connector).await;

    connector.push_script(fails(5));
    connector.latest_peer().expect("peer").drop_connection();

    eventually("failure", || client.state() == ConnectionState::Failed).await;
    let events = snapshot(&events);
    assert_eq!(
        &events[events.len() - 2..],
        &[
            TransportEvent::StateChanged(ConnectionState::Failed),
            TransportEvent::Failed(TransportError::Exhausted { attempts: 5 }),
        ]
    );

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 6);
    assert_eq!(client.state(), ConnectionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_double_from_the_base() {
    let connector = Arc::new(MockConnector::new());
    let (_client, _events) = open_client(&connector).await;

    connector.push_script(fails(2));
    let dropped_at = tokio::time::Instant::now();
    connector.latest_peer().expect("peer").drop_connection();

    // Attempts follow at 1s, 1s + 2s and 1s + 2s + 4s after the drop.
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(connector.attempts(), 1);
    eventually("first reconnect", || connector.attempts() == 2).await;
    assert!(dropped_at.elapsed() >= Duration::from_secs(1));

    tokio::time::sleep_until(dropped_at + Duration::from_millis(2_900)).await;
    assert_eq!(connector.attempts(), 2);
    eventually("second reconnect", || connector.attempts() == 3).await;

    tokio::time::sleep_until(dropped_at + Duration::from_millis(6_900)).await;
    assert_eq!(connector.attempts(), 3);
    eventually("third reconnect", || connector.peers().len() == 2).await;
    assert_eq!(connector.attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn idle_connection_sends_keep_alives_and_swallows_inbound_ones() {
    let connector = Arc::new(MockConnector::new());
    let (_client, events) = open_client(&connector).await;
    let peer = connector.latest_peer().expect("peer");

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(
        peer.sent(),
        vec![OutboundFrame::KeepAlive, OutboundFrame::KeepAlive]
    );

    peer.push(Envelope::KeepAlive);
    peer.push(Envelope::Status { busy: true });
    eventually("status", || {
        snapshot(&events).contains(&TransportEvent::Envelope(Envelope::Status { busy: true }))
    })
    .await;
    assert!(!snapshot(&events).contains(&TransportEvent::Envelope(Envelope::KeepAlive)));
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped_without_closing() {
    let connector = Arc::new(MockConnector::new());
    let (client, events) = open_client(&connector).await;
    let peer = connector.latest_peer().expect("peer");

    peer.push_malformed(ProtocolError::Malformed("not json".to_string()));
    peer.push(Envelope::Error {
        description: "agent unavailable".to_string(),
    });

    eventually("error envelope", || {
        snapshot(&events).iter().any(|event| {
            matches!(event, TransportEvent::Envelope(Envelope::Error { .. }))
        })
    })
    .await;
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn observers_run_in_registration_order() {
    let connector = Arc::new(MockConnector::new());
    let mut client = TransportClient::new(connector.clone(), config());
    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second"] {
        let order = Arc::clone(&order);
        client.on_message(move |_| order.lock().expect("order lock").push(name));
    }

    client.open(target()).expect("open");
    eventually("open", || client.state() == ConnectionState::Open).await;

    let order = order.lock().expect("order lock").clone();
    assert!(!order.is_empty());
    for pair in order.chunks(2) {
        assert_eq!(pair, ["first", "second"]);
    }
}

#[tokio::test(start_paused = true)]
async fn close_cancels_a_scheduled_reconnect() {
    let connector = Arc::new(MockConnector::with_script(fails(1)));
    let mut client = TransportClient::new(connector.clone(), config());
    let events = record(&client);

    client.open(target()).expect("open");
    eventually("reconnect pending", || {
        client.state() == ConnectionState::ReconnectPending
    })
    .await;

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Idle);

    let emitted = snapshot(&events).len();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(snapshot(&events).len(), emitted);
}

#[tokio::test(start_paused = true)]
async fn close_shuts_the_open_connection_down() {
    let connector = Arc::new(MockConnector::new());
    let (mut client, events) = open_client(&connector).await;
    let peer = connector.latest_peer().expect("peer");

    client.close().await;

    assert!(peer.is_closed());
    assert_eq!(client.state(), ConnectionState::Idle);
    let events = snapshot(&events);
    assert_eq!(
        &events[events.len() - 2..],
        &[
            TransportEvent::StateChanged(ConnectionState::Closing),
            TransportEvent::StateChanged(ConnectionState::Idle),
        ]
    );

    client.open(target()).expect("reopen after close");
}

#[tokio::test(start_paused = true)]
async fn send_is_dropped_unless_open() {
    let connector = Arc::new(MockConnector::new());
    let mut client = TransportClient::new(connector.clone(), config());
    let frame = OutboundFrame::UserMessage {
        content: "hello".to_string(),
    };

    assert!(!client.send(frame.clone()));

    client.open(target()).expect("open");
    assert_eq!(client.open(target()), Err(TransportError::AlreadyActive));
    eventually("open", || client.state() == ConnectionState::Open).await;

    assert!(client.send(frame.clone()));
    let peer = connector.latest_peer().expect("peer");
    eventually("delivery", || peer.sent() == vec![frame.clone()]).await;
}
