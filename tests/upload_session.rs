mod support;

use pretty_assertions::assert_eq;
use session_backend::{Envelope, Message, UploadFile};
use session_sync::{SyncApp, TransportEvent, FOLLOW_UP_MESSAGE};
use support::{dataset, enter_open, now, start_upload, HostStub};

const STATISTICS: &str = "Your dataset has 10 rows and 2 columns: x, y.";

#[test]
fn two_uploads_in_one_dedup_bucket_append_both_bursts() {
    let mut app = SyncApp::default();
    let mut host = HostStub::default();
    let generation = enter_open(&mut app, &mut host, "a", vec![Message::user_text("hi", now())]);

    let first = start_upload(&mut app, &mut host, "a.csv");
    app.on_upload_finished(first.epoch, Ok(dataset("a.csv")), now(), &mut host);
    let second = start_upload(&mut app, &mut host, "a.csv");
    app.on_upload_finished(second.epoch, Ok(dataset("a.csv")), now(), &mut host);

    let snapshot = app.snapshot();
    assert_eq!(
        snapshot.contents(),
        vec![
            "hi",
            "Uploaded a.csv.",
            STATISTICS,
            FOLLOW_UP_MESSAGE,
            "Uploaded a.csv.",
            STATISTICS,
            FOLLOW_UP_MESSAGE,
        ]
    );
    let seqs: Vec<u64> = snapshot.messages.iter().map(|entry| entry.seq).collect();
    assert_eq!(seqs, (1..=7).collect::<Vec<_>>());

    // A server echo of the follow-up inside the same bucket is still dropped.
    let echo = Message::assistant_text(FOLLOW_UP_MESSAGE, now());
    app.on_transport_event(generation, TransportEvent::Envelope(Envelope::Message(echo)), &mut host);
    assert_eq!(app.log().len(), 7);
}

#[test]
fn switching_to_another_session_drops_the_pending_queue() {
    let mut app = SyncApp::default();
    let mut host = HostStub::default();
    enter_open(&mut app, &mut host, "a", Vec::new());
    app.submit_files(vec![UploadFile::new("for-a.csv", vec![1_u8; 4])], &mut host);

    enter_open(&mut app, &mut host, "b", Vec::new());

    assert!(app.snapshot().upload_pending.is_empty());
}

#[test]
fn reentering_the_same_session_keeps_the_pending_queue() {
    let mut app = SyncApp::default();
    let mut host = HostStub::default();
    enter_open(&mut app, &mut host, "a", Vec::new());
    app.submit_files(vec![UploadFile::new("for-a.csv", vec![1_u8; 4])], &mut host);

    enter_open(&mut app, &mut host, "a", Vec::new());

    assert_eq!(app.snapshot().upload_pending, vec!["for-a.csv".to_string()]);
}
