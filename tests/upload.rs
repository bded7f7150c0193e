use pretty_assertions::assert_eq;
use session_backend::{BackendError, DatasetSummary, MessageKind, Role, SessionId, UploadFile};
use session_sync::{
    synthetic_burst, UploadCoordinator, UploadError, UploadOutcome, UploadState,
    FOLLOW_UP_MESSAGE,
};
use time::macros::datetime;
use time::OffsetDateTime;

fn now() -> OffsetDateTime {
    datetime!(2024-03-01 12:00 UTC)
}

fn files(names: &[&str]) -> Vec<UploadFile> {
    names
        .iter()
        .map(|name| UploadFile::new(*name, name.as_bytes().to_vec()))
        .collect()
}

fn sales_dataset() -> DatasetSummary {
    DatasetSummary {
        name: "sales.csv".to_string(),
        path: "/data/sales.csv".to_string(),
        rows: 120,
        columns: 4,
        column_names: ["region", "month", "units", "revenue"]
            .map(String::from)
            .to_vec(),
        missing_values: None,
    }
}

#[test]
fn submissions_past_the_cap_are_dropped_in_order() {
    let mut uploads = UploadCoordinator::new(5);

    let outcome = uploads.submit(files(&["1", "2", "3", "4", "5", "6", "7"]));

    assert_eq!(outcome.accepted, 5);
    assert_eq!(outcome.dropped, vec!["6".to_string(), "7".to_string()]);
    assert_eq!(uploads.pending_names(), vec!["1", "2", "3", "4", "5"]);
}

#[test]
fn completed_files_count_against_the_cap() {
    let mut uploads = UploadCoordinator::new(3);
    let session_id = SessionId::new("s-1");
    uploads.submit(files(&["a.csv", "b.csv"]));
    let ticket = uploads.begin(Some(&session_id)).expect("begin");
    uploads
        .finish(ticket.epoch, Ok(sales_dataset()), now())
        .expect("current epoch");

    let outcome = uploads.submit(files(&["c.csv", "d.csv"]));

    assert_eq!(outcome.accepted, 1);
    assert_eq!(outcome.dropped, vec!["d.csv".to_string()]);
}

#[test]
fn remove_is_refused_while_a_batch_is_in_flight() {
    let mut uploads = UploadCoordinator::default();
    uploads.submit(files(&["a.csv", "b.csv", "c.csv"]));

    let removed = uploads.remove(1).expect("index in range");
    assert_eq!(removed.name, "b.csv");
    assert!(uploads.remove(5).is_none());

    uploads.begin(Some(&SessionId::new("s-1"))).expect("begin");
    assert!(uploads.remove(0).is_none());
    assert_eq!(uploads.pending_names(), vec!["a.csv", "c.csv"]);
}

#[test]
fn begin_requires_a_session_a_queue_and_no_batch_in_flight() {
    let mut uploads = UploadCoordinator::default();
    let session_id = SessionId::new("s-1");

    assert_eq!(uploads.begin(None), Err(UploadError::NoSession));
    assert_eq!(uploads.begin(Some(&session_id)), Err(UploadError::EmptyQueue));

    uploads.submit(files(&["a.csv"]));
    let ticket = uploads.begin(Some(&session_id)).expect("begin");
    assert_eq!(ticket.files.len(), 1);
    assert_eq!(uploads.state(), UploadState::InFlight);
    assert_eq!(uploads.begin(Some(&session_id)), Err(UploadError::InFlight));
}

#[test]
fn failure_keeps_the_pending_queue() {
    let mut uploads = UploadCoordinator::default();
    uploads.submit(files(&["a.csv", "b.csv"]));
    let ticket = uploads.begin(Some(&SessionId::new("s-1"))).expect("begin");
    uploads.record_progress(ticket.epoch, 3, 10);

    let outcome = uploads
        .finish(
            ticket.epoch,
            Err(BackendError::rejected(413, "payload too large")),
            now(),
        )
        .expect("current epoch");

    assert!(matches!(
        outcome,
        UploadOutcome::Failed(UploadError::Backend(ref reason)) if reason.contains("413")
    ));
    assert_eq!(uploads.state(), UploadState::Failed);
    assert_eq!(uploads.progress_percent(), 0);
    assert_eq!(uploads.pending_names(), vec!["a.csv", "b.csv"]);

    // The same queue can be retried.
    assert!(uploads.begin(Some(&SessionId::new("s-1"))).is_ok());
}

#[test]
fn progress_is_aggregate_and_never_moves_backwards() {
    let mut uploads = UploadCoordinator::default();
    uploads.submit(files(&["a.csv"]));
    let ticket = uploads.begin(Some(&SessionId::new("s-1"))).expect("begin");

    assert!(uploads.record_progress(ticket.epoch, 25, 100));
    assert_eq!(uploads.progress_percent(), 25);
    assert!(!uploads.record_progress(ticket.epoch, 10, 100));
    assert_eq!(uploads.progress_percent(), 25);
    assert!(uploads.record_progress(ticket.epoch, 250, 200));
    assert_eq!(uploads.progress_percent(), 100);
}

#[test]
fn detach_invalidates_the_in_flight_batch() {
    let mut uploads = UploadCoordinator::default();
    uploads.submit(files(&["a.csv"]));
    let ticket = uploads.begin(Some(&SessionId::new("s-1"))).expect("begin");
    uploads.record_progress(ticket.epoch, 5, 10);

    uploads.detach();

    assert!(!uploads.record_progress(ticket.epoch, 10, 10));
    assert!(uploads
        .finish(ticket.epoch, Ok(sales_dataset()), now())
        .is_none());
    assert_eq!(uploads.state(), UploadState::Idle);
    assert_eq!(uploads.progress_percent(), 0);
    assert_eq!(uploads.pending_names(), vec!["a.csv"]);
}

#[test]
fn teardown_drops_the_pending_queue_and_frees_the_cap() {
    let mut uploads = UploadCoordinator::new(2);
    let session_id = SessionId::new("s-1");
    uploads.submit(files(&["a.csv"]));
    let ticket = uploads.begin(Some(&session_id)).expect("begin");
    uploads
        .finish(ticket.epoch, Ok(sales_dataset()), now())
        .expect("current epoch");
    uploads.submit(files(&["b.csv"]));

    uploads.teardown();

    assert!(uploads.pending().is_empty());
    assert_eq!(uploads.state(), UploadState::Idle);
    let outcome = uploads.submit(files(&["c.csv", "d.csv"]));
    assert_eq!(outcome.accepted, 2);
}

#[test]
fn success_drains_the_batch_and_builds_the_burst() {
    let mut uploads = UploadCoordinator::default();
    uploads.submit(files(&["sales.csv"]));
    let ticket = uploads.begin(Some(&SessionId::new("s-1"))).expect("begin");

    let outcome = uploads
        .finish(ticket.epoch, Ok(sales_dataset()), now())
        .expect("current epoch");

    let UploadOutcome::Succeeded {
        dataset,
        files,
        messages,
    } = outcome
    else {
        panic!("expected a successful upload");
    };
    assert_eq!(dataset, sales_dataset());
    assert_eq!(files, vec!["sales.csv".to_string()]);
    assert_eq!(messages.len(), 3);
    assert!(uploads.pending().is_empty());
    assert_eq!(uploads.progress_percent(), 100);
    assert_eq!(uploads.state(), UploadState::Succeeded);
}

#[test]
fn burst_reports_dataset_statistics() {
    let messages = synthetic_burst(&["sales.csv".to_string()], &sales_dataset(), now());

    let contents: Vec<&str> = messages.iter().map(|message| message.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "Uploaded sales.csv.",
            "Your dataset has 120 rows and 4 columns: region, month, units, revenue.",
            FOLLOW_UP_MESSAGE,
        ]
    );
    assert!(messages.iter().all(|message| message.role == Role::Assistant));
    assert_eq!(
        messages[1].kind,
        MessageKind::Dataset {
            dataset: sales_dataset()
        }
    );
}
