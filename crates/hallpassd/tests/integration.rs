//! Integration tests for hallpassd
//!
//! Each test boots the real daemon binary on private temp paths and
//! drives it over the Unix socket with the IPC client.

use hallpass_api::{
    AuditAction, Command, ErrorCode, ErrorInfo, EventPayload, Gender, Response, ResponsePayload,
    ResponseResult,
};
use hallpass_ipc::{EventStream, IpcClient};
use hallpass_util::DestinationId;
use std::path::PathBuf;
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::time::Duration;
use tempfile::TempDir;

// Long sweep interval so only explicit Sweep commands run during a test
const TEST_CONFIG: &str = r#"
config_version = 1

[service]
sweep_interval_seconds = 3600

[[destinations]]
id = "bathroom"
name = "Bathroom"

[[destinations]]
id = "library"
name = "Library"
"#;

/// A daemon process bound to temp paths, killed on drop.
struct TestDaemon {
    child: Child,
    socket: PathBuf,
    _dir: TempDir,
}

impl TestDaemon {
    fn start() -> Self {
        Self::start_with_config(TEST_CONFIG)
    }

    fn start_with_config(config: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, config).expect("write config");

        let socket = dir.path().join("hallpassd.sock");
        let data_dir = dir.path().join("data");

        let child = ProcessCommand::new(env!("CARGO_BIN_EXE_hallpassd"))
            .arg("--config")
            .arg(&config_path)
            .arg("--socket")
            .arg(&socket)
            .arg("--data-dir")
            .arg(&data_dir)
            .arg("--log-level")
            .arg("warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn hallpassd");

        Self {
            child,
            socket,
            _dir: dir,
        }
    }

    /// Connect, waiting out the daemon's startup.
    async fn client(&self) -> IpcClient {
        IpcClient::connect_with_retry(&self.socket, Duration::from_secs(5))
            .await
            .unwrap_or_else(|e| panic!("daemon never bound {}: {e}", self.socket.display()))
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn ok(response: Response) -> ResponsePayload {
    match response.result {
        ResponseResult::Ok(payload) => payload,
        ResponseResult::Err(e) => panic!("expected success, got {:?}: {}", e.code, e.message),
    }
}

fn err(response: Response) -> ErrorInfo {
    match response.result {
        ResponseResult::Ok(payload) => panic!("expected error, got {:?}", payload),
        ResponseResult::Err(e) => e,
    }
}

async fn upsert_student(client: &mut IpcClient, name: &str, email: &str, gender: &str) {
    let response = client
        .send(Command::UpsertStudent {
            name: name.into(),
            email: email.into(),
            gender: gender.into(),
            class: Some("9A".into()),
        })
        .await
        .unwrap();
    assert!(matches!(
        ok(response),
        ResponsePayload::StudentUpserted { .. }
    ));
}

async fn next_event(stream: &mut EventStream) -> EventPayload {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
        .payload
}

#[tokio::test]
async fn checkout_checkin_round_trip() {
    let daemon = TestDaemon::start();
    let mut client = daemon.client().await;

    upsert_student(&mut client, "Alice", "alice@school.edu", "F").await;

    let response = client
        .send(Command::CheckOut {
            email: "alice@school.edu".into(),
            destination_id: DestinationId::new("bathroom"),
            note: None,
        })
        .await
        .unwrap();
    match ok(response) {
        ResponsePayload::CheckedOut {
            destination_name,
            message,
            ..
        } => {
            assert_eq!(destination_name, "Bathroom");
            assert!(message.contains("Alice"));
        }
        other => panic!("unexpected payload: {:?}", other),
    }

    let response = client.send(Command::ListActive).await.unwrap();
    match ok(response) {
        ResponsePayload::Active(views) => {
            assert_eq!(views.len(), 1);
            assert_eq!(views[0].student_name, "Alice");
            assert!(!views[0].overdue);
        }
        other => panic!("unexpected payload: {:?}", other),
    }

    let response = client
        .send(Command::CheckIn {
            email: "alice@school.edu".into(),
        })
        .await
        .unwrap();
    match ok(response) {
        ResponsePayload::CheckedIn {
            duration_minutes,
            message,
        } => {
            assert_eq!(duration_minutes, 0);
            assert!(message.contains("Alice"));
        }
        other => panic!("unexpected payload: {:?}", other),
    }

    let response = client.send(Command::ListActive).await.unwrap();
    match ok(response) {
        ResponsePayload::Active(views) => assert!(views.is_empty()),
        other => panic!("unexpected payload: {:?}", other),
    }

    // The full out -> in cycle leaves exactly one closing record
    let response = client.send(Command::ListAudit { limit: None }).await.unwrap();
    match ok(response) {
        ResponsePayload::AuditRecords(records) => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].action, AuditAction::In);
            assert_eq!(records[0].duration_minutes, Some(0));
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test]
async fn capacity_and_duplicate_errors_reach_the_wire() {
    let daemon = TestDaemon::start();
    let mut client = daemon.client().await;

    upsert_student(&mut client, "Alice", "alice@school.edu", "F").await;
    upsert_student(&mut client, "Beth", "beth@school.edu", "female").await;

    let response = client
        .send(Command::CheckOut {
            email: "alice@school.edu".into(),
            destination_id: DestinationId::new("library"),
            note: None,
        })
        .await
        .unwrap();
    ok(response);

    // Same class, same gender: the slot is occupied
    let response = client
        .send(Command::CheckOut {
            email: "beth@school.edu".into(),
            destination_id: DestinationId::new("library"),
            note: None,
        })
        .await
        .unwrap();
    let error = err(response);
    assert_eq!(error.code, ErrorCode::CapacityExceeded);
    assert!(error.message.contains("female"));

    // The student herself gets the duplicate error, not the slot error
    let response = client
        .send(Command::CheckOut {
            email: "alice@school.edu".into(),
            destination_id: DestinationId::new("bathroom"),
            note: None,
        })
        .await
        .unwrap();
    let error = err(response);
    assert_eq!(error.code, ErrorCode::AlreadyOut);
    assert!(error.message.contains("Alice"));
}

#[tokio::test]
async fn lookup_errors_reach_the_wire() {
    let daemon = TestDaemon::start();
    let mut client = daemon.client().await;

    let response = client
        .send(Command::CheckOut {
            email: "nobody@school.edu".into(),
            destination_id: DestinationId::new("bathroom"),
            note: None,
        })
        .await
        .unwrap();
    assert_eq!(err(response).code, ErrorCode::NotFound);

    upsert_student(&mut client, "Alice", "alice@school.edu", "F").await;

    let response = client
        .send(Command::CheckOut {
            email: "alice@school.edu".into(),
            destination_id: DestinationId::new("moon"),
            note: None,
        })
        .await
        .unwrap();
    let error = err(response);
    assert_eq!(error.code, ErrorCode::InvalidDestination);
    assert!(error.message.contains("moon"));

    let response = client
        .send(Command::CheckIn {
            email: "alice@school.edu".into(),
        })
        .await
        .unwrap();
    assert_eq!(err(response).code, ErrorCode::NotCheckedOut);
}

#[tokio::test]
async fn settings_are_validated_and_persisted() {
    let daemon = TestDaemon::start();
    let mut client = daemon.client().await;

    let response = client.send(Command::GetSettings).await.unwrap();
    match ok(response) {
        ResponsePayload::Settings {
            auto_return_minutes,
        } => assert_eq!(auto_return_minutes, 10),
        other => panic!("unexpected payload: {:?}", other),
    }

    let response = client
        .send(Command::SetSettings {
            auto_return_minutes: 7,
        })
        .await
        .unwrap();
    match ok(response) {
        ResponsePayload::Settings {
            auto_return_minutes,
        } => assert_eq!(auto_return_minutes, 7),
        other => panic!("unexpected payload: {:?}", other),
    }

    let response = client
        .send(Command::SetSettings {
            auto_return_minutes: 20,
        })
        .await
        .unwrap();
    assert_eq!(err(response).code, ErrorCode::OutOfRange);

    let response = client.send(Command::GetSettings).await.unwrap();
    match ok(response) {
        ResponsePayload::Settings {
            auto_return_minutes,
        } => assert_eq!(auto_return_minutes, 7),
        other => panic!("unexpected payload: {:?}", other),
    }

    // The window shapes the deadline of the next checkout
    upsert_student(&mut client, "Alice", "alice@school.edu", "F").await;
    let response = client
        .send(Command::CheckOut {
            email: "alice@school.edu".into(),
            destination_id: DestinationId::new("bathroom"),
            note: None,
        })
        .await
        .unwrap();
    match ok(response) {
        ResponsePayload::CheckedOut { deadline, .. } => {
            let out = chrono::Local::now();
            let window = deadline.signed_duration_since(out).num_seconds();
            assert!((380..=440).contains(&window), "window was {}s", window);
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test]
async fn roster_rows_canonicalize_gender_at_ingestion() {
    let daemon = TestDaemon::start();
    let mut client = daemon.client().await;

    upsert_student(&mut client, "Dina", "dina@school.edu", "girl").await;

    let response = client.send(Command::ListStudents).await.unwrap();
    match ok(response) {
        ResponsePayload::Students(students) => {
            assert_eq!(students.len(), 1);
            assert_eq!(students[0].gender, Some(Gender::Female));
            assert_eq!(students[0].gender_raw, "girl");
        }
        other => panic!("unexpected payload: {:?}", other),
    }

    let response = client.send(Command::NormalizeGenders).await.unwrap();
    match ok(response) {
        // Already canonical, nothing rewritten
        ResponsePayload::GendersNormalized { updated } => assert_eq!(updated, 0),
        other => panic!("unexpected payload: {:?}", other),
    }

    let response = client
        .send(Command::RemoveStudent {
            email: "dina@school.edu".into(),
        })
        .await
        .unwrap();
    assert!(matches!(ok(response), ResponsePayload::StudentRemoved));

    let response = client
        .send(Command::RemoveStudent {
            email: "dina@school.edu".into(),
        })
        .await
        .unwrap();
    assert_eq!(err(response).code, ErrorCode::NotFound);
}

#[tokio::test]
async fn malformed_roster_rows_are_rejected() {
    let daemon = TestDaemon::start();
    let mut client = daemon.client().await;

    let response = client
        .send(Command::UpsertStudent {
            name: "   ".into(),
            email: "alice@school.edu".into(),
            gender: "F".into(),
            class: None,
        })
        .await
        .unwrap();
    assert_eq!(err(response).code, ErrorCode::InvalidRequest);

    let response = client
        .send(Command::UpsertStudent {
            name: "Alice".into(),
            email: "not-an-email".into(),
            gender: "F".into(),
            class: None,
        })
        .await
        .unwrap();
    assert_eq!(err(response).code, ErrorCode::InvalidRequest);

    let response = client.send(Command::ListStudents).await.unwrap();
    match ok(response) {
        ResponsePayload::Students(students) => assert!(students.is_empty()),
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test]
async fn config_seeds_the_destination_catalog() {
    let config = r#"
        config_version = 1

        [service]
        sweep_interval_seconds = 3600

        [[destinations]]
        id = "nurse"
        name = "Nurse's Office"
        sort_order = 1

        [[destinations]]
        id = "pool"
        name = "Pool"
        active = false
        sort_order = 2
    "#;
    let daemon = TestDaemon::start_with_config(config);
    let mut client = daemon.client().await;

    let response = client.send(Command::ListDestinations).await.unwrap();
    match ok(response) {
        ResponsePayload::Destinations(destinations) => {
            assert_eq!(destinations.len(), 2);
            assert_eq!(destinations[0].id.as_str(), "nurse");
            assert!(destinations[0].active);
            assert_eq!(destinations[1].id.as_str(), "pool");
            assert!(!destinations[1].active);
        }
        other => panic!("unexpected payload: {:?}", other),
    }

    // Inactive seeded destination rejects checkouts
    upsert_student(&mut client, "Alice", "alice@school.edu", "F").await;
    let response = client
        .send(Command::CheckOut {
            email: "alice@school.edu".into(),
            destination_id: DestinationId::new("pool"),
            note: None,
        })
        .await
        .unwrap();
    assert_eq!(err(response).code, ErrorCode::InvalidDestination);

    // Upserting over IPC extends the seeded catalog
    let response = client
        .send(Command::UpsertDestination {
            id: DestinationId::new("gym"),
            name: "Gymnasium".into(),
            active: true,
            sort_order: 3,
        })
        .await
        .unwrap();
    assert!(matches!(ok(response), ResponsePayload::DestinationUpserted));

    let response = client.send(Command::ListDestinations).await.unwrap();
    match ok(response) {
        ResponsePayload::Destinations(destinations) => assert_eq!(destinations.len(), 3),
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test]
async fn reset_all_clears_the_board_with_reset_records() {
    let daemon = TestDaemon::start();
    let mut client = daemon.client().await;

    upsert_student(&mut client, "Alice", "alice@school.edu", "F").await;
    upsert_student(&mut client, "Carl", "carl@school.edu", "M").await;

    for email in ["alice@school.edu", "carl@school.edu"] {
        let response = client
            .send(Command::CheckOut {
                email: email.into(),
                destination_id: DestinationId::new("library"),
                note: None,
            })
            .await
            .unwrap();
        ok(response);
    }

    let response = client.send(Command::ResetAll).await.unwrap();
    match ok(response) {
        ResponsePayload::ResetComplete { count } => assert_eq!(count, 2),
        other => panic!("unexpected payload: {:?}", other),
    }

    let response = client.send(Command::ListActive).await.unwrap();
    match ok(response) {
        ResponsePayload::Active(views) => assert!(views.is_empty()),
        other => panic!("unexpected payload: {:?}", other),
    }

    let response = client.send(Command::ListAudit { limit: None }).await.unwrap();
    match ok(response) {
        ResponsePayload::AuditRecords(records) => {
            assert_eq!(records.len(), 2);
            assert!(records.iter().all(|r| r.action == AuditAction::Reset));
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test]
async fn sweep_command_leaves_fresh_checkouts_open() {
    let daemon = TestDaemon::start();
    let mut client = daemon.client().await;

    upsert_student(&mut client, "Alice", "alice@school.edu", "F").await;
    let response = client
        .send(Command::CheckOut {
            email: "alice@school.edu".into(),
            destination_id: DestinationId::new("bathroom"),
            note: Some("water fountain".into()),
        })
        .await
        .unwrap();
    ok(response);

    let response = client.send(Command::Sweep).await.unwrap();
    match ok(response) {
        ResponsePayload::SweepComplete { closed } => assert_eq!(closed, 0),
        other => panic!("unexpected payload: {:?}", other),
    }

    let response = client.send(Command::ListActive).await.unwrap();
    match ok(response) {
        ResponsePayload::Active(views) => {
            assert_eq!(views.len(), 1);
            assert_eq!(views[0].note.as_deref(), Some("water fountain"));
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test]
async fn health_and_ping_respond() {
    let daemon = TestDaemon::start();
    let mut client = daemon.client().await;

    let response = client.send(Command::Ping).await.unwrap();
    assert!(matches!(ok(response), ResponsePayload::Pong));

    let response = client.send(Command::GetHealth).await.unwrap();
    match ok(response) {
        ResponsePayload::Health(health) => {
            assert!(health.live);
            assert!(health.ready);
            assert!(health.store_ok);
            assert_eq!(health.active_reservations, 0);
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test]
async fn mutations_stream_to_subscribers() {
    let daemon = TestDaemon::start();
    let mut actor = daemon.client().await;

    let watcher = daemon.client().await;
    let mut events = watcher.subscribe().await.unwrap();

    upsert_student(&mut actor, "Alice", "alice@school.edu", "F").await;
    match next_event(&mut events).await {
        EventPayload::RosterChanged { student_count } => assert_eq!(student_count, 1),
        other => panic!("unexpected event: {:?}", other),
    }

    let response = actor
        .send(Command::CheckOut {
            email: "alice@school.edu".into(),
            destination_id: DestinationId::new("library"),
            note: None,
        })
        .await
        .unwrap();
    ok(response);

    match next_event(&mut events).await {
        EventPayload::ReservationOpened { reservation } => {
            assert_eq!(reservation.student_name, "Alice");
            assert_eq!(reservation.destination_name, "Library");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match next_event(&mut events).await {
        EventPayload::StateChanged(snapshot) => assert_eq!(snapshot.active.len(), 1),
        other => panic!("unexpected event: {:?}", other),
    }

    let response = actor
        .send(Command::CheckIn {
            email: "alice@school.edu".into(),
        })
        .await
        .unwrap();
    ok(response);

    match next_event(&mut events).await {
        EventPayload::ReservationClosed { record } => {
            assert_eq!(record.action, AuditAction::In);
            assert_eq!(record.student_name, "Alice");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match next_event(&mut events).await {
        EventPayload::StateChanged(snapshot) => assert!(snapshot.active.is_empty()),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn audit_deletions_over_the_wire() {
    let daemon = TestDaemon::start();
    let mut client = daemon.client().await;

    upsert_student(&mut client, "Alice", "alice@school.edu", "F").await;

    for _ in 0..3 {
        let response = client
            .send(Command::CheckOut {
                email: "alice@school.edu".into(),
                destination_id: DestinationId::new("bathroom"),
                note: None,
            })
            .await
            .unwrap();
        ok(response);
        let response = client
            .send(Command::CheckIn {
                email: "alice@school.edu".into(),
            })
            .await
            .unwrap();
        ok(response);
    }

    let records = match ok(client.send(Command::ListAudit { limit: None }).await.unwrap()) {
        ResponsePayload::AuditRecords(records) => records,
        other => panic!("unexpected payload: {:?}", other),
    };
    assert_eq!(records.len(), 3);

    let response = client
        .send(Command::DeleteAuditRecord { id: records[0].id })
        .await
        .unwrap();
    match ok(response) {
        ResponsePayload::AuditDeleted { removed } => assert_eq!(removed, 1),
        other => panic!("unexpected payload: {:?}", other),
    }

    let response = client.send(Command::DeleteAllAudit).await.unwrap();
    match ok(response) {
        ResponsePayload::AuditDeleted { removed } => assert_eq!(removed, 2),
        other => panic!("unexpected payload: {:?}", other),
    }

    let records = match ok(client.send(Command::ListAudit { limit: None }).await.unwrap()) {
        ResponsePayload::AuditRecords(records) => records,
        other => panic!("unexpected payload: {:?}", other),
    };
    assert!(records.is_empty());
}
