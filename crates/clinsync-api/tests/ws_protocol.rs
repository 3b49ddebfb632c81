//! WebSocket protocol tests against an in-process server.
//!
//! Each test serves the real router on an ephemeral port, connects
//! with tokio-tungstenite and speaks the client frame protocol. The
//! change-feed pipeline is driven directly through
//! [`ChangeFeedListener::handle_change`] so row changes reach sockets
//! exactly as they would from Postgres.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use clinsync_api::{app, AppState};
use clinsync_core::defaults::{HUB_CAPACITY, NOTIFICATION_TABLE, REPORT_TABLE};
use clinsync_core::{
    ChangeKind, ClinicRole, PatientDetails, Report, ReportStatus, ReportType, SocketHub,
    StorageUrls, TableChange,
};
use clinsync_realtime::testing::{FakeSettingsStore, PipelineFixture, ScriptedFeed};
use clinsync_realtime::{
    ChangeFeedListener, ConnectionRegistry, NotificationService, ReportSnapshotCache,
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    fixture: PipelineFixture,
    hub: SocketHub,
}

impl TestServer {
    /// A listener wired to the same hub and stores as the server, for
    /// pushing row changes by hand.
    fn listener(&self) -> ChangeFeedListener {
        let notifications = Arc::new(NotificationService::new(
            self.fixture.notifications.clone(),
            self.fixture.roles.clone(),
        ));
        ChangeFeedListener::new(
            Arc::new(ScriptedFeed::new(vec![])),
            Arc::new(ReportSnapshotCache::new()),
            self.hub.clone(),
            self.fixture.patients.clone(),
            self.fixture.reports.clone(),
            notifications,
            StorageUrls::new("http://localhost:54321/storage/v1/object/public"),
        )
    }

    async fn connect(&self) -> WsClient {
        let (ws, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("websocket connect");
        ws
    }
}

async fn spawn_server() -> TestServer {
    let fixture = PipelineFixture::new();
    let hub = SocketHub::new(HUB_CAPACITY);
    let notifications = Arc::new(NotificationService::new(
        fixture.notifications.clone(),
        fixture.roles.clone(),
    ));

    let state = AppState {
        patients: fixture.patients.clone(),
        reports: fixture.reports.clone(),
        roles: fixture.roles.clone(),
        settings: Arc::new(FakeSettingsStore::new()),
        notifications,
        hub: hub.clone(),
        registry: Arc::new(ConnectionRegistry::new()),
        processor: None,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });

    TestServer { addr, fixture, hub }
}

async fn send_event(ws: &mut WsClient, event: &str, data: Value) {
    let frame = json!({"event": event, "data": data}).to_string();
    ws.send(Message::Text(frame)).await.expect("send frame");
}

/// Reads frames until one with the given event arrives, skipping pings
/// and unrelated events.
async fn next_event(ws: &mut WsClient, event: &str) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {}", event))
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame["event"] == event {
                return frame["data"].clone();
            }
        }
    }
}

/// Asserts the event does not arrive within a short window.
async fn assert_no_event(ws: &mut WsClient, event: &str) {
    let saw_it = timeout(Duration::from_millis(300), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    if frame["event"] == event {
                        return;
                    }
                }
                Some(Ok(_)) => {}
                _ => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(saw_it.is_err(), "unexpected {} frame", event);
}

fn details(clinic_id: Uuid) -> PatientDetails {
    PatientDetails {
        clinic_id,
        first_name: "Jane".into(),
        last_name: "Doe".into(),
        created_by: None,
        treating_doctor_ids: vec![],
    }
}

fn sample_report(patient_id: Uuid) -> Report {
    Report {
        id: clinsync_core::new_v7(),
        patient_id,
        report_type: ReportType::Pano,
        status: ReportStatus::Processing,
        created_at: Utc::now(),
        last_upload: None,
        report_url: None,
        data_url: None,
    }
}

#[tokio::test]
async fn test_login_and_clinic_announcements() {
    let server = spawn_server().await;
    let clinic = Uuid::new_v4();
    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();

    let mut ws_a = server.connect().await;
    send_event(
        &mut ws_a,
        "user_login",
        json!({"userId": user_a, "clinicId": clinic}),
    )
    .await;
    let data = next_event(&mut ws_a, "login_success").await;
    assert_eq!(data["message"], "Successfully connected to clinic");
    assert_eq!(data["userId"], user_a.to_string());
    assert_eq!(data["clinicId"], clinic.to_string());

    // A second login in the same clinic is announced to the first socket.
    let mut ws_b = server.connect().await;
    send_event(
        &mut ws_b,
        "user_login",
        json!({"userId": user_b, "clinicId": clinic}),
    )
    .await;
    next_event(&mut ws_b, "login_success").await;

    let joined = next_event(&mut ws_a, "user_joined_clinic").await;
    assert_eq!(joined["userId"], user_b.to_string());
    assert_eq!(joined["clinicId"], clinic.to_string());

    // Both sockets show up as identified connections.
    let status: Value = reqwest::get(format!("http://{}/api/socket/status", server.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["connectedUsers"], 2);
    assert_eq!(status["totalConnections"], 2);
}

#[tokio::test]
async fn test_notification_room_delivery_is_user_scoped() {
    let server = spawn_server().await;
    let recipient = Uuid::new_v4();
    let bystander = Uuid::new_v4();

    let mut ws_recipient = server.connect().await;
    send_event(
        &mut ws_recipient,
        "join_notification_room",
        json!({"userId": recipient}),
    )
    .await;
    let data = next_event(&mut ws_recipient, "notification_room_joined").await;
    assert_eq!(data["userId"], recipient.to_string());

    let mut ws_bystander = server.connect().await;
    send_event(
        &mut ws_bystander,
        "join_notification_room",
        json!({"userId": bystander}),
    )
    .await;
    next_event(&mut ws_bystander, "notification_room_joined").await;

    // A notification row lands in the feed for the recipient only.
    let listener = server.listener();
    let row = json!({
        "id": clinsync_core::new_v7(),
        "user_id": recipient,
        "title": "Report Ready",
        "message": "The pano report for patient Jane Doe is ready now",
        "type": "report_completed",
        "is_read": false,
        "token": null,
        "meta_data": null,
        "created_at": Utc::now(),
    });
    listener
        .handle_change(TableChange {
            table: NOTIFICATION_TABLE.to_string(),
            action: ChangeKind::Insert,
            new: Some(row),
            old: None,
        })
        .await;

    let data = next_event(&mut ws_recipient, "new_notification").await;
    assert_eq!(data["title"], "Report Ready");
    assert_eq!(data["type"], "report_completed");
    assert_eq!(data["source"], "database_realtime");

    assert_no_event(&mut ws_bystander, "new_notification").await;
}

#[tokio::test]
async fn test_patient_selection_respects_roles() {
    let server = spawn_server().await;
    let clinic = Uuid::new_v4();
    let patient = Uuid::new_v4();
    let assistant = Uuid::new_v4();
    let doctor = Uuid::new_v4();

    server.fixture.patients.add_patient(patient, details(clinic)).await;
    server
        .fixture
        .roles
        .add_member(clinic, assistant, ClinicRole::ClinicAccess)
        .await;
    server
        .fixture
        .roles
        .add_member(clinic, doctor, ClinicRole::FullAccess)
        .await;

    // clinic_access does not grant patient-level access.
    let mut ws_assistant = server.connect().await;
    send_event(
        &mut ws_assistant,
        "user_login",
        json!({"userId": assistant, "clinicId": clinic}),
    )
    .await;
    next_event(&mut ws_assistant, "login_success").await;
    send_event(
        &mut ws_assistant,
        "select_patient",
        json!({"userId": assistant, "clinicId": clinic, "patientId": patient}),
    )
    .await;
    let data = next_event(&mut ws_assistant, "patient_selection_error").await;
    assert_eq!(
        data["error"],
        "Access Denied: You do not have permission to view this patient (Requires: Owner, Admin, or Full Access)"
    );

    // full_access can select the patient.
    let mut ws_doctor = server.connect().await;
    send_event(
        &mut ws_doctor,
        "user_login",
        json!({"userId": doctor, "clinicId": clinic}),
    )
    .await;
    next_event(&mut ws_doctor, "login_success").await;
    send_event(
        &mut ws_doctor,
        "select_patient",
        json!({"userId": doctor, "clinicId": clinic, "patientId": patient}),
    )
    .await;
    let data = next_event(&mut ws_doctor, "patient_selection_success").await;
    assert_eq!(data["message"], "Successfully connected to patient");
    assert_eq!(data["patientId"], patient.to_string());
}

#[tokio::test]
async fn test_report_insert_reaches_clinic_room_only() {
    let server = spawn_server().await;
    let clinic = Uuid::new_v4();
    let other_clinic = Uuid::new_v4();
    let patient = Uuid::new_v4();

    server.fixture.patients.add_patient(patient, details(clinic)).await;

    let mut ws_member = server.connect().await;
    send_event(
        &mut ws_member,
        "user_login",
        json!({"userId": Uuid::new_v4(), "clinicId": clinic}),
    )
    .await;
    next_event(&mut ws_member, "login_success").await;

    let mut ws_outsider = server.connect().await;
    send_event(
        &mut ws_outsider,
        "user_login",
        json!({"userId": Uuid::new_v4(), "clinicId": other_clinic}),
    )
    .await;
    next_event(&mut ws_outsider, "login_success").await;

    // The report row appears in the feed.
    let report = sample_report(patient);
    server.fixture.reports.add(report.clone()).await;
    let listener = server.listener();
    listener
        .handle_change(TableChange {
            table: REPORT_TABLE.to_string(),
            action: ChangeKind::Insert,
            new: Some(serde_json::to_value(&report).unwrap()),
            old: None,
        })
        .await;

    let data = next_event(&mut ws_member, "report_created_realtime").await;
    assert_eq!(data["reportId"], report.id.to_string());
    assert_eq!(data["patientName"], "Jane Doe");
    assert_eq!(data["clinicId"], clinic.to_string());
    assert_eq!(data["totalReports"], 1);

    assert_no_event(&mut ws_outsider, "report_created_realtime").await;
}
