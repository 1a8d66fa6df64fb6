mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc::Receiver;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

use consultation_chat_cell::models::{
    Message, NewMessage, Party, PaymentStatus, SessionMarkers,
};
use consultation_chat_cell::services::{
    ConnectionId, ConsultationGateway, InMemoryDirectory, InMemoryMessageStore, MessageStore,
};
use consultation_chat_cell::{Actor, ConsultationError, DeliveryStatus};

use common::seed_consultation;

struct GatewayFixture {
    config: TestConfig,
    gateway: ConsultationGateway,
    store: Arc<InMemoryMessageStore>,
    consultation_id: Uuid,
    patient: Party,
    doctor: Party,
}

impl GatewayFixture {
    async fn new() -> Self {
        let config = TestConfig::default();
        let store = Arc::new(InMemoryMessageStore::new());
        let directory = Arc::new(InMemoryDirectory::new());

        let patient = Party {
            actor: Actor::Patient(Uuid::new_v4()),
            name: "Siti Rahma".to_string(),
        };
        let doctor = Party {
            actor: Actor::Doctor(Uuid::new_v4()),
            name: "dr. Andi Wijaya".to_string(),
        };
        let consultation_id = seed_consultation(
            &directory,
            &patient,
            &doctor,
            Some(PaymentStatus::Completed),
        )
        .await;

        let gateway = ConsultationGateway::new(config.to_arc(), store.clone(), directory);

        Self {
            config,
            gateway,
            store,
            consultation_id,
            patient,
            doctor,
        }
    }

    async fn send(&self, connection: ConnectionId, party: &Party, frame: Value) {
        self.gateway
            .handle_frame(connection, party, &frame.to_string())
            .await;
    }

    async fn join(&self, connection: ConnectionId, party: &Party) {
        self.send(
            connection,
            party,
            json!({ "event": "join_room", "data": { "consultationId": self.consultation_id } }),
        )
        .await;
    }
}

fn drain(rx: &mut Receiver<String>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(serde_json::from_str(&frame).unwrap());
    }
    frames
}

fn names(frames: &[Value]) -> Vec<&str> {
    frames
        .iter()
        .map(|frame| frame["event"].as_str().unwrap())
        .collect()
}

/// Delegates to the in-memory store, but can park the next history read
/// until the test lets it through.
struct HeldHistoryStore {
    inner: InMemoryMessageStore,
    hold_next: AtomicBool,
    entered: Notify,
    release: Semaphore,
}

impl HeldHistoryStore {
    fn new() -> Self {
        Self {
            inner: InMemoryMessageStore::new(),
            hold_next: AtomicBool::new(false),
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl MessageStore for HeldHistoryStore {
    async fn append(&self, message: NewMessage) -> Result<Message, ConsultationError> {
        self.inner.append(message).await
    }

    async fn find(&self, message_id: Uuid) -> Result<Option<Message>, ConsultationError> {
        self.inner.find(message_id).await
    }

    async fn list_by_session(
        &self,
        consultation_id: Uuid,
    ) -> Result<Vec<Message>, ConsultationError> {
        if self.hold_next.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            let _permit = self.release.acquire().await;
        }
        self.inner.list_by_session(consultation_id).await
    }

    async fn update_status(
        &self,
        message_id: Uuid,
        status: DeliveryStatus,
    ) -> Result<Message, ConsultationError> {
        self.inner.update_status(message_id, status).await
    }

    async fn session_markers(
        &self,
        consultation_id: Uuid,
    ) -> Result<SessionMarkers, ConsultationError> {
        self.inner.session_markers(consultation_id).await
    }
}

// ==============================================================================
// HANDSHAKE
// ==============================================================================

#[tokio::test]
async fn test_authenticate_resolves_party_from_token() {
    let fx = GatewayFixture::new().await;
    let user = TestUser::with_id(fx.doctor.actor.id(), "andi@amae.test", "doctor");
    let token = JwtTestUtils::create_test_token(&user, &fx.config.jwt_secret, None);

    let party = fx.gateway.authenticate(&token).await.unwrap();

    assert_eq!(party, fx.doctor);
}

#[tokio::test]
async fn test_authenticate_rejects_bad_tokens_and_unknown_accounts() {
    let fx = GatewayFixture::new().await;
    let patient = TestUser::with_id(fx.patient.actor.id(), "siti@amae.test", "patient");

    let invalid = JwtTestUtils::create_invalid_signature_token(&patient);
    assert_matches!(
        fx.gateway.authenticate(&invalid).await,
        Err(ConsultationError::Authentication(_))
    );

    let expired = JwtTestUtils::create_expired_token(&patient, &fx.config.jwt_secret);
    assert_matches!(
        fx.gateway.authenticate(&expired).await,
        Err(ConsultationError::Authentication(_))
    );

    let admin = TestUser::with_id(fx.patient.actor.id(), "siti@amae.test", "admin");
    let token = JwtTestUtils::create_test_token(&admin, &fx.config.jwt_secret, None);
    assert_matches!(
        fx.gateway.authenticate(&token).await,
        Err(ConsultationError::Authentication(_))
    );

    let stranger = TestUser::patient("stranger@amae.test");
    let token = JwtTestUtils::create_test_token(&stranger, &fx.config.jwt_secret, None);
    assert_matches!(
        fx.gateway.authenticate(&token).await,
        Err(ConsultationError::Authentication(_))
    );
}

// ==============================================================================
// ROOM FLOW
// ==============================================================================

#[tokio::test]
async fn test_join_sends_room_state_to_joiner_and_notifies_peer() {
    let fx = GatewayFixture::new().await;
    let (doctor_conn, mut doctor_rx) = fx.gateway.connect(&fx.doctor);
    let (patient_conn, mut patient_rx) = fx.gateway.connect(&fx.patient);

    // The doctor hears the patient come online.
    let frames = drain(&mut doctor_rx);
    assert_eq!(names(&frames), vec!["user_status_update"]);
    assert_eq!(frames[0]["data"]["isOnline"], true);

    fx.join(doctor_conn, &fx.doctor).await;
    drain(&mut doctor_rx);

    fx.join(patient_conn, &fx.patient).await;
    let frames = drain(&mut patient_rx);
    assert_eq!(
        names(&frames),
        vec!["room_joined", "chat_history", "consultation_status"]
    );
    assert_eq!(
        frames[0]["data"]["roomId"],
        format!("consultation_{}", fx.consultation_id)
    );
    assert_eq!(frames[0]["data"]["consultation"]["doctor"]["online"], true);
    assert_eq!(frames[2]["data"]["status"], "waiting");

    let frames = drain(&mut doctor_rx);
    assert_eq!(names(&frames), vec!["user_joined"]);
    assert_eq!(frames[0]["data"]["role"], "patient");
}

#[tokio::test(start_paused = true)]
async fn test_room_events_reach_both_parties() {
    let fx = GatewayFixture::new().await;
    let (doctor_conn, mut doctor_rx) = fx.gateway.connect(&fx.doctor);
    let (patient_conn, mut patient_rx) = fx.gateway.connect(&fx.patient);
    fx.join(doctor_conn, &fx.doctor).await;
    fx.join(patient_conn, &fx.patient).await;
    drain(&mut doctor_rx);
    drain(&mut patient_rx);

    fx.send(
        doctor_conn,
        &fx.doctor,
        json!({ "event": "start_consultation", "data": { "consultationId": fx.consultation_id } }),
    )
    .await;
    fx.send(
        patient_conn,
        &fx.patient,
        json!({ "event": "send_message", "data": { "consultationId": fx.consultation_id, "message": "Halo dok" } }),
    )
    .await;

    for rx in [&mut doctor_rx, &mut patient_rx] {
        let frames = drain(rx);
        assert_eq!(names(&frames), vec!["consultation_started", "receive_message"]);
        assert_eq!(frames[1]["data"]["body"], "Halo dok");
        assert_eq!(frames[1]["data"]["sender"]["name"], "Siti Rahma");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_message_sent_during_join_reaches_the_joiner() {
    let config = TestConfig::default();
    let store = Arc::new(HeldHistoryStore::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let patient = Party {
        actor: Actor::Patient(Uuid::new_v4()),
        name: "Siti Rahma".to_string(),
    };
    let doctor = Party {
        actor: Actor::Doctor(Uuid::new_v4()),
        name: "dr. Andi Wijaya".to_string(),
    };
    let consultation_id =
        seed_consultation(&directory, &patient, &doctor, Some(PaymentStatus::Completed)).await;
    let gateway = Arc::new(ConsultationGateway::new(
        config.to_arc(),
        store.clone(),
        directory,
    ));

    let (doctor_conn, _doctor_rx) = gateway.connect(&doctor);
    let (patient_conn, mut patient_rx) = gateway.connect(&patient);
    let join_frame =
        json!({ "event": "join_room", "data": { "consultationId": consultation_id } }).to_string();
    gateway.handle_frame(doctor_conn, &doctor, &join_frame).await;
    gateway
        .sessions()
        .start(doctor.actor, consultation_id)
        .await
        .unwrap();

    // The patient's join parks while reading history, holding the session.
    store.hold_next.store(true, Ordering::SeqCst);
    let joining = tokio::spawn({
        let gateway = gateway.clone();
        let patient = patient.clone();
        async move {
            gateway
                .handle_frame(patient_conn, &patient, &join_frame)
                .await
        }
    });
    store.entered.notified().await;

    let body = "Silakan ceritakan keluhannya";
    let sending = tokio::spawn({
        let gateway = gateway.clone();
        let doctor = doctor.clone();
        let frame = json!({
            "event": "send_message",
            "data": { "consultationId": consultation_id, "message": body }
        })
        .to_string();
        async move { gateway.handle_frame(doctor_conn, &doctor, &frame).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    store.release.add_permits(1);
    joining.await.unwrap();
    sending.await.unwrap();

    let frames = drain(&mut patient_rx);
    let history_at = frames
        .iter()
        .position(|frame| frame["event"] == "chat_history")
        .expect("history was sent");
    let in_history = frames[history_at]["data"]
        .as_array()
        .unwrap()
        .iter()
        .any(|message| message["body"] == body);
    let live_at = frames
        .iter()
        .position(|frame| frame["event"] == "receive_message" && frame["data"]["body"] == body);

    assert!(
        in_history || live_at.is_some_and(|at| at > history_at),
        "message missing for the joiner: {:?}",
        names(&frames)
    );
}

#[tokio::test]
async fn test_rejected_event_answers_only_the_sender() {
    let fx = GatewayFixture::new().await;
    let (doctor_conn, mut doctor_rx) = fx.gateway.connect(&fx.doctor);
    let (patient_conn, mut patient_rx) = fx.gateway.connect(&fx.patient);
    fx.join(doctor_conn, &fx.doctor).await;
    fx.join(patient_conn, &fx.patient).await;
    drain(&mut doctor_rx);
    drain(&mut patient_rx);

    fx.send(
        patient_conn,
        &fx.patient,
        json!({ "event": "start_consultation", "data": { "consultationId": fx.consultation_id } }),
    )
    .await;

    let frames = drain(&mut patient_rx);
    assert_eq!(names(&frames), vec!["error"]);
    assert_eq!(frames[0]["data"]["code"], "authorization");
    assert!(drain(&mut doctor_rx).is_empty());
    assert!(fx.store.all_messages().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_answers_only_the_sender() {
    let fx = GatewayFixture::new().await;
    let (doctor_conn, mut doctor_rx) = fx.gateway.connect(&fx.doctor);
    let (patient_conn, mut patient_rx) = fx.gateway.connect(&fx.patient);
    fx.join(doctor_conn, &fx.doctor).await;
    fx.join(patient_conn, &fx.patient).await;
    fx.gateway
        .sessions()
        .start(fx.doctor.actor, fx.consultation_id)
        .await
        .unwrap();
    drain(&mut doctor_rx);
    drain(&mut patient_rx);

    fx.store.fail_writes(true);
    fx.send(
        patient_conn,
        &fx.patient,
        json!({ "event": "send_message", "data": { "consultationId": fx.consultation_id, "message": "Halo dok" } }),
    )
    .await;

    let frames = drain(&mut patient_rx);
    assert_eq!(names(&frames), vec!["error"]);
    assert_eq!(frames[0]["data"]["code"], "storage");
    assert!(drain(&mut doctor_rx).is_empty());
}

#[tokio::test]
async fn test_malformed_frame_is_a_validation_error() {
    let fx = GatewayFixture::new().await;
    let (conn, mut rx) = fx.gateway.connect(&fx.patient);

    fx.gateway.handle_frame(conn, &fx.patient, "{not json").await;
    fx.send(conn, &fx.patient, json!({ "event": "join_room", "data": {} }))
        .await;

    let frames = drain(&mut rx);
    assert_eq!(names(&frames), vec!["error", "error"]);
    assert!(frames
        .iter()
        .all(|frame| frame["data"]["code"] == "validation"));
}

// ==============================================================================
// DISCONNECT
// ==============================================================================

#[tokio::test]
async fn test_disconnect_announces_offline_once() {
    let fx = GatewayFixture::new().await;
    let (_doctor_conn, mut doctor_rx) = fx.gateway.connect(&fx.doctor);
    let (stale_conn, _stale_rx) = fx.gateway.connect(&fx.patient);
    let (patient_conn, _patient_rx) = fx.gateway.connect(&fx.patient);
    drain(&mut doctor_rx);

    // An older socket closing after a reconnect leaves the patient online.
    fx.gateway.disconnect(stale_conn, &fx.patient).await;
    assert!(drain(&mut doctor_rx).is_empty());
    assert!(fx.gateway.presence().is_online(fx.patient.actor.id()));

    fx.gateway.disconnect(patient_conn, &fx.patient).await;
    let frames = drain(&mut doctor_rx);
    assert_eq!(names(&frames), vec!["user_status_update"]);
    assert_eq!(frames[0]["data"]["isOnline"], false);
    assert_eq!(fx.gateway.hub().connection_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_active_session_survives_disconnects_and_ended_room_is_released() {
    let fx = GatewayFixture::new().await;
    let (doctor_conn, _doctor_rx) = fx.gateway.connect(&fx.doctor);
    let (patient_conn, _patient_rx) = fx.gateway.connect(&fx.patient);
    fx.join(doctor_conn, &fx.doctor).await;
    fx.join(patient_conn, &fx.patient).await;
    fx.gateway
        .sessions()
        .start(fx.doctor.actor, fx.consultation_id)
        .await
        .unwrap();

    fx.gateway.disconnect(doctor_conn, &fx.doctor).await;
    fx.gateway.disconnect(patient_conn, &fx.patient).await;

    // Nobody is connected, but the session is still live and its timer runs.
    assert_eq!(fx.gateway.sessions().active_sessions().await, 1);
    assert!(fx
        .gateway
        .sessions()
        .scheduler()
        .is_armed(fx.consultation_id));

    tokio::time::sleep(std::time::Duration::from_secs(31 * 60)).await;

    assert_eq!(fx.store.count_where(|m| m.session_end_at.is_some()).await, 1);
    assert_eq!(fx.gateway.sessions().active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_every_connection() {
    let fx = GatewayFixture::new().await;
    let (_conn, mut rx) = fx.gateway.connect(&fx.patient);

    fx.gateway.shutdown().await;

    assert_eq!(fx.gateway.hub().connection_count(), 0);
    assert!(rx.recv().await.is_none());
}
