use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::TestConfig;

use consultation_chat_cell::models::{NewMessage, PaymentStatus, SessionSnapshot, SessionState};
use consultation_chat_cell::services::{
    ConsultationDirectory, MessageStore, SupabaseConsultationDirectory, SupabaseMessageStore,
};
use consultation_chat_cell::{Actor, ConsultationError, DeliveryStatus, EndReason};

async fn supabase_for(server: &MockServer) -> Arc<SupabaseClient> {
    let mut config = TestConfig::default().to_app_config();
    config.supabase_url = server.uri();
    Arc::new(SupabaseClient::new(&config))
}

fn message_row(consultation_id: Uuid, body: &str, status: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "consultation_id": consultation_id,
        "user_id": Uuid::new_v4(),
        "doctor_id": Uuid::new_v4(),
        "sender_role": "patient",
        "sender_id": Uuid::new_v4(),
        "body": body,
        "delivery_status": status,
        "session_start_at": null,
        "session_end_at": null,
        "end_reason": null,
        "created_at": Utc::now(),
    })
}

// ==============================================================================
// MESSAGE STORE
// ==============================================================================

#[tokio::test]
async fn test_history_query_excludes_deleted_and_orders_ascending() {
    let server = MockServer::start().await;
    let consultation_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultation_messages"))
        .and(query_param("consultation_id", format!("eq.{}", consultation_id)))
        .and(query_param("delivery_status", "neq.deleted"))
        .and(query_param("order", "created_at.asc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            message_row(consultation_id, "first", "read"),
            message_row(consultation_id, "second", "sent"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = SupabaseMessageStore::new(supabase_for(&server).await);
    let history = store.list_by_session(consultation_id).await.unwrap();

    assert_eq!(history.len(), 2);
    assert_eq!(history[0].body, "first");
    assert_eq!(history[0].delivery_status, DeliveryStatus::Read);
}

#[tokio::test]
async fn test_end_marker_is_inserted_with_reason() {
    let server = MockServer::start().await;
    let consultation_id = Uuid::new_v4();
    let ended_at = Utc::now();

    let mut stored = message_row(consultation_id, "Consultation ended (time is up)", "sent");
    stored["sender_role"] = json!("system");
    stored["sender_id"] = Value::Null;
    stored["session_end_at"] = json!(ended_at);
    stored["end_reason"] = json!("Timeout");

    Mock::given(method("POST"))
        .and(path("/rest/v1/consultation_messages"))
        .and(body_partial_json(json!({
            "consultation_id": consultation_id,
            "sender_role": "system",
            "end_reason": "Timeout",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([stored])))
        .expect(1)
        .mount(&server)
        .await;

    let store = SupabaseMessageStore::new(supabase_for(&server).await);
    let snapshot = SessionSnapshot {
        consultation_id,
        patient_id: Uuid::new_v4(),
        doctor_id: Uuid::new_v4(),
        planned_duration_minutes: 30,
        state: SessionState::Uninitiated,
    };
    let message = store
        .append(NewMessage::end_marker(&snapshot, ended_at, EndReason::Timeout))
        .await
        .unwrap();

    assert_eq!(message.end_reason, Some(EndReason::Timeout));
    assert!(message.session_end_at.is_some());
}

#[tokio::test]
async fn test_open_session_is_derived_from_markers() {
    let server = MockServer::start().await;
    let consultation_id = Uuid::new_v4();
    let started_at = Utc::now();

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultation_messages"))
        .and(query_param("session_start_at", "not.is.null"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "session_start_at": started_at }])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/consultation_messages"))
        .and(query_param("session_end_at", "not.is.null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = SupabaseMessageStore::new(supabase_for(&server).await);
    let open = store.find_open_session(consultation_id).await.unwrap().unwrap();

    assert_eq!(open.consultation_id, consultation_id);
    assert_eq!(open.started_at, started_at);
}

#[tokio::test]
async fn test_status_update_on_missing_row_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/consultation_messages"))
        .and(body_partial_json(json!({ "delivery_status": "read" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = SupabaseMessageStore::new(supabase_for(&server).await);
    let result = store.update_status(Uuid::new_v4(), DeliveryStatus::Read).await;

    assert_matches!(result, Err(ConsultationError::NotFound(_)));
}

#[tokio::test]
async fn test_store_outage_is_a_storage_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultation_messages"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let store = SupabaseMessageStore::new(supabase_for(&server).await);
    let result = store.list_by_session(Uuid::new_v4()).await;

    assert_matches!(result, Err(ConsultationError::Storage(_)));
}

// ==============================================================================
// DIRECTORY
// ==============================================================================

#[tokio::test]
async fn test_checkout_with_embedded_payment_array() {
    let server = MockServer::start().await;
    let consultation_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultation_checkouts"))
        .and(query_param("id", format!("eq.{}", consultation_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": consultation_id,
            "patient_id": Uuid::new_v4(),
            "doctor_id": doctor_id,
            "duration_minutes": 45,
            "checkout_date": Utc::now(),
            "payment": [{ "status": "completed" }],
            "patient": null,
            "doctor": { "id": doctor_id, "full_name": "dr. Andi Wijaya" },
        }])))
        .mount(&server)
        .await;

    let directory = SupabaseConsultationDirectory::new(supabase_for(&server).await);
    let record = directory
        .find_consultation(consultation_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(record.payment_status, Some(PaymentStatus::Completed));
    assert_eq!(record.duration_minutes, 45);
    assert_eq!(record.doctor.unwrap().name, "dr. Andi Wijaya");
    assert!(record.patient.is_none());
}

#[tokio::test]
async fn test_party_lookup_uses_role_table() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": doctor_id, "full_name": "dr. Andi Wijaya" }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let directory = SupabaseConsultationDirectory::new(supabase_for(&server).await);

    let doctor = directory.find_party(Actor::Doctor(doctor_id)).await.unwrap();
    assert_eq!(doctor.unwrap().name, "dr. Andi Wijaya");

    let patient = directory.find_party(Actor::Patient(doctor_id)).await.unwrap();
    assert!(patient.is_none());
}
