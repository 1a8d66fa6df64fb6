#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use consultation_chat_cell::models::{ConsultationRecord, Party, PartyProfile, PaymentStatus};
use consultation_chat_cell::services::{
    ConsultationSessionService, InMemoryDirectory, InMemoryMessageStore, RecordingBroadcaster,
};
use consultation_chat_cell::Actor;

pub const PLANNED_MINUTES: i64 = 30;

pub struct Fixture {
    pub consultation_id: Uuid,
    pub patient: Party,
    pub doctor: Party,
    pub store: Arc<InMemoryMessageStore>,
    pub directory: Arc<InMemoryDirectory>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub service: Arc<ConsultationSessionService>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_payment(Some(PaymentStatus::Completed)).await
    }

    pub async fn with_payment(payment_status: Option<PaymentStatus>) -> Self {
        let store = Arc::new(InMemoryMessageStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let broadcaster = Arc::new(RecordingBroadcaster::new());

        let patient = Party {
            actor: Actor::Patient(Uuid::new_v4()),
            name: "Siti Rahma".to_string(),
        };
        let doctor = Party {
            actor: Actor::Doctor(Uuid::new_v4()),
            name: "dr. Andi Wijaya".to_string(),
        };
        let consultation_id =
            seed_consultation(&directory, &patient, &doctor, payment_status).await;

        let service = ConsultationSessionService::new(
            store.clone(),
            directory.clone(),
            broadcaster.clone(),
        );

        Self {
            consultation_id,
            patient,
            doctor,
            store,
            directory,
            broadcaster,
            service,
        }
    }

    /// A second service over the same store, as after a process restart.
    pub fn restarted_service(&self) -> Arc<ConsultationSessionService> {
        ConsultationSessionService::new(
            self.store.clone(),
            self.directory.clone(),
            Arc::new(RecordingBroadcaster::new()),
        )
    }

    pub async fn start(&self) {
        self.service
            .start(self.doctor.actor, self.consultation_id)
            .await
            .expect("doctor can start a paid consultation");
    }

    pub async fn end_markers(&self) -> usize {
        self.store.count_where(|m| m.session_end_at.is_some()).await
    }

    pub async fn start_markers(&self) -> usize {
        self.store.count_where(|m| m.session_start_at.is_some()).await
    }
}

pub async fn seed_consultation(
    directory: &InMemoryDirectory,
    patient: &Party,
    doctor: &Party,
    payment_status: Option<PaymentStatus>,
) -> Uuid {
    let patient_profile = PartyProfile {
        id: patient.actor.id(),
        name: patient.name.clone(),
    };
    let doctor_profile = PartyProfile {
        id: doctor.actor.id(),
        name: doctor.name.clone(),
    };
    directory.insert_patient(patient_profile.clone()).await;
    directory.insert_doctor(doctor_profile.clone()).await;

    let consultation_id = Uuid::new_v4();
    directory
        .insert_consultation(ConsultationRecord {
            id: consultation_id,
            patient_id: patient.actor.id(),
            doctor_id: doctor.actor.id(),
            duration_minutes: PLANNED_MINUTES,
            checkout_date: Utc::now(),
            payment_status,
            patient: Some(patient_profile),
            doctor: Some(doctor_profile),
        })
        .await;
    consultation_id
}
