//! Process-local store and directory. Used by tests and by local runs
//! without a configured database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ConsultationError;
use crate::models::{
    Actor, ConsultationRecord, DeliveryStatus, Message, NewMessage, PartyProfile, SessionMarkers,
};
use crate::services::directory::ConsultationDirectory;
use crate::services::store::MessageStore;

#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<Message>>,
    fail_writes: AtomicBool,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every append and status update fails with a storage error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every row ever written, deleted ones included, in insertion order.
    pub async fn all_messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    pub async fn count_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Message) -> bool,
    {
        self.messages.read().await.iter().filter(|m| predicate(m)).count()
    }

    fn check_writable(&self) -> Result<(), ConsultationError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ConsultationError::Storage("message store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, message: NewMessage) -> Result<Message, ConsultationError> {
        self.check_writable()?;

        let stored = Message {
            id: Uuid::new_v4(),
            consultation_id: message.consultation_id,
            user_id: message.user_id,
            doctor_id: message.doctor_id,
            sender_role: message.sender_role,
            sender_id: message.sender_id,
            body: message.body,
            delivery_status: message.delivery_status,
            session_start_at: message.session_start_at,
            session_end_at: message.session_end_at,
            end_reason: message.end_reason,
            created_at: Utc::now(),
        };
        self.messages.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn find(&self, message_id: Uuid) -> Result<Option<Message>, ConsultationError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .find(|m| m.id == message_id)
            .cloned())
    }

    async fn list_by_session(
        &self,
        consultation_id: Uuid,
    ) -> Result<Vec<Message>, ConsultationError> {
        let mut history: Vec<Message> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.consultation_id == consultation_id)
            .filter(|m| m.delivery_status != DeliveryStatus::Deleted)
            .cloned()
            .collect();
        // Stable, so equal timestamps keep insertion order.
        history.sort_by_key(|m| m.created_at);
        Ok(history)
    }

    async fn update_status(
        &self,
        message_id: Uuid,
        status: DeliveryStatus,
    ) -> Result<Message, ConsultationError> {
        self.check_writable()?;

        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| ConsultationError::NotFound("Message".to_string()))?;
        message.delivery_status = status;
        Ok(message.clone())
    }

    async fn session_markers(
        &self,
        consultation_id: Uuid,
    ) -> Result<SessionMarkers, ConsultationError> {
        let messages = self.messages.read().await;
        let rows = messages.iter().filter(|m| m.consultation_id == consultation_id);

        let mut markers = SessionMarkers::default();
        for row in rows {
            if markers.started_at.is_none() {
                markers.started_at = row.session_start_at;
            }
            if markers.ended_at.is_none() && row.session_end_at.is_some() {
                markers.ended_at = row.session_end_at;
                markers.end_reason = row.end_reason;
            }
        }
        Ok(markers)
    }
}

#[derive(Default)]
pub struct InMemoryDirectory {
    consultations: RwLock<HashMap<Uuid, ConsultationRecord>>,
    patients: RwLock<HashMap<Uuid, PartyProfile>>,
    doctors: RwLock<HashMap<Uuid, PartyProfile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_consultation(&self, record: ConsultationRecord) {
        self.consultations.write().await.insert(record.id, record);
    }

    pub async fn insert_patient(&self, profile: PartyProfile) {
        self.patients.write().await.insert(profile.id, profile);
    }

    pub async fn insert_doctor(&self, profile: PartyProfile) {
        self.doctors.write().await.insert(profile.id, profile);
    }
}

#[async_trait]
impl ConsultationDirectory for InMemoryDirectory {
    async fn find_consultation(
        &self,
        consultation_id: Uuid,
    ) -> Result<Option<ConsultationRecord>, ConsultationError> {
        Ok(self.consultations.read().await.get(&consultation_id).cloned())
    }

    async fn find_party(&self, actor: Actor) -> Result<Option<PartyProfile>, ConsultationError> {
        let profiles = match actor {
            Actor::Patient(_) => &self.patients,
            Actor::Doctor(_) => &self.doctors,
        };
        Ok(profiles.read().await.get(&actor.id()).cloned())
    }
}
