use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::ConsultationError;
use crate::models::{
    planned_end, Actor, ConsultationContext, EndReason, SessionMarkers, SessionSnapshot,
    SessionState,
};
use crate::services::scheduler::TimerHandle;

/// Live state of one consultation. All transitions go through the entry's
/// mutex, so at most one start or end is in flight per consultation.
#[derive(Debug)]
pub struct SessionEntry {
    context: ConsultationContext,
    state: SessionState,
    recovered: bool,
    timer: Option<TimerHandle>,
}

impl SessionEntry {
    fn new(context: ConsultationContext) -> Self {
        Self {
            context,
            state: SessionState::Uninitiated,
            recovered: false,
            timer: None,
        }
    }

    pub fn context(&self) -> &ConsultationContext {
        &self.context
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    pub fn timer(&self) -> Option<TimerHandle> {
        self.timer
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            consultation_id: self.context.consultation_id,
            patient_id: self.context.patient_id,
            doctor_id: self.context.doctor_id,
            planned_duration_minutes: self.context.planned_duration_minutes,
            state: self.state,
        }
    }

    /// When a session started now would end.
    pub fn planned_end(&self, started_at: DateTime<Utc>) -> DateTime<Utc> {
        planned_end(started_at, self.context.planned_duration_minutes)
    }

    pub fn require_party(&self, actor: &Actor) -> Result<(), ConsultationError> {
        if self.context.is_party(actor) {
            Ok(())
        } else {
            Err(ConsultationError::Forbidden(
                "You do not have access to this consultation room".to_string(),
            ))
        }
    }

    /// Uninitiated → Active is the doctor's move and happens at most once.
    pub fn check_start(&self, actor: &Actor) -> Result<(), ConsultationError> {
        if !matches!(actor, Actor::Doctor(_)) {
            return Err(ConsultationError::Forbidden(
                "Only the doctor can start the consultation".to_string(),
            ));
        }
        match self.state {
            SessionState::Uninitiated => Ok(()),
            SessionState::Active { .. } => Err(ConsultationError::AlreadyActive),
            SessionState::Ended { .. } => Err(ConsultationError::AlreadyEnded),
        }
    }

    /// Active → Ended on the patient's request.
    pub fn check_patient_end(&self, actor: &Actor) -> Result<(), ConsultationError> {
        if !matches!(actor, Actor::Patient(_)) {
            return Err(ConsultationError::Forbidden(
                "Only the patient can end the consultation".to_string(),
            ));
        }
        match self.state {
            SessionState::Active { .. } => Ok(()),
            SessionState::Uninitiated => Err(ConsultationError::NotActive),
            SessionState::Ended { .. } => Err(ConsultationError::AlreadyEnded),
        }
    }

    pub fn check_send(&self) -> Result<(), ConsultationError> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(ConsultationError::NotActive)
        }
    }

    /// Adopts whatever the durable log says. Returns true when the log
    /// disagreed with the in-memory state.
    pub fn sync_markers(&mut self, markers: &SessionMarkers) -> bool {
        let durable = SessionState::from_markers(markers, self.context.planned_duration_minutes);
        self.recovered = true;
        if durable != self.state {
            debug!(
                "Consultation {} state {} replaced by {} from the message log",
                self.context.consultation_id,
                self.state.name(),
                durable.name()
            );
            self.state = durable;
            true
        } else {
            false
        }
    }

    pub fn activate(&mut self, started_at: DateTime<Utc>, timer: TimerHandle) {
        self.state = SessionState::Active {
            started_at,
            ends_at: self.planned_end(started_at),
        };
        self.timer = Some(timer);
    }

    pub fn set_timer(&mut self, timer: TimerHandle) {
        self.timer = Some(timer);
    }

    pub fn take_timer(&mut self) -> Option<TimerHandle> {
        self.timer.take()
    }

    pub fn finish(&mut self, ended_at: DateTime<Utc>, reason: EndReason) {
        let started_at = match self.state {
            SessionState::Active { started_at, .. } => Some(started_at),
            SessionState::Ended { started_at, .. } => started_at,
            SessionState::Uninitiated => None,
        };
        self.state = SessionState::Ended {
            started_at,
            ended_at,
            reason: Some(reason),
        };
        self.timer = None;
    }
}

pub type SharedSession = Arc<Mutex<SessionEntry>>;

/// Sessions materialized in this process, keyed by consultation id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SharedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, consultation_id: Uuid) -> Option<SharedSession> {
        self.sessions.read().await.get(&consultation_id).cloned()
    }

    /// Returns the existing entry, or materializes one in Uninitiated state
    /// pending recovery from the log.
    pub async fn get_or_insert(&self, context: ConsultationContext) -> SharedSession {
        if let Some(existing) = self.get(context.consultation_id).await {
            return existing;
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(context.consultation_id)
            .or_insert_with(|| {
                debug!("Materializing session for consultation {}", context.consultation_id);
                Arc::new(Mutex::new(SessionEntry::new(context)))
            })
            .clone()
    }

    /// Drops an Ended session. Busy or live sessions are left alone.
    pub async fn evict_if_ended(&self, consultation_id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        let ended = match sessions.get(&consultation_id) {
            Some(shared) => shared
                .try_lock()
                .map(|entry| entry.state.is_ended())
                .unwrap_or(false),
            None => false,
        };
        if ended {
            sessions.remove(&consultation_id);
            debug!("Evicted ended session {}", consultation_id);
        }
        ended
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn drain(&self) -> Vec<SharedSession> {
        self.sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect()
    }
}
