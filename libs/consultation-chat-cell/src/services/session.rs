use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::ConsultationError;
use crate::events::{
    ConsultationEnded, ConsultationStarted, MessageDeleted, MessageRead, ReceivedMessage,
    SenderInfo, ServerEvent,
};
use crate::models::{
    Actor, ConsultationContext, DeliveryStatus, EndReason, Message, NewMessage, Party,
    SessionSnapshot, SessionState,
};
use crate::services::access::AccessGuard;
use crate::services::broadcaster::RoomBroadcaster;
use crate::services::directory::ConsultationDirectory;
use crate::services::registry::{SessionEntry, SessionRegistry, SharedSession};
use crate::services::scheduler::{TimeoutScheduler, TimerHandle};
use crate::services::store::MessageStore;

/// Delay before a timeout that failed to persist is tried again.
pub const TIMEOUT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// What a successful join hands back to the gateway.
#[derive(Debug, Clone)]
pub struct JoinedRoom {
    pub context: ConsultationContext,
    pub snapshot: SessionSnapshot,
    pub history: Vec<Message>,
}

/// Owns the session lifecycle: materialization and recovery, the
/// start/end transitions, the timeout, and message operations.
pub struct ConsultationSessionService {
    store: Arc<dyn MessageStore>,
    guard: AccessGuard,
    registry: SessionRegistry,
    scheduler: TimeoutScheduler,
    broadcaster: Arc<dyn RoomBroadcaster>,
    this: Weak<ConsultationSessionService>,
}

impl ConsultationSessionService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn ConsultationDirectory>,
        broadcaster: Arc<dyn RoomBroadcaster>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            store,
            guard: AccessGuard::new(directory),
            registry: SessionRegistry::new(),
            scheduler: TimeoutScheduler::new(),
            broadcaster,
            this: this.clone(),
        })
    }

    pub fn scheduler(&self) -> &TimeoutScheduler {
        &self.scheduler
    }

    pub async fn active_sessions(&self) -> usize {
        self.registry.len().await
    }

    pub async fn snapshot(&self, consultation_id: Uuid) -> Option<SessionSnapshot> {
        let shared = self.registry.get(consultation_id).await?;
        let entry = shared.lock().await;
        Some(entry.snapshot())
    }

    // ==========================================================================
    // JOIN
    // ==========================================================================

    /// Admits a party and returns the room state they need. Payment and
    /// membership are checked on every join, not only the first.
    pub async fn join(
        &self,
        party: &Party,
        consultation_id: Uuid,
    ) -> Result<JoinedRoom, ConsultationError> {
        self.join_with(party, consultation_id, |_| {}).await
    }

    /// Like [`join`](Self::join), but runs `on_joined` before the session
    /// lock is released. Room membership set up there sees every broadcast
    /// that is not already in the returned history.
    #[instrument(skip(self, party, on_joined), fields(actor = ?party.actor))]
    pub async fn join_with<F>(
        &self,
        party: &Party,
        consultation_id: Uuid,
        on_joined: F,
    ) -> Result<JoinedRoom, ConsultationError>
    where
        F: FnOnce(&JoinedRoom) + Send,
    {
        let context = self.guard.authorize_join(party.actor, consultation_id).await?;
        let shared = self.registry.get_or_insert(context).await;

        let mut entry = shared.lock().await;
        self.recover(&mut entry).await?;
        let history = self.store.list_by_session(consultation_id).await?;

        debug!(
            "{} joined consultation {} ({} messages, state {})",
            party.name,
            consultation_id,
            history.len(),
            entry.state().name()
        );

        let joined = JoinedRoom {
            context: entry.context().clone(),
            snapshot: entry.snapshot(),
            history,
        };
        on_joined(&joined);
        Ok(joined)
    }

    // ==========================================================================
    // LIFECYCLE TRANSITIONS
    // ==========================================================================

    #[instrument(skip(self))]
    pub async fn start(
        &self,
        actor: Actor,
        consultation_id: Uuid,
    ) -> Result<SessionSnapshot, ConsultationError> {
        let mut entry = self.lock_session(&actor, consultation_id).await?;
        entry.check_start(&actor)?;

        // Another process may have written a marker since recovery.
        let markers = self.store.session_markers(consultation_id).await?;
        if entry.sync_markers(&markers) {
            return Err(match entry.state() {
                SessionState::Ended { .. } => ConsultationError::AlreadyEnded,
                _ => ConsultationError::AlreadyActive,
            });
        }

        let started_at = Utc::now();
        let marker = self
            .store
            .append(NewMessage::start_marker(&entry.snapshot(), started_at))
            .await?;

        let ends_at = entry.planned_end(started_at);
        let duration = ends_at - started_at;
        let timer = self.arm_timeout(consultation_id, duration.to_std().unwrap_or_default());
        entry.activate(started_at, timer);

        info!(
            "Consultation {} started, ends at {}",
            consultation_id, ends_at
        );
        self.broadcaster.publish(
            consultation_id,
            &ServerEvent::ConsultationStarted(ConsultationStarted {
                start_time: started_at,
                end_time: ends_at,
                remaining_time_ms: duration.num_milliseconds(),
                message: marker,
            }),
        );

        Ok(entry.snapshot())
    }

    #[instrument(skip(self))]
    pub async fn end_by_patient(
        &self,
        actor: Actor,
        consultation_id: Uuid,
    ) -> Result<SessionSnapshot, ConsultationError> {
        let mut entry = self.lock_session(&actor, consultation_id).await?;
        entry.check_patient_end(&actor)?;
        self.record_end(&mut entry, EndReason::PatientEnded).await
    }

    /// Timer callback. Losing the race to an explicit end is a silent no-op.
    #[instrument(skip(self))]
    pub async fn end_on_timeout(&self, consultation_id: Uuid) {
        let Some(shared) = self.registry.get(consultation_id).await else {
            debug!("Timeout for consultation {} with no live session", consultation_id);
            return;
        };

        {
            let mut entry = shared.lock().await;
            if !entry.state().is_active() {
                debug!(
                    "Timeout for consultation {} ignored in state {}",
                    consultation_id,
                    entry.state().name()
                );
                return;
            }

            match self.record_end(&mut entry, EndReason::Timeout).await {
                Ok(_) => info!("Consultation {} ended on timeout", consultation_id),
                Err(ConsultationError::AlreadyEnded) => {
                    debug!("Consultation {} was already ended elsewhere", consultation_id)
                }
                Err(e) => {
                    error!(
                        "Failed to end consultation {} on timeout, retrying in {:?}: {}",
                        consultation_id, TIMEOUT_RETRY_DELAY, e
                    );
                    let retry = self.arm_timeout(consultation_id, TIMEOUT_RETRY_DELAY);
                    entry.set_timer(retry);
                    return;
                }
            }
        }

        if !self.broadcaster.has_members(consultation_id) {
            self.registry.evict_if_ended(consultation_id).await;
        }
    }

    /// Writes the end marker first; memory and the timer only change once
    /// the write has succeeded.
    async fn record_end(
        &self,
        entry: &mut SessionEntry,
        reason: EndReason,
    ) -> Result<SessionSnapshot, ConsultationError> {
        let consultation_id = entry.context().consultation_id;

        let markers = self.store.session_markers(consultation_id).await?;
        if markers.ended_at.is_some() {
            entry.sync_markers(&markers);
            if let Some(timer) = entry.take_timer() {
                self.scheduler.cancel_handle(&timer);
            }
            return Err(ConsultationError::AlreadyEnded);
        }

        let ended_at = Utc::now();
        self.store
            .append(NewMessage::end_marker(&entry.snapshot(), ended_at, reason))
            .await?;

        if let Some(timer) = entry.take_timer() {
            self.scheduler.cancel_handle(&timer);
        }
        entry.finish(ended_at, reason);

        self.broadcaster.publish(
            consultation_id,
            &ServerEvent::ConsultationEnded(ConsultationEnded {
                reason,
                message: reason.system_message().to_string(),
            }),
        );

        Ok(entry.snapshot())
    }

    // ==========================================================================
    // MESSAGES
    // ==========================================================================

    #[instrument(skip(self, party, body), fields(actor = ?party.actor))]
    pub async fn send(
        &self,
        party: &Party,
        consultation_id: Uuid,
        body: String,
    ) -> Result<Message, ConsultationError> {
        if body.trim().is_empty() {
            return Err(ConsultationError::Validation(
                "Message must not be empty".to_string(),
            ));
        }

        let entry = self.lock_session(&party.actor, consultation_id).await?;
        entry.check_send()?;

        let message = self
            .store
            .append(NewMessage::from_party(&entry.snapshot(), &party.actor, body))
            .await?;

        self.broadcaster.publish(
            consultation_id,
            &ServerEvent::ReceiveMessage(ReceivedMessage {
                message: message.clone(),
                sender: SenderInfo {
                    id: party.actor.id(),
                    name: party.name.clone(),
                    role: party.actor.role(),
                },
            }),
        );

        Ok(message)
    }

    /// Marking an already read message again changes nothing and broadcasts nothing.
    #[instrument(skip(self))]
    pub async fn mark_read(
        &self,
        actor: Actor,
        message_id: Uuid,
    ) -> Result<Message, ConsultationError> {
        let message = self.find_message(message_id).await?;
        if !message.involves(&actor) {
            return Err(ConsultationError::Forbidden(
                "You do not have access to this message".to_string(),
            ));
        }

        let _serialized = self.serialize_on(message.consultation_id).await;
        let message = self.find_message(message_id).await?;
        match message.delivery_status {
            DeliveryStatus::Read => return Ok(message),
            DeliveryStatus::Deleted => {
                return Err(ConsultationError::MessageStateConflict(
                    "Message has been deleted".to_string(),
                ))
            }
            DeliveryStatus::Sent => {}
        }

        let updated = self
            .store
            .update_status(message_id, DeliveryStatus::Read)
            .await?;
        self.broadcaster.publish(
            updated.consultation_id,
            &ServerEvent::MessageRead(MessageRead {
                message_id,
                status: DeliveryStatus::Read,
            }),
        );
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        actor: Actor,
        message_id: Uuid,
    ) -> Result<Message, ConsultationError> {
        let message = self.find_message(message_id).await?;
        if !message.is_sent_by(&actor) {
            return Err(ConsultationError::Forbidden(
                "You can only delete messages you sent".to_string(),
            ));
        }

        let _serialized = self.serialize_on(message.consultation_id).await;
        let message = self.find_message(message_id).await?;
        if !message
            .delivery_status
            .can_transition_to(&DeliveryStatus::Deleted)
        {
            let reason = match message.delivery_status {
                DeliveryStatus::Read => "Message has already been read",
                _ => "Message has already been deleted",
            };
            return Err(ConsultationError::MessageStateConflict(reason.to_string()));
        }

        let updated = self
            .store
            .update_status(message_id, DeliveryStatus::Deleted)
            .await?;
        self.broadcaster.publish(
            updated.consultation_id,
            &ServerEvent::MessageDeleted(MessageDeleted { message_id }),
        );
        Ok(updated)
    }

    // ==========================================================================
    // TEARDOWN
    // ==========================================================================

    /// Called once nobody is left in the room.
    pub async fn release_room(&self, consultation_id: Uuid) -> bool {
        self.registry.evict_if_ended(consultation_id).await
    }

    pub async fn shutdown(&self) {
        let cancelled = self.scheduler.cancel_all();
        let drained = self.registry.drain().await.len();
        info!(
            "Session service stopped: {} timers cancelled, {} sessions dropped",
            cancelled, drained
        );
    }

    // ==========================================================================
    // INTERNALS
    // ==========================================================================

    async fn find_message(&self, message_id: Uuid) -> Result<Message, ConsultationError> {
        self.store
            .find(message_id)
            .await?
            .ok_or_else(|| ConsultationError::NotFound("Message".to_string()))
    }

    /// Locks the live session for a consultation, materializing it through
    /// the access guard when this process has not seen it yet.
    async fn lock_session(
        &self,
        actor: &Actor,
        consultation_id: Uuid,
    ) -> Result<OwnedMutexGuard<SessionEntry>, ConsultationError> {
        let shared = match self.registry.get(consultation_id).await {
            Some(shared) => shared,
            None => {
                let context = self.guard.authorize_join(*actor, consultation_id).await?;
                self.registry.get_or_insert(context).await
            }
        };

        let mut entry = shared.lock_owned().await;
        entry.require_party(actor)?;
        self.recover(&mut entry).await?;
        Ok(entry)
    }

    async fn serialize_on(&self, consultation_id: Uuid) -> Option<OwnedMutexGuard<SessionEntry>> {
        let shared: SharedSession = self.registry.get(consultation_id).await?;
        Some(shared.lock_owned().await)
    }

    /// First touch of a session in this process: rebuild state from the log
    /// and re-arm the timeout for whatever time is left.
    async fn recover(&self, entry: &mut SessionEntry) -> Result<(), ConsultationError> {
        if entry.is_recovered() {
            return Ok(());
        }

        let consultation_id = entry.context().consultation_id;
        let markers = self.store.session_markers(consultation_id).await?;
        entry.sync_markers(&markers);

        if let SessionState::Active { ends_at, .. } = entry.state() {
            let remaining = (ends_at - Utc::now()).to_std().unwrap_or_default();
            if remaining.is_zero() {
                warn!(
                    "Consultation {} overran its planned end while unattended",
                    consultation_id
                );
            } else {
                info!(
                    "Recovered active consultation {} with {:?} remaining",
                    consultation_id, remaining
                );
            }
            let timer = self.arm_timeout(consultation_id, remaining);
            entry.set_timer(timer);
        }
        Ok(())
    }

    fn arm_timeout(&self, consultation_id: Uuid, delay: Duration) -> TimerHandle {
        let service = self.this.clone();
        self.scheduler.arm(consultation_id, delay, move || async move {
            if let Some(service) = service.upgrade() {
                service.end_on_timeout(consultation_id).await;
            }
        })
    }
}
