use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_utils::jwt::validate_token;

use crate::error::ConsultationError;
use crate::events::{
    ClientEvent, ConsultationStatus, ConsultationSummary, PartyPresence, RoomJoined, ServerEvent,
    UserJoined, UserStatusUpdate,
};
use crate::models::{room_id, Actor, ConsultationContext, Party, PartyProfile};
use crate::services::directory::ConsultationDirectory;
use crate::services::hub::{ConnectionHub, ConnectionId};
use crate::services::presence::PresenceRegistry;
use crate::services::session::ConsultationSessionService;
use crate::services::store::MessageStore;

/// Entry point for every socket: authenticates the handshake, routes
/// inbound events to the session service and answers the sender directly.
pub struct ConsultationGateway {
    config: Arc<AppConfig>,
    directory: Arc<dyn ConsultationDirectory>,
    sessions: Arc<ConsultationSessionService>,
    hub: Arc<ConnectionHub>,
    presence: PresenceRegistry,
}

impl ConsultationGateway {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn ConsultationDirectory>,
    ) -> Self {
        let hub = Arc::new(ConnectionHub::new(config.chat_send_queue_capacity));
        let sessions = ConsultationSessionService::new(store, Arc::clone(&directory), hub.clone());

        Self {
            config,
            directory,
            sessions,
            hub,
            presence: PresenceRegistry::new(),
        }
    }

    pub fn sessions(&self) -> &Arc<ConsultationSessionService> {
        &self.sessions
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    // ==========================================================================
    // HANDSHAKE
    // ==========================================================================

    /// Validates the bearer token and resolves the party's display name.
    pub async fn authenticate(&self, token: &str) -> Result<Party, ConsultationError> {
        let user = validate_token(token, &self.config.supabase_jwt_secret)
            .map_err(|e| ConsultationError::Authentication(e.to_string()))?;

        let actor = Actor::from_claims(&user.id, user.role.as_deref()).ok_or_else(|| {
            ConsultationError::Authentication(format!(
                "Unsupported account role: {}",
                user.role.as_deref().unwrap_or("none")
            ))
        })?;

        let profile = self
            .directory
            .find_party(actor)
            .await?
            .ok_or_else(|| ConsultationError::Authentication("Account not found".to_string()))?;

        Ok(Party {
            actor,
            name: profile.name,
        })
    }

    /// Registers a connection and announces the party as online.
    pub fn connect(&self, party: &Party) -> (ConnectionId, mpsc::Receiver<String>) {
        let (connection_id, outbound) = self.hub.register(party.clone());
        self.presence.mark_online(&party.actor, connection_id);

        info!(
            "{:?} connected as {} on {}",
            party.actor.role(),
            party.name,
            connection_id
        );
        self.hub.broadcast_all_except(
            Some(connection_id),
            &ServerEvent::UserStatusUpdate(UserStatusUpdate {
                user_id: party.actor.id(),
                is_online: true,
            }),
        );

        (connection_id, outbound)
    }

    // ==========================================================================
    // INBOUND EVENTS
    // ==========================================================================

    /// Handles one text frame. Failures go back to the sender only.
    pub async fn handle_frame(&self, connection_id: ConnectionId, party: &Party, frame: &str) {
        let event = match serde_json::from_str::<ClientEvent>(frame) {
            Ok(event) => event,
            Err(e) => {
                debug!("Malformed frame on {}: {}", connection_id, e);
                let err = ConsultationError::Validation(format!("Malformed event: {}", e));
                self.hub.send_to(connection_id, &ServerEvent::error(&err));
                return;
            }
        };

        let name = event.name();
        if let Err(err) = self.handle_event(connection_id, party, event).await {
            warn!("{} from {} rejected: {}", name, party.name, err);
            self.hub.send_to(connection_id, &ServerEvent::error(&err));
        }
    }

    #[instrument(skip(self, party, event), fields(client_event = event.name(), actor = ?party.actor))]
    pub async fn handle_event(
        &self,
        connection_id: ConnectionId,
        party: &Party,
        event: ClientEvent,
    ) -> Result<(), ConsultationError> {
        match event {
            ClientEvent::JoinRoom { consultation_id } => {
                self.join_room(connection_id, party, consultation_id).await
            }
            ClientEvent::StartConsultation { consultation_id } => {
                self.sessions.start(party.actor, consultation_id).await?;
                Ok(())
            }
            ClientEvent::SendMessage {
                consultation_id,
                message,
            } => {
                self.sessions.send(party, consultation_id, message).await?;
                Ok(())
            }
            ClientEvent::MarkAsRead { message_id } => {
                self.sessions.mark_read(party.actor, message_id).await?;
                Ok(())
            }
            ClientEvent::DeleteMessage { message_id } => {
                self.sessions.delete(party.actor, message_id).await?;
                Ok(())
            }
            ClientEvent::EndConsultation { consultation_id } => {
                self.sessions
                    .end_by_patient(party.actor, consultation_id)
                    .await?;
                Ok(())
            }
        }
    }

    /// Membership and the joiner's room frames are set up while the session
    /// is still locked, so a concurrent broadcast either lands in the history
    /// or arrives after it.
    async fn join_room(
        &self,
        connection_id: ConnectionId,
        party: &Party,
        consultation_id: Uuid,
    ) -> Result<(), ConsultationError> {
        self.sessions
            .join_with(party, consultation_id, |joined| {
                self.hub.join_room(connection_id, consultation_id);

                self.hub.send_to(
                    connection_id,
                    &ServerEvent::RoomJoined(RoomJoined {
                        room_id: room_id(consultation_id),
                        consultation: self.summary(&joined.context),
                    }),
                );
                self.hub.publish_except(
                    consultation_id,
                    connection_id,
                    &ServerEvent::UserJoined(UserJoined {
                        user_id: party.actor.id(),
                        name: party.name.clone(),
                        role: party.actor.role(),
                    }),
                );
                self.hub.send_to(
                    connection_id,
                    &ServerEvent::ChatHistory(joined.history.clone()),
                );
                self.hub.send_to(
                    connection_id,
                    &ServerEvent::ConsultationStatus(ConsultationStatus::for_viewer(
                        &joined.snapshot,
                        &party.actor,
                        Utc::now(),
                    )),
                );
            })
            .await?;
        Ok(())
    }

    fn summary(&self, context: &ConsultationContext) -> ConsultationSummary {
        let presence = |profile: &Option<PartyProfile>| {
            profile.as_ref().map(|p| PartyPresence {
                id: p.id,
                name: p.name.clone(),
                online: self.presence.is_online(p.id),
            })
        };

        ConsultationSummary {
            id: context.consultation_id,
            checkout_date: context.checkout_date,
            duration_minutes: context.planned_duration_minutes,
            doctor: presence(&context.doctor),
            patient: presence(&context.patient),
        }
    }

    // ==========================================================================
    // TEARDOWN
    // ==========================================================================

    /// Removes the connection. Sessions are left running; their timers keep
    /// going whether or not anyone is connected.
    pub async fn disconnect(&self, connection_id: ConnectionId, party: &Party) {
        let rooms = self.hub.unregister(connection_id);

        if self.presence.mark_offline(&party.actor, connection_id) {
            self.hub.broadcast_all_except(
                None,
                &ServerEvent::UserStatusUpdate(UserStatusUpdate {
                    user_id: party.actor.id(),
                    is_online: false,
                }),
            );
        }

        for (consultation_id, now_empty) in rooms {
            if now_empty && self.sessions.release_room(consultation_id).await {
                debug!("Released ended consultation {}", consultation_id);
            }
        }

        info!("{} disconnected from {}", party.name, connection_id);
    }

    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
        let closed = self.hub.close_all();
        info!("Consultation gateway stopped, {} connections closed", closed);
    }
}
