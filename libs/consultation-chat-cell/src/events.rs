//! Wire protocol. Every frame is `{"event": "<name>", "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConsultationError, ErrorKind};
use crate::models::{
    Actor, DeliveryStatus, EndReason, Message, SenderRole, SessionSnapshot, SessionState,
};

/// Party → server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinRoom { consultation_id: Uuid },
    StartConsultation { consultation_id: Uuid },
    SendMessage { consultation_id: Uuid, message: String },
    MarkAsRead { message_id: Uuid },
    DeleteMessage { message_id: Uuid },
    EndConsultation { consultation_id: Uuid },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "join_room",
            ClientEvent::StartConsultation { .. } => "start_consultation",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::MarkAsRead { .. } => "mark_as_read",
            ClientEvent::DeleteMessage { .. } => "delete_message",
            ClientEvent::EndConsultation { .. } => "end_consultation",
        }
    }
}

/// Server → party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomJoined(RoomJoined),
    UserJoined(UserJoined),
    ChatHistory(Vec<Message>),
    ConsultationStatus(ConsultationStatus),
    ConsultationStarted(ConsultationStarted),
    ReceiveMessage(ReceivedMessage),
    MessageRead(MessageRead),
    MessageDeleted(MessageDeleted),
    ConsultationEnded(ConsultationEnded),
    UserStatusUpdate(UserStatusUpdate),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::RoomJoined(_) => "room_joined",
            ServerEvent::UserJoined(_) => "user_joined",
            ServerEvent::ChatHistory(_) => "chat_history",
            ServerEvent::ConsultationStatus(_) => "consultation_status",
            ServerEvent::ConsultationStarted(_) => "consultation_started",
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::MessageRead(_) => "message_read",
            ServerEvent::MessageDeleted(_) => "message_deleted",
            ServerEvent::ConsultationEnded(_) => "consultation_ended",
            ServerEvent::UserStatusUpdate(_) => "user_status_update",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn error(err: &ConsultationError) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: err.to_string(),
            code: err.kind(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyPresence {
    pub id: Uuid,
    pub name: String,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationSummary {
    pub id: Uuid,
    pub checkout_date: DateTime<Utc>,
    pub duration_minutes: i64,
    pub doctor: Option<PartyPresence>,
    pub patient: Option<PartyPresence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    pub room_id: String,
    pub consultation: ConsultationSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoined {
    pub user_id: Uuid,
    pub name: String,
    pub role: SenderRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConsultationStatus {
    /// Status as seen by `viewer` at `now`. Waiting hints differ by role.
    pub fn for_viewer(snapshot: &SessionSnapshot, viewer: &Actor, now: DateTime<Utc>) -> Self {
        let status = snapshot.state.name().to_string();
        match snapshot.state {
            SessionState::Uninitiated => {
                let hint = match viewer {
                    Actor::Doctor(_) => "Start the consultation with your patient",
                    Actor::Patient(_) => "Waiting for the doctor to start the consultation",
                };
                Self {
                    status,
                    start_time: None,
                    end_time: None,
                    remaining_time_ms: None,
                    reason: None,
                    message: Some(hint.to_string()),
                }
            }
            SessionState::Active { started_at, ends_at } => Self {
                status,
                start_time: Some(started_at),
                end_time: Some(ends_at),
                remaining_time_ms: Some((ends_at - now).num_milliseconds().max(0)),
                reason: None,
                message: None,
            },
            SessionState::Ended {
                started_at,
                ended_at,
                reason,
            } => Self {
                status,
                start_time: started_at,
                end_time: Some(ended_at),
                remaining_time_ms: Some(0),
                reason,
                message: reason.map(|r| r.system_message().to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationStarted {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub remaining_time_ms: i64,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    pub id: Uuid,
    pub name: String,
    pub role: SenderRole,
}

/// Message rows keep their column names; `sender` is added alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub sender: SenderInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub message_id: Uuid,
    pub status: DeliveryStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub message_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationEnded {
    pub reason: EndReason,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusUpdate {
    pub user_id: Uuid,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub code: ErrorKind,
}
