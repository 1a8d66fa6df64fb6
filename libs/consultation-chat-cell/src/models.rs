// libs/consultation-chat-cell/src/models.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// PARTIES
// ==============================================================================

/// Who is acting. Every permission check matches on this once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    Patient(Uuid),
    Doctor(Uuid),
}

impl Actor {
    /// Maps a JWT subject and role claim onto an actor. Supabase issues
    /// `"authenticated"` for ordinary accounts, which are patients here.
    pub fn from_claims(subject: &str, role: Option<&str>) -> Option<Self> {
        let id = Uuid::parse_str(subject).ok()?;
        match role {
            Some("doctor") => Some(Actor::Doctor(id)),
            Some("patient") | Some("authenticated") | None => Some(Actor::Patient(id)),
            Some(_) => None,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Actor::Patient(id) | Actor::Doctor(id) => *id,
        }
    }

    pub fn role(&self) -> SenderRole {
        match self {
            Actor::Patient(_) => SenderRole::Patient,
            Actor::Doctor(_) => SenderRole::Doctor,
        }
    }
}

/// An authenticated connection's identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Party {
    pub actor: Actor,
    pub name: String,
}

/// Account row as the directory returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyProfile {
    pub id: Uuid,
    #[serde(rename = "full_name")]
    pub name: String,
}

// ==============================================================================
// CONSULTATION RECORDS (owned by the checkout/payment pipeline)
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Processing,
    Completed,
    Pending,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub duration_minutes: i64,
    pub checkout_date: DateTime<Utc>,
    pub payment_status: Option<PaymentStatus>,
    pub patient: Option<PartyProfile>,
    pub doctor: Option<PartyProfile>,
}

/// What the access guard hands to the registry once a party is admitted.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsultationContext {
    pub consultation_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub planned_duration_minutes: i64,
    pub checkout_date: DateTime<Utc>,
    pub patient: Option<PartyProfile>,
    pub doctor: Option<PartyProfile>,
}

impl ConsultationContext {
    pub fn from_record(record: ConsultationRecord) -> Self {
        Self {
            consultation_id: record.id,
            patient_id: record.patient_id,
            doctor_id: record.doctor_id,
            planned_duration_minutes: record.duration_minutes,
            checkout_date: record.checkout_date,
            patient: record.patient,
            doctor: record.doctor,
        }
    }

    pub fn is_party(&self, actor: &Actor) -> bool {
        match actor {
            Actor::Patient(id) => *id == self.patient_id,
            Actor::Doctor(id) => *id == self.doctor_id,
        }
    }
}

// ==============================================================================
// SESSION STATE
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    Timeout,
    PatientEnded,
}

impl EndReason {
    pub fn system_message(&self) -> &'static str {
        match self {
            EndReason::Timeout => "Consultation ended (time is up)",
            EndReason::PatientEnded => "Consultation ended by the patient",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitiated,
    Active {
        started_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    },
    Ended {
        started_at: Option<DateTime<Utc>>,
        ended_at: DateTime<Utc>,
        reason: Option<EndReason>,
    },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitiated => "waiting",
            SessionState::Active { .. } => "active",
            SessionState::Ended { .. } => "ended",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, SessionState::Ended { .. })
    }

    /// Rebuilds state from the durable start/end markers. An end marker wins
    /// even without a start marker.
    pub fn from_markers(markers: &SessionMarkers, planned_duration_minutes: i64) -> Self {
        match (markers.started_at, markers.ended_at) {
            (started_at, Some(ended_at)) => SessionState::Ended {
                started_at,
                ended_at,
                reason: markers.end_reason,
            },
            (Some(started_at), None) => SessionState::Active {
                started_at,
                ends_at: planned_end(started_at, planned_duration_minutes),
            },
            (None, None) => SessionState::Uninitiated,
        }
    }
}

/// Planned length of a consultation. `None` for a non-positive or
/// unrepresentable number of minutes.
pub fn planned_duration(minutes: i64) -> Option<Duration> {
    if minutes <= 0 {
        return None;
    }
    Duration::try_minutes(minutes)
}

/// When a session started at `started_at` is due to end. Saturates instead
/// of overflowing; the access guard rejects such durations before a session
/// can start.
pub fn planned_end(started_at: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    planned_duration(minutes)
        .and_then(|duration| started_at.checked_add_signed(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Start/end markers read back from the message log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMarkers {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

impl SessionMarkers {
    pub fn is_open(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }
}

/// An Active session recovered from the log alone.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSession {
    pub consultation_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time view of a session used for status payloads and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub consultation_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub planned_duration_minutes: i64,
    pub state: SessionState,
}

// ==============================================================================
// MESSAGES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Patient,
    Doctor,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Read,
    Deleted,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Deleted)
    }

    pub fn can_transition_to(&self, target: &DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!((self, target), (Sent, Read) | (Sent, Deleted))
    }
}

/// One row of `consultation_messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub user_id: Uuid,
    pub doctor_id: Uuid,
    pub sender_role: SenderRole,
    pub sender_id: Option<Uuid>,
    pub body: String,
    pub delivery_status: DeliveryStatus,
    pub session_start_at: Option<DateTime<Utc>>,
    pub session_end_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_sent_by(&self, actor: &Actor) -> bool {
        self.sender_role == actor.role() && self.sender_id == Some(actor.id())
    }

    pub fn involves(&self, actor: &Actor) -> bool {
        match actor {
            Actor::Patient(id) => *id == self.user_id,
            Actor::Doctor(id) => *id == self.doctor_id,
        }
    }
}

/// A message before the store assigns its id and creation time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub consultation_id: Uuid,
    pub user_id: Uuid,
    pub doctor_id: Uuid,
    pub sender_role: SenderRole,
    pub sender_id: Option<Uuid>,
    pub body: String,
    pub delivery_status: DeliveryStatus,
    pub session_start_at: Option<DateTime<Utc>>,
    pub session_end_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

impl NewMessage {
    /// A party message. The row always carries both party ids whichever side sent it.
    pub fn from_party(snapshot: &SessionSnapshot, actor: &Actor, body: String) -> Self {
        Self {
            consultation_id: snapshot.consultation_id,
            user_id: snapshot.patient_id,
            doctor_id: snapshot.doctor_id,
            sender_role: actor.role(),
            sender_id: Some(actor.id()),
            body,
            delivery_status: DeliveryStatus::Sent,
            session_start_at: None,
            session_end_at: None,
            end_reason: None,
        }
    }

    pub fn start_marker(snapshot: &SessionSnapshot, started_at: DateTime<Utc>) -> Self {
        Self {
            session_start_at: Some(started_at),
            ..Self::system(snapshot, "Consultation started")
        }
    }

    pub fn end_marker(
        snapshot: &SessionSnapshot,
        ended_at: DateTime<Utc>,
        reason: EndReason,
    ) -> Self {
        Self {
            session_end_at: Some(ended_at),
            end_reason: Some(reason),
            ..Self::system(snapshot, reason.system_message())
        }
    }

    fn system(snapshot: &SessionSnapshot, body: &str) -> Self {
        Self {
            consultation_id: snapshot.consultation_id,
            user_id: snapshot.patient_id,
            doctor_id: snapshot.doctor_id,
            sender_role: SenderRole::System,
            sender_id: None,
            body: body.to_string(),
            delivery_status: DeliveryStatus::Sent,
            session_start_at: None,
            session_end_at: None,
            end_reason: None,
        }
    }
}

pub fn room_id(consultation_id: Uuid) -> String {
    format!("consultation_{}", consultation_id)
}
