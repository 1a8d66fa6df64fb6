// libs/consultation-chat-cell/src/services/store.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::error::ConsultationError;
use crate::models::{DeliveryStatus, EndReason, Message, NewMessage, OpenSession, SessionMarkers};

pub const MESSAGES_TABLE: &str = "consultation_messages";

/// Durable message log. The only source of truth for whether a consultation
/// has started or ended.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, message: NewMessage) -> Result<Message, ConsultationError>;

    async fn find(&self, message_id: Uuid) -> Result<Option<Message>, ConsultationError>;

    /// Visible history, oldest first. Deleted rows stay in the log but are skipped.
    async fn list_by_session(&self, consultation_id: Uuid)
        -> Result<Vec<Message>, ConsultationError>;

    async fn update_status(
        &self,
        message_id: Uuid,
        status: DeliveryStatus,
    ) -> Result<Message, ConsultationError>;

    async fn session_markers(&self, consultation_id: Uuid)
        -> Result<SessionMarkers, ConsultationError>;

    /// A start marker with no end marker means the session is live.
    ///
    /// Session recovery reads [`session_markers`](Self::session_markers)
    /// instead, since it also has to restore sessions that already ended.
    async fn find_open_session(
        &self,
        consultation_id: Uuid,
    ) -> Result<Option<OpenSession>, ConsultationError> {
        let markers = self.session_markers(consultation_id).await?;
        Ok(match (markers.started_at, markers.ended_at) {
            (Some(started_at), None) => Some(OpenSession {
                consultation_id,
                started_at,
            }),
            _ => None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StartMarkerRow {
    session_start_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct EndMarkerRow {
    session_end_at: DateTime<Utc>,
    end_reason: Option<EndReason>,
}

/// `consultation_messages` over PostgREST.
pub struct SupabaseMessageStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseMessageStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl MessageStore for SupabaseMessageStore {
    #[instrument(skip(self, message), fields(consultation_id = %message.consultation_id))]
    async fn append(&self, message: NewMessage) -> Result<Message, ConsultationError> {
        let row = serde_json::to_value(&message)
            .map_err(|e| ConsultationError::Storage(e.to_string()))?;
        let stored: Message = self.supabase.insert(MESSAGES_TABLE, row).await?;
        debug!("Appended message {} ({:?})", stored.id, stored.sender_role);
        Ok(stored)
    }

    async fn find(&self, message_id: Uuid) -> Result<Option<Message>, ConsultationError> {
        let query = format!("id=eq.{}&select=*", message_id);
        Ok(self.supabase.select_one(MESSAGES_TABLE, &query).await?)
    }

    async fn list_by_session(
        &self,
        consultation_id: Uuid,
    ) -> Result<Vec<Message>, ConsultationError> {
        let query = format!(
            "consultation_id=eq.{}&delivery_status=neq.deleted&order=created_at.asc&select=*",
            consultation_id
        );
        Ok(self.supabase.select(MESSAGES_TABLE, &query).await?)
    }

    async fn update_status(
        &self,
        message_id: Uuid,
        status: DeliveryStatus,
    ) -> Result<Message, ConsultationError> {
        let filter = format!("id=eq.{}", message_id);
        let rows: Vec<Message> = self
            .supabase
            .update(MESSAGES_TABLE, &filter, json!({ "delivery_status": status }))
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| ConsultationError::NotFound("Message".to_string()))
    }

    async fn session_markers(
        &self,
        consultation_id: Uuid,
    ) -> Result<SessionMarkers, ConsultationError> {
        let start_query = format!(
            "consultation_id=eq.{}&session_start_at=not.is.null&select=session_start_at&order=created_at.asc",
            consultation_id
        );
        let end_query = format!(
            "consultation_id=eq.{}&session_end_at=not.is.null&select=session_end_at,end_reason&order=created_at.asc",
            consultation_id
        );

        let start: Option<StartMarkerRow> =
            self.supabase.select_one(MESSAGES_TABLE, &start_query).await?;
        let end: Option<EndMarkerRow> = self.supabase.select_one(MESSAGES_TABLE, &end_query).await?;

        Ok(SessionMarkers {
            started_at: start.map(|row| row.session_start_at),
            ended_at: end.as_ref().map(|row| row.session_end_at),
            end_reason: end.and_then(|row| row.end_reason),
        })
    }
}
