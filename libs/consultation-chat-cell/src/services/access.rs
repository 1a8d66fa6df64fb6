use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ConsultationError;
use crate::models::{planned_duration, Actor, ConsultationContext, PaymentStatus};
use crate::services::directory::ConsultationDirectory;

/// Decides whether a party may enter a consultation room.
pub struct AccessGuard {
    directory: Arc<dyn ConsultationDirectory>,
}

impl AccessGuard {
    pub fn new(directory: Arc<dyn ConsultationDirectory>) -> Self {
        Self { directory }
    }

    pub async fn authorize_join(
        &self,
        actor: Actor,
        consultation_id: Uuid,
    ) -> Result<ConsultationContext, ConsultationError> {
        let record = self
            .directory
            .find_consultation(consultation_id)
            .await?
            .ok_or_else(|| ConsultationError::NotFound("Consultation".to_string()))?;

        if record.payment_status != Some(PaymentStatus::Completed) {
            let status = record
                .payment_status
                .map(|s| s.as_str())
                .unwrap_or("unknown");
            debug!("Consultation {} payment not completed: {}", consultation_id, status);
            return Err(ConsultationError::PaymentIncomplete {
                status: status.to_string(),
            });
        }

        let context = ConsultationContext::from_record(record);
        if !context.is_party(&actor) {
            warn!(
                "Access denied to consultation {} for {:?} (patient {}, doctor {})",
                consultation_id, actor, context.patient_id, context.doctor_id
            );
            return Err(ConsultationError::Forbidden(
                "You do not have access to this consultation room".to_string(),
            ));
        }

        if planned_duration(context.planned_duration_minutes).is_none() {
            warn!(
                "Consultation {} has unusable duration of {} minutes",
                consultation_id, context.planned_duration_minutes
            );
            return Err(ConsultationError::Validation(format!(
                "Consultation duration of {} minutes is invalid",
                context.planned_duration_minutes
            )));
        }

        Ok(context)
    }
}
