use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::error::ConsultationError;
use crate::models::{Actor, ConsultationRecord, PartyProfile, PaymentStatus};

/// Read-only view of the checkout, payment and account records owned by the
/// booking pipeline.
#[async_trait]
pub trait ConsultationDirectory: Send + Sync {
    async fn find_consultation(
        &self,
        consultation_id: Uuid,
    ) -> Result<Option<ConsultationRecord>, ConsultationError>;

    async fn find_party(&self, actor: Actor) -> Result<Option<PartyProfile>, ConsultationError>;
}

const CHECKOUT_SELECT: &str = "id,patient_id,doctor_id,duration_minutes,checkout_date,\
payment:consultation_payments(status),\
patient:patients(id,full_name),\
doctor:doctors(id,full_name)";

/// PostgREST renders a to-one embed as an object and a to-many embed as an
/// array, depending on how the foreign key is declared.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Embedded<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Embedded<T> {
    fn into_first(self) -> Option<T> {
        match self {
            Embedded::One(value) => Some(value),
            Embedded::Many(values) => values.into_iter().next(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaymentRow {
    status: PaymentStatus,
}

#[derive(Debug, Deserialize)]
struct CheckoutRow {
    id: Uuid,
    patient_id: Uuid,
    doctor_id: Uuid,
    duration_minutes: i64,
    checkout_date: DateTime<Utc>,
    payment: Option<Embedded<PaymentRow>>,
    patient: Option<PartyProfile>,
    doctor: Option<PartyProfile>,
}

impl From<CheckoutRow> for ConsultationRecord {
    fn from(row: CheckoutRow) -> Self {
        Self {
            id: row.id,
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            duration_minutes: row.duration_minutes,
            checkout_date: row.checkout_date,
            payment_status: row
                .payment
                .and_then(Embedded::into_first)
                .map(|payment| payment.status),
            patient: row.patient,
            doctor: row.doctor,
        }
    }
}

pub struct SupabaseConsultationDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseConsultationDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl ConsultationDirectory for SupabaseConsultationDirectory {
    async fn find_consultation(
        &self,
        consultation_id: Uuid,
    ) -> Result<Option<ConsultationRecord>, ConsultationError> {
        let query = format!("id=eq.{}&select={}", consultation_id, CHECKOUT_SELECT);
        let row: Option<CheckoutRow> = self
            .supabase
            .select_one("consultation_checkouts", &query)
            .await?;

        debug!("Consultation {} lookup found: {}", consultation_id, row.is_some());
        Ok(row.map(ConsultationRecord::from))
    }

    async fn find_party(&self, actor: Actor) -> Result<Option<PartyProfile>, ConsultationError> {
        let table = match actor {
            Actor::Patient(_) => "patients",
            Actor::Doctor(_) => "doctors",
        };
        let query = format!("id=eq.{}&select=id,full_name", actor.id());
        Ok(self.supabase.select_one(table, &query).await?)
    }
}
