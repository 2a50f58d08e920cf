use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentPatch, BatchFailure, BatchOutcome, NewAppointment, SchedulingError,
};

pub mod memory;
pub mod supabase;

pub use memory::InMemoryAppointmentRepository;
pub use supabase::SupabaseAppointmentRepository;

/// Persistence port for appointments.
///
/// Implementations must enforce the specialist and room non-overlap rules at write
/// time and answer `SchedulingError::SlotTaken` when a write would break them. The
/// read-side checks in the conflict detector are advisory only.
#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    /// Non-cancelled appointments of one specialist on one day.
    async fn specialist_day(&self, specialist_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError>;

    /// Non-cancelled appointments of every resource on one day.
    async fn day(&self, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError>;

    /// Every appointment the patient ever had, any status, no date filter.
    async fn patient_history(&self, patient_id: Uuid) -> Result<Vec<Appointment>, SchedulingError>;

    async fn get(&self, id: Uuid) -> Result<Appointment, SchedulingError>;

    async fn create(&self, appointment: NewAppointment) -> Result<Appointment, SchedulingError>;

    async fn update(&self, id: Uuid, patch: AppointmentPatch) -> Result<Appointment, SchedulingError>;

    async fn delete(&self, id: Uuid) -> Result<(), SchedulingError>;

    /// Creates each item independently and reports per-item results.
    async fn create_batch(&self, items: Vec<NewAppointment>) -> Result<BatchOutcome, SchedulingError> {
        let mut outcome = BatchOutcome::default();

        for (index, item) in items.into_iter().enumerate() {
            let slot = item.slot();
            let patient_id = item.patient_id;
            match self.create(item).await {
                Ok(created) => outcome.created.push(created),
                Err(e) => {
                    warn!("Batch item {} ({} for patient {}) failed: {}", index, slot, patient_id, e);
                    outcome.failures.push(BatchFailure {
                        index,
                        slot,
                        patient_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(outcome)
    }
}
