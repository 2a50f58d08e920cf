// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentDraft, AppointmentEdit, AppointmentPatch, AppointmentStatus, MoveRequest,
    SchedulingError, Slot,
};
use crate::repository::AppointmentRepository;
use crate::services::conflict::{ConflictDetectionService, Proposal};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::validation::AppointmentValidator;

/// Single-record intents: validate, check availability, then write.
pub struct AppointmentBookingService {
    repository: Arc<dyn AppointmentRepository>,
    conflict_service: Arc<ConflictDetectionService>,
    validator: Arc<AppointmentValidator>,
    lifecycle_service: AppointmentLifecycleService,
}

impl AppointmentBookingService {
    pub fn new(
        repository: Arc<dyn AppointmentRepository>,
        conflict_service: Arc<ConflictDetectionService>,
        validator: Arc<AppointmentValidator>,
    ) -> Self {
        Self {
            repository,
            conflict_service,
            validator,
            lifecycle_service: AppointmentLifecycleService::new(),
        }
    }

    pub async fn book_appointment(&self, draft: AppointmentDraft) -> Result<Appointment, SchedulingError> {
        let appointment = self.validator.validate_new(draft)?;
        info!("Booking appointment for patient {} with specialist {} at {}",
              appointment.patient_id, appointment.specialist_id, appointment.slot());

        self.conflict_service.check(&Proposal::for_new(&appointment)).await?;

        let created = self.repository.create(appointment).await?;
        info!("Appointment {} booked", created.id);
        Ok(created)
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.repository.get(appointment_id).await
    }

    pub async fn update_appointment(
        &self,
        appointment_id: Uuid,
        edit: AppointmentEdit,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Updating appointment: {}", appointment_id);

        let current = self.repository.get(appointment_id).await?;
        let patch = self.validator.validate_edit(&current, edit)?;
        self.apply_checked(current, patch).await
    }

    /// Server-side move: same checks as an edit of date and time.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        request: MoveRequest,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.repository.get(appointment_id).await?;
        let slot = self.validator.parse_slot(request.date, &request.time)?;
        if slot == current.slot() {
            return Ok(current);
        }
        self.apply_checked(current, AppointmentPatch::reschedule(slot)).await
    }

    async fn apply_checked(&self, current: Appointment, patch: AppointmentPatch) -> Result<Appointment, SchedulingError> {
        if patch.date.is_some() || patch.time.is_some() {
            self.lifecycle_service.ensure_reschedulable(current.status)?;
        }

        if patch.touches_resources() || patch.difficulty.is_some() {
            let mut proposed = current.clone();
            patch.apply_to(&mut proposed);
            if proposed.is_active() {
                self.conflict_service.check(&Proposal::for_existing(&proposed)).await?;
            }
        }

        let updated = self.repository.update(current.id, patch).await?;
        info!("Appointment {} updated", updated.id);
        Ok(updated)
    }

    pub async fn change_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.repository.get(appointment_id).await?;
        self.lifecycle_service.validate_status_transition(current.status, status)?;

        let updated = self.repository.update(appointment_id, AppointmentPatch::status(status)).await?;
        info!("Appointment {} is now {}", appointment_id, status);
        Ok(updated)
    }

    pub async fn delete_appointment(&self, appointment_id: Uuid) -> Result<(), SchedulingError> {
        self.repository.delete(appointment_id).await.map_err(|e| {
            warn!("Failed to delete appointment {}: {}", appointment_id, e);
            e
        })?;
        info!("Appointment {} deleted", appointment_id);
        Ok(())
    }

    /// Rooms from `rooms` free at the slot. Editing keeps the current room on offer.
    pub async fn available_rooms(
        &self,
        date: NaiveDate,
        time: &str,
        rooms: &[Uuid],
        editing_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, SchedulingError> {
        let slot = Slot::new(date, AppointmentValidator::parse_time(time)?);
        let editing = match editing_id {
            Some(id) => Some(self.repository.get(id).await?),
            None => None,
        };
        self.conflict_service.available_rooms(slot, rooms, editing.as_ref()).await
    }
}
