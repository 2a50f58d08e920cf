// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{AppointmentStatus, SchedulingError};

pub struct AppointmentLifecycleService;

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), SchedulingError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(SchedulingError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Pending => vec![
                AppointmentStatus::Scheduled,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::Attended,
                AppointmentStatus::Cancelled,
            ],
            // Terminal states
            AppointmentStatus::Attended => vec![],
            AppointmentStatus::Cancelled => vec![],
        }
    }

    /// Attended and cancelled appointments keep their date and time.
    pub fn can_reschedule(&self, status: AppointmentStatus) -> bool {
        matches!(status, AppointmentStatus::Pending | AppointmentStatus::Scheduled)
    }

    pub fn ensure_reschedulable(&self, status: AppointmentStatus) -> Result<(), SchedulingError> {
        if self.can_reschedule(status) {
            Ok(())
        } else {
            Err(SchedulingError::Validation(format!("A {} appointment cannot be moved", status)))
        }
    }
}
