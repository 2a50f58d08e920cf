// libs/appointment-cell/src/services/saga.rs
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentPatch, StepFailure};
use crate::repository::AppointmentRepository;

/// Undo for one applied update: write back the fields it changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Compensation {
    pub appointment_id: Uuid,
    pub restore: AppointmentPatch,
}

impl Compensation {
    /// Restores exactly the fields `applied` overwrote on `before`.
    pub fn undoing(before: &Appointment, applied: &AppointmentPatch) -> Self {
        let mut restore = AppointmentPatch::default();
        if applied.specialist_id.is_some() {
            restore.specialist_id = Some(before.specialist_id);
        }
        if applied.room_id.is_some() {
            restore.room_id = Some(before.room_id);
        }
        if applied.date.is_some() {
            restore.date = Some(before.date);
        }
        if applied.time.is_some() {
            restore.time = Some(before.time);
        }
        if applied.status.is_some() {
            restore.status = Some(before.status);
        }
        if applied.plan_type.is_some() {
            restore.plan_type = Some(before.plan_type);
        }
        if applied.price.is_some() {
            restore.price = Some(before.price);
        }
        if applied.notes.is_some() {
            restore.notes = Some(before.notes.clone());
        }
        if applied.difficulty.is_some() {
            restore.difficulty = Some(before.difficulty);
        }

        Self { appointment_id: before.id, restore }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompensationOutcome {
    pub compensated: Vec<Uuid>,
    pub failures: Vec<StepFailure>,
}

/// Sequence of applied steps that can be undone newest-first.
pub struct Saga {
    repository: Arc<dyn AppointmentRepository>,
    applied: Vec<Compensation>,
}

impl Saga {
    pub fn new(repository: Arc<dyn AppointmentRepository>) -> Self {
        Self {
            repository,
            applied: Vec::new(),
        }
    }

    pub fn record(&mut self, compensation: Compensation) {
        self.applied.push(compensation);
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Runs every recorded compensation in reverse order. A failing compensation
    /// is reported and the rest still run.
    pub async fn compensate(self) -> CompensationOutcome {
        let mut outcome = CompensationOutcome::default();
        info!("Compensating {} applied steps", self.applied.len());

        for step in self.applied.into_iter().rev() {
            match self.repository.update(step.appointment_id, step.restore).await {
                Ok(_) => outcome.compensated.push(step.appointment_id),
                Err(e) => {
                    warn!("Compensation for appointment {} failed: {}", step.appointment_id, e);
                    outcome.failures.push(StepFailure {
                        appointment_id: Some(step.appointment_id),
                        reason: e.to_string(),
                    });
                }
            }
        }

        outcome
    }
}
