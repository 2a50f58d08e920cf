// libs/appointment-cell/src/services/reschedule.rs
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentPatch, SchedulingError, Slot};
use crate::repository::AppointmentRepository;
use crate::services::conflict::{check_against, Proposal};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::validation::AppointmentValidator;
use crate::store::{AppointmentStore, StoreCommand, StoreEvent};

/// User-facing outcome of a move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    Success {
        appointment_id: Uuid,
        message: String,
    },
    Failure {
        appointment_id: Uuid,
        message: String,
        reason: Option<String>,
    },
}

impl Notice {
    pub fn appointment_id(&self) -> Uuid {
        match self {
            Notice::Success { appointment_id, .. } | Notice::Failure { appointment_id, .. } => *appointment_id,
        }
    }
}

/// One optimistic move: the slot before, the slot after, and how to get
/// between them locally and remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescheduleCommand {
    pub appointment_id: Uuid,
    pub previous: Slot,
    pub next: Slot,
}

impl RescheduleCommand {
    pub fn snapshot(appointment: &Appointment, next: Slot) -> Self {
        Self {
            appointment_id: appointment.id,
            previous: appointment.slot(),
            next,
        }
    }

    pub async fn apply(&self, store: &AppointmentStore) -> Result<StoreEvent, SchedulingError> {
        store.apply(StoreCommand::Reschedule { id: self.appointment_id, to: self.next }).await
    }

    pub async fn commit(&self, repository: &dyn AppointmentRepository) -> Result<Appointment, SchedulingError> {
        repository.update(self.appointment_id, AppointmentPatch::reschedule(self.next)).await
    }

    /// Puts only this appointment back where it was.
    pub async fn rollback(&self, store: &AppointmentStore) -> Result<StoreEvent, SchedulingError> {
        store.apply(StoreCommand::Reschedule { id: self.appointment_id, to: self.previous }).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    Committed(Appointment),
    RolledBack { reason: String },
}

/// Moves appointments in the local store first and confirms with the
/// repository afterwards. Concurrent moves do not wait for each other.
#[derive(Clone)]
pub struct OptimisticCoordinator {
    store: AppointmentStore,
    repository: Arc<dyn AppointmentRepository>,
    validator: Arc<AppointmentValidator>,
    lifecycle_service: Arc<AppointmentLifecycleService>,
    class_capacity: usize,
    notices: broadcast::Sender<Notice>,
}

impl OptimisticCoordinator {
    pub fn new(
        store: AppointmentStore,
        repository: Arc<dyn AppointmentRepository>,
        validator: Arc<AppointmentValidator>,
        class_capacity: usize,
    ) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            store,
            repository,
            validator,
            lifecycle_service: Arc::new(AppointmentLifecycleService::new()),
            class_capacity,
            notices,
        }
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn store(&self) -> &AppointmentStore {
        &self.store
    }

    /// Validation and the local availability check reject before anything
    /// changes. After that, a remote failure rolls the store back and the
    /// outcome is reported rather than returned as an error.
    pub async fn move_appointment(&self, appointment_id: Uuid, to: Slot) -> Result<MoveOutcome, SchedulingError> {
        let current = self.store.get(appointment_id).await.ok_or(SchedulingError::NotFound)?;
        self.lifecycle_service.ensure_reschedulable(current.status)?;
        let to = self.validator.validate_slot(to.date, to.time)?;

        if to == current.slot() {
            return Ok(MoveOutcome::Committed(current));
        }

        let mut moved = current.clone();
        moved.date = to.date;
        moved.time = to.time;
        let day: Vec<Appointment> = self.store.on_date(to.date).await
            .into_iter()
            .filter(|a| a.is_active())
            .collect();
        check_against(&Proposal::for_existing(&moved), &day, self.class_capacity)?;

        let command = RescheduleCommand::snapshot(&current, to);
        command.apply(&self.store).await?;
        debug!("Moved {} locally from {} to {}", appointment_id, command.previous, command.next);

        match command.commit(self.repository.as_ref()).await {
            Ok(saved) => {
                self.store.apply(StoreCommand::Upsert(saved.clone())).await?;
                info!("Appointment {} moved to {}", appointment_id, to);
                self.notify(Notice::Success {
                    appointment_id,
                    message: format!("Appointment moved to {}", to),
                });
                Ok(MoveOutcome::Committed(saved))
            }
            Err(e) => {
                warn!("Move of {} to {} rejected, rolling back: {}", appointment_id, to, e);
                if let Err(rollback_error) = command.rollback(&self.store).await {
                    warn!("Rollback of {} failed: {}", appointment_id, rollback_error);
                }
                let reason = failure_reason(&e);
                self.notify(Notice::Failure {
                    appointment_id,
                    message: "The appointment could not be moved".to_string(),
                    reason: reason.clone(),
                });
                Ok(MoveOutcome::RolledBack {
                    reason: reason.unwrap_or_else(|| "Unknown error".to_string()),
                })
            }
        }
    }

    /// Fire-and-forget variant; the caller can still await the handle.
    pub fn spawn_move(&self, appointment_id: Uuid, to: Slot) -> JoinHandle<Result<MoveOutcome, SchedulingError>> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.move_appointment(appointment_id, to).await })
    }

    fn notify(&self, notice: Notice) {
        // Nobody listening is fine
        let _ = self.notices.send(notice);
    }
}

fn failure_reason(error: &SchedulingError) -> Option<String> {
    match error {
        SchedulingError::Database(message) if message.trim().is_empty() => None,
        other => Some(other.to_string()),
    }
}
