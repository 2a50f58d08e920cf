use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentPatch, NewAppointment, SchedulingError};
use crate::services::conflict::{check_against, Proposal};

use super::AppointmentRepository;

/// Process-local repository. The overlap check and the write happen under one lock,
/// so two callers racing for the same slot cannot both succeed.
#[derive(Clone)]
pub struct InMemoryAppointmentRepository {
    appointments: Arc<RwLock<HashMap<Uuid, Appointment>>>,
    class_capacity: usize,
}

impl InMemoryAppointmentRepository {
    pub fn new(class_capacity: usize) -> Self {
        Self {
            appointments: Arc::new(RwLock::new(HashMap::new())),
            class_capacity,
        }
    }

    /// Inserts rows as-is, bypassing the overlap check. Used to load fixtures,
    /// including deliberately inconsistent ones.
    pub async fn seed(&self, rows: impl IntoIterator<Item = Appointment>) {
        let mut appointments = self.appointments.write().await;
        for row in rows {
            appointments.insert(row.id, row);
        }
    }

    pub async fn all(&self) -> Vec<Appointment> {
        let appointments = self.appointments.read().await;
        let mut rows: Vec<Appointment> = appointments.values().cloned().collect();
        rows.sort_by_key(|a| (a.date, a.time, a.id));
        rows
    }

    fn same_day_active(appointments: &HashMap<Uuid, Appointment>, date: NaiveDate) -> Vec<Appointment> {
        appointments.values()
            .filter(|a| a.date == date && a.is_active())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn specialist_day(&self, specialist_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError> {
        let appointments = self.appointments.read().await;
        let mut rows: Vec<Appointment> = Self::same_day_active(&appointments, date)
            .into_iter()
            .filter(|a| a.specialist_id == specialist_id)
            .collect();
        rows.sort_by_key(|a| a.time);
        Ok(rows)
    }

    async fn day(&self, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError> {
        let appointments = self.appointments.read().await;
        let mut rows = Self::same_day_active(&appointments, date);
        rows.sort_by_key(|a| (a.time, a.id));
        Ok(rows)
    }

    async fn patient_history(&self, patient_id: Uuid) -> Result<Vec<Appointment>, SchedulingError> {
        let appointments = self.appointments.read().await;
        let mut rows: Vec<Appointment> = appointments.values()
            .filter(|a| a.patient_id == patient_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.date, a.time));
        Ok(rows)
    }

    async fn get(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        let appointments = self.appointments.read().await;
        appointments.get(&id).cloned().ok_or(SchedulingError::NotFound)
    }

    async fn create(&self, appointment: NewAppointment) -> Result<Appointment, SchedulingError> {
        let mut appointments = self.appointments.write().await;

        if appointment.status.is_active() {
            let existing = Self::same_day_active(&appointments, appointment.date);
            check_against(&Proposal::for_new(&appointment), &existing, self.class_capacity)
                .map_err(|e| {
                    warn!("Write rejected for {}: {}", appointment.slot(), e);
                    SchedulingError::SlotTaken(e.to_string())
                })?;
        }

        let created = appointment.with_id(Uuid::new_v4());
        appointments.insert(created.id, created.clone());
        info!("Appointment {} stored for {}", created.id, created.slot());
        Ok(created)
    }

    async fn update(&self, id: Uuid, patch: AppointmentPatch) -> Result<Appointment, SchedulingError> {
        let mut appointments = self.appointments.write().await;

        let mut updated = appointments.get(&id).cloned().ok_or(SchedulingError::NotFound)?;
        let was_active = updated.is_active();
        patch.apply_to(&mut updated);

        let reactivated = !was_active && updated.is_active();
        if updated.is_active() && (patch.touches_resources() || patch.difficulty.is_some() || reactivated) {
            let existing = Self::same_day_active(&appointments, updated.date);
            check_against(&Proposal::for_existing(&updated), &existing, self.class_capacity)
                .map_err(|e| {
                    warn!("Update of {} rejected: {}", id, e);
                    SchedulingError::SlotTaken(e.to_string())
                })?;
        }

        appointments.insert(id, updated.clone());
        debug!("Appointment {} updated", id);
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<(), SchedulingError> {
        let mut appointments = self.appointments.write().await;
        appointments.remove(&id).map(|_| ()).ok_or(SchedulingError::NotFound)
    }
}
