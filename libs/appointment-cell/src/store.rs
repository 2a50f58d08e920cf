// libs/appointment-cell/src/store.rs
use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::models::{Appointment, GroupClass, SchedulingError, Slot};
use crate::services::group_class::derive_classes;

/// Mutations the local view accepts. Nothing writes the rows directly.
#[derive(Debug, Clone)]
pub enum StoreCommand {
    /// Replace everything held (e.g. after fetching a new week).
    Load(Vec<Appointment>),
    Upsert(Appointment),
    Remove(Uuid),
    Reschedule { id: Uuid, to: Slot },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Loaded { count: usize },
    /// `previous_patient_id` is set when the replaced row belonged to someone else.
    Upserted { id: Uuid, patient_id: Uuid, previous_patient_id: Option<Uuid> },
    Removed { id: Uuid, patient_id: Uuid },
    Rescheduled { id: Uuid, patient_id: Uuid, from: Slot, to: Slot },
}

impl StoreEvent {
    /// Patients whose history changed; `None` when the whole view was replaced.
    pub fn affected_patients(&self) -> Option<Vec<Uuid>> {
        match self {
            StoreEvent::Loaded { .. } => None,
            StoreEvent::Upserted { patient_id, previous_patient_id, .. } => {
                Some(std::iter::once(*patient_id).chain(*previous_patient_id).collect())
            }
            StoreEvent::Removed { patient_id, .. } | StoreEvent::Rescheduled { patient_id, .. } => {
                Some(vec![*patient_id])
            }
        }
    }
}

/// Locally held appointment list with query methods and change notifications.
#[derive(Clone)]
pub struct AppointmentStore {
    rows: Arc<RwLock<HashMap<Uuid, Appointment>>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for AppointmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub async fn apply(&self, command: StoreCommand) -> Result<StoreEvent, SchedulingError> {
        let event = {
            let mut rows = self.rows.write().await;
            match command {
                StoreCommand::Load(appointments) => {
                    rows.clear();
                    rows.extend(appointments.into_iter().map(|a| (a.id, a)));
                    StoreEvent::Loaded { count: rows.len() }
                }
                StoreCommand::Upsert(appointment) => {
                    let (id, patient_id) = (appointment.id, appointment.patient_id);
                    let previous_patient_id = rows.insert(id, appointment)
                        .map(|replaced| replaced.patient_id)
                        .filter(|previous| *previous != patient_id);
                    StoreEvent::Upserted { id, patient_id, previous_patient_id }
                }
                StoreCommand::Remove(id) => {
                    let removed = rows.remove(&id).ok_or(SchedulingError::NotFound)?;
                    StoreEvent::Removed { id, patient_id: removed.patient_id }
                }
                StoreCommand::Reschedule { id, to } => {
                    let row = rows.get_mut(&id).ok_or(SchedulingError::NotFound)?;
                    let from = row.slot();
                    row.date = to.date;
                    row.time = to.time;
                    StoreEvent::Rescheduled { id, patient_id: row.patient_id, from, to }
                }
            }
        };

        debug!("Store change: {:?}", event);
        // No subscribers is fine
        let _ = self.events.send(event.clone());
        Ok(event)
    }

    pub async fn get(&self, id: Uuid) -> Option<Appointment> {
        self.rows.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub async fn on_date(&self, date: NaiveDate) -> Vec<Appointment> {
        let rows = self.rows.read().await;
        let mut day: Vec<Appointment> = rows.values().filter(|a| a.date == date).cloned().collect();
        day.sort_by_key(|a| (a.time, a.id));
        day
    }

    pub async fn for_patient(&self, patient_id: Uuid) -> Vec<Appointment> {
        let rows = self.rows.read().await;
        let mut history: Vec<Appointment> = rows.values().filter(|a| a.patient_id == patient_id).cloned().collect();
        history.sort_by_key(|a| (a.date, a.time, a.id));
        history
    }

    pub async fn classes_on(&self, date: NaiveDate) -> Vec<GroupClass> {
        derive_classes(&self.on_date(date).await)
    }
}
