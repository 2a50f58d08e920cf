use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast::error::RecvError, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::PackageGrouping;

use crate::models::{Appointment, PackageLabel, SchedulingError};
use crate::repository::AppointmentRepository;
use crate::store::AppointmentStore;

/// Labels keyed by appointment id.
pub type PackageLabels = HashMap<Uuid, PackageLabel>;

/// Numbers the appointments of one patient's packages.
///
/// `history` must be the patient's complete history, not a date-filtered page:
/// positions depend on visits outside whatever range is on screen. Cancelled
/// appointments neither receive a label nor count towards the total.
pub fn package_labels(history: &[Appointment], grouping: PackageGrouping) -> PackageLabels {
    let mut groups: HashMap<(Uuid, Uuid), Vec<&Appointment>> = HashMap::new();

    for appointment in history.iter().filter(|a| a.is_active()) {
        let key = match grouping {
            PackageGrouping::TreatmentGroup => match appointment.treatment_group_id {
                Some(group) => (appointment.patient_id, group),
                None => continue,
            },
            PackageGrouping::Specialty => (appointment.patient_id, appointment.specialty_id),
        };
        groups.entry(key).or_default().push(appointment);
    }

    let mut labels = PackageLabels::new();
    for members in groups.values_mut() {
        let total = members.len();
        if total <= 1 {
            continue;
        }
        members.sort_by_key(|a| (a.date, a.time, a.id));
        for (index, appointment) in members.iter().enumerate() {
            labels.insert(appointment.id, PackageLabel {
                appointment_id: appointment.id,
                position: index + 1,
                total,
            });
        }
    }

    labels
}

pub struct PackageNumberingService {
    repository: Arc<dyn AppointmentRepository>,
    grouping: PackageGrouping,
}

impl PackageNumberingService {
    pub fn new(repository: Arc<dyn AppointmentRepository>, grouping: PackageGrouping) -> Self {
        Self { repository, grouping }
    }

    pub async fn labels_for_patient(&self, patient_id: Uuid) -> Result<PackageLabels, SchedulingError> {
        let history = self.repository.patient_history(patient_id).await?;
        debug!("Numbering {} appointments of patient {}", history.len(), patient_id);
        Ok(package_labels(&history, self.grouping))
    }

    /// Labelled appointments in visit order, so packages interleave the way
    /// the patient attends them.
    pub async fn package_timeline(&self, patient_id: Uuid) -> Result<Vec<(Appointment, PackageLabel)>, SchedulingError> {
        let mut history = self.repository.patient_history(patient_id).await?;
        let labels = package_labels(&history, self.grouping);
        history.sort_by_key(|a| (a.date, a.time, a.id));

        Ok(history.into_iter()
            .filter_map(|a| labels.get(&a.id).copied().map(|label| (a, label)))
            .collect())
    }
}

/// Per-patient label cache, dropped whenever that patient's history changes.
#[derive(Clone)]
pub struct PackageLabelCache {
    service: Arc<PackageNumberingService>,
    entries: Arc<RwLock<HashMap<Uuid, PackageLabels>>>,
}

impl PackageLabelCache {
    pub fn new(service: Arc<PackageNumberingService>) -> Self {
        Self {
            service,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn labels(&self, patient_id: Uuid) -> Result<PackageLabels, SchedulingError> {
        if let Some(labels) = self.entries.read().await.get(&patient_id) {
            return Ok(labels.clone());
        }

        let labels = self.service.labels_for_patient(patient_id).await?;
        self.entries.write().await.insert(patient_id, labels.clone());
        Ok(labels)
    }

    pub async fn invalidate(&self, patient_id: Uuid) {
        self.entries.write().await.remove(&patient_id);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn is_cached(&self, patient_id: Uuid) -> bool {
        self.entries.read().await.contains_key(&patient_id)
    }

    /// Follows store changes until the store is dropped.
    pub fn watch(&self, store: &AppointmentStore) -> JoinHandle<()> {
        let cache = self.clone();
        let mut events = store.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match event.affected_patients() {
                        Some(patients) => {
                            for patient_id in patients {
                                cache.invalidate(patient_id).await;
                            }
                        }
                        None => cache.clear().await,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Package label cache missed {} store events, clearing", skipped);
                        cache.clear().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
