// libs/appointment-cell/src/services/group_class.rs
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_models::auth::User;

use crate::models::{
    Appointment, AppointmentPatch, BatchOutcome, DifficultyLevel, GroupClass, NewAppointment,
    ParticipantSaveReport, ResolutionReport, SchedulingError, Slot, StepFailure, WorkingDay,
};
use crate::repository::AppointmentRepository;
use crate::services::recurrence::{ClassTemplate, RecurrenceService};
use crate::services::saga::{Compensation, Saga};

/// Groups active class appointments by slot, earliest first. Appointments keep
/// the order they were given in.
pub fn derive_classes(appointments: &[Appointment]) -> Vec<GroupClass> {
    let mut by_slot: BTreeMap<Slot, Vec<Appointment>> = BTreeMap::new();
    for appointment in appointments.iter().filter(|a| a.is_active() && a.is_class()) {
        by_slot.entry(appointment.slot()).or_default().push(appointment.clone());
    }

    by_slot.into_iter()
        .map(|(slot, appointments)| GroupClass { slot, appointments })
        .collect()
}

/// Local edit of a class's participant set, saved later as a three-way diff.
#[derive(Debug, Clone)]
pub struct ClassRoster {
    slot: Slot,
    specialist_id: Uuid,
    difficulty: DifficultyLevel,
    capacity: usize,
    original: Vec<Appointment>,
    participants: BTreeSet<Uuid>,
}

/// What saving a roster has to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterDiff {
    pub removed: Vec<Appointment>,
    pub added: Vec<Uuid>,
    pub kept: Vec<Appointment>,
}

impl ClassRoster {
    pub fn open(class: &GroupClass, capacity: usize) -> Result<Self, SchedulingError> {
        let specialist_id = class.lead_specialist().ok_or(SchedulingError::NotFound)?;
        let difficulty = class.difficulty().ok_or(SchedulingError::NotFound)?;

        Ok(Self {
            slot: class.slot,
            specialist_id,
            difficulty,
            capacity,
            original: class.appointments.clone(),
            participants: class.participants(),
        })
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn specialist_id(&self) -> Uuid {
        self.specialist_id
    }

    pub fn difficulty(&self) -> DifficultyLevel {
        self.difficulty
    }

    pub fn participants(&self) -> &BTreeSet<Uuid> {
        &self.participants
    }

    pub fn add(&mut self, patient_id: Uuid) -> Result<(), SchedulingError> {
        if self.participants.contains(&patient_id) {
            return Err(SchedulingError::DuplicateParticipant);
        }
        if self.participants.len() >= self.capacity {
            return Err(SchedulingError::ClassFull { slot: self.slot, capacity: self.capacity });
        }
        self.participants.insert(patient_id);
        Ok(())
    }

    /// Returns false when the patient was not in the roster.
    pub fn remove(&mut self, patient_id: Uuid) -> bool {
        self.participants.remove(&patient_id)
    }

    pub fn set_specialist(&mut self, specialist_id: Uuid) {
        self.specialist_id = specialist_id;
    }

    pub fn set_difficulty(&mut self, difficulty: DifficultyLevel) {
        self.difficulty = difficulty;
    }

    pub fn diff(&self) -> RosterDiff {
        let mut diff = RosterDiff::default();
        let mut seen = BTreeSet::new();

        for appointment in &self.original {
            seen.insert(appointment.patient_id);
            if self.participants.contains(&appointment.patient_id) {
                diff.kept.push(appointment.clone());
            } else {
                diff.removed.push(appointment.clone());
            }
        }
        diff.added = self.participants.iter()
            .filter(|patient_id| !seen.contains(patient_id))
            .copied()
            .collect();

        diff
    }

    /// Update for a kept member, if the class-wide fields moved away from it.
    fn patch_for(&self, member: &Appointment) -> Option<AppointmentPatch> {
        let mut patch = AppointmentPatch::default();
        if member.specialist_id != self.specialist_id {
            patch.specialist_id = Some(self.specialist_id);
        }
        if member.difficulty != Some(self.difficulty) {
            patch.difficulty = Some(Some(self.difficulty));
        }
        (!patch.is_empty()).then_some(patch)
    }

    fn template(&self) -> Option<&Appointment> {
        self.original.iter()
            .find(|a| a.specialist_id == self.specialist_id)
            .or_else(|| self.original.first())
    }
}

pub struct GroupClassService {
    repository: Arc<dyn AppointmentRepository>,
    recurrence: Arc<RecurrenceService>,
    capacity: usize,
}

impl GroupClassService {
    pub fn new(
        repository: Arc<dyn AppointmentRepository>,
        recurrence: Arc<RecurrenceService>,
        capacity: usize,
    ) -> Self {
        Self { repository, recurrence, capacity }
    }

    pub async fn classes_on(&self, date: NaiveDate) -> Result<Vec<GroupClass>, SchedulingError> {
        let day = self.repository.day(date).await?;
        Ok(derive_classes(&day))
    }

    pub async fn class_at(&self, slot: Slot) -> Result<GroupClass, SchedulingError> {
        self.classes_on(slot.date).await?
            .into_iter()
            .find(|class| class.slot == slot)
            .ok_or(SchedulingError::NotFound)
    }

    pub async fn open_roster(&self, slot: Slot) -> Result<ClassRoster, SchedulingError> {
        ClassRoster::open(&self.class_at(slot).await?, self.capacity)
    }

    /// Reassigns every member of the class to `specialist_id` (and `difficulty`
    /// when given). Updates run one at a time; the first failure stops the run
    /// and the updates already applied are undone newest-first.
    pub async fn resolve(
        &self,
        user: &User,
        slot: Slot,
        specialist_id: Uuid,
        difficulty: Option<DifficultyLevel>,
    ) -> Result<ResolutionReport, SchedulingError> {
        if !user.is_admin() {
            warn!("User {} tried to resolve the class at {}", user.id, slot);
            return Err(SchedulingError::Forbidden("Only administrators can resolve class conflicts".to_string()));
        }

        let class = self.class_at(slot).await?;
        info!("Resolving class at {} ({} specialists) to {}", slot, class.specialists().len(), specialist_id);

        let mut saga = Saga::new(self.repository.clone());
        let mut report = ResolutionReport::default();

        for member in &class.appointments {
            let mut patch = AppointmentPatch::default();
            if member.specialist_id != specialist_id {
                patch.specialist_id = Some(specialist_id);
            }
            if let Some(level) = difficulty {
                if member.difficulty != Some(level) {
                    patch.difficulty = Some(Some(level));
                }
            }
            if patch.is_empty() {
                continue;
            }

            match self.repository.update(member.id, patch.clone()).await {
                Ok(_) => {
                    saga.record(Compensation::undoing(member, &patch));
                    report.updated.push(member.id);
                }
                Err(e) => {
                    warn!("Reassigning appointment {} failed: {}", member.id, e);
                    report.failure = Some(StepFailure {
                        appointment_id: Some(member.id),
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }

        if report.failure.is_some() && !saga.is_empty() {
            warn!("Compensating {} applied steps for the class at {}", saga.len(), slot);
            let outcome = saga.compensate().await;
            report.updated.retain(|id| !outcome.compensated.contains(id));
            report.compensated = outcome.compensated;
            report.compensation_failures = outcome.failures;
        }

        if report.is_complete() {
            info!("Class at {} resolved: {} appointments reassigned", slot, report.updated.len());
        } else {
            warn!(
                "Class at {} not resolved: {} compensated, {} still reassigned",
                slot,
                report.compensated.len(),
                report.updated.len()
            );
        }
        Ok(report)
    }

    /// Applies a roster diff. Removals go first so added patients find room;
    /// individual failures are reported and the rest still run.
    pub async fn save(&self, roster: &ClassRoster) -> Result<ParticipantSaveReport, SchedulingError> {
        let diff = roster.diff();
        debug!(
            "Saving class at {}: {} removed, {} added, {} kept",
            roster.slot,
            diff.removed.len(),
            diff.added.len(),
            diff.kept.len()
        );

        let mut report = ParticipantSaveReport::default();

        for member in &diff.removed {
            match self.repository.delete(member.id).await {
                Ok(()) => report.removed.push(member.id),
                Err(e) => report.failures.push(step_failure(Some(member.id), &e)),
            }
        }

        for member in &diff.kept {
            let Some(patch) = roster.patch_for(member) else {
                continue;
            };
            match self.repository.update(member.id, patch).await {
                Ok(_) => report.updated.push(member.id),
                Err(e) => report.failures.push(step_failure(Some(member.id), &e)),
            }
        }

        if !diff.added.is_empty() {
            let template = roster.template().ok_or(SchedulingError::NotFound)?;
            for patient_id in &diff.added {
                let mut item = NewAppointment::from_template(template, *patient_id, roster.slot);
                item.specialist_id = roster.specialist_id;
                item.difficulty = Some(roster.difficulty);

                match self.repository.create(item).await {
                    Ok(created) => report.added.push(created.id),
                    Err(e) => report.failures.push(step_failure(None, &e)),
                }
            }
        }

        info!(
            "Class at {} saved: {} changes, {} failures",
            roster.slot,
            report.success_count(),
            report.fail_count()
        );
        Ok(report)
    }

    /// Deletes every appointment of the class, reporting those that could not be deleted.
    pub async fn delete_class(&self, slot: Slot) -> Result<ParticipantSaveReport, SchedulingError> {
        let class = self.class_at(slot).await?;
        let mut report = ParticipantSaveReport::default();

        for member in &class.appointments {
            match self.repository.delete(member.id).await {
                Ok(()) => report.removed.push(member.id),
                Err(e) => report.failures.push(step_failure(Some(member.id), &e)),
            }
        }

        info!("Class at {} deleted: {} removed, {} failed", slot, report.removed.len(), report.fail_count());
        Ok(report)
    }

    pub async fn repeat_class(
        &self,
        slot: Slot,
        weekdays: &[WorkingDay],
        weeks: u32,
    ) -> Result<BatchOutcome, SchedulingError> {
        let class = self.class_at(slot).await?;
        let template = ClassTemplate::from_class(&class).ok_or(SchedulingError::NotFound)?;
        self.recurrence.repeat(&template, weekdays, weeks).await
    }
}

fn step_failure(appointment_id: Option<Uuid>, error: &SchedulingError) -> StepFailure {
    warn!("Class step failed for {:?}: {}", appointment_id, error);
    StepFailure {
        appointment_id,
        reason: error.to_string(),
    }
}
