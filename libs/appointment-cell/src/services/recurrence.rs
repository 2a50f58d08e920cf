// libs/appointment-cell/src/services/recurrence.rs
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{
    Appointment, BatchOutcome, DifficultyLevel, GroupClass, NewAppointment, SchedulingError, Slot,
    WorkingDay,
};
use crate::repository::AppointmentRepository;

/// What gets copied into every generated week.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassTemplate {
    pub slot: Slot,
    pub specialist_id: Uuid,
    pub difficulty: Option<DifficultyLevel>,
    /// One appointment per participant; plan, price, specialty and room come from here.
    pub members: Vec<Appointment>,
}

impl ClassTemplate {
    /// Template from a class as it stands now: its lead specialist and difficulty.
    pub fn from_class(class: &GroupClass) -> Option<Self> {
        let specialist_id = class.lead_specialist()?;
        let mut seen = BTreeSet::new();
        let members = class.appointments.iter()
            .filter(|a| seen.insert(a.patient_id))
            .cloned()
            .collect();

        Some(Self {
            slot: class.slot,
            specialist_id,
            difficulty: class.difficulty(),
            members,
        })
    }

    /// Template from a single appointment.
    pub fn from_appointment(appointment: &Appointment) -> Self {
        Self {
            slot: appointment.slot(),
            specialist_id: appointment.specialist_id,
            difficulty: appointment.difficulty,
            members: vec![appointment.clone()],
        }
    }

    pub fn participants(&self) -> BTreeSet<Uuid> {
        self.members.iter().map(|a| a.patient_id).collect()
    }
}

/// Dates the base slot repeats on.
///
/// Each selected weekday gets exactly `weeks` week offsets counted after the
/// base occurrence: for the base's own weekday that is weeks 1..=N, for the
/// others weeks 0..N (a weekday earlier in the week than the base falls into
/// the following week). Occurrences at or before `now` are dropped.
pub fn occurrence_dates(
    base: Slot,
    weekdays: &BTreeSet<WorkingDay>,
    weeks: u32,
    now: NaiveDateTime,
) -> Vec<NaiveDate> {
    let base_weekday = base.date.weekday().number_from_monday() as i64;
    let mut dates = BTreeSet::new();

    for weekday in weekdays {
        let mut delta = weekday.number() as i64 - base_weekday;
        if delta < 0 {
            delta += 7;
        }

        let occurrences = (0..=weeks as i64)
            .map(|week| base.date + Duration::days(7 * week + delta))
            .filter(|date| *date != base.date)
            .take(weeks as usize)
            .filter(|date| date.and_time(base.time) > now);

        dates.extend(occurrences);
    }

    dates.into_iter().collect()
}

pub struct RecurrenceService {
    repository: Arc<dyn AppointmentRepository>,
    clock: Arc<dyn Clock>,
    max_weeks: u32,
}

impl RecurrenceService {
    pub fn new(repository: Arc<dyn AppointmentRepository>, clock: Arc<dyn Clock>, max_weeks: u32) -> Self {
        Self { repository, clock, max_weeks }
    }

    fn validate(&self, template: &ClassTemplate, weekdays: &[WorkingDay], weeks: u32) -> Result<(), SchedulingError> {
        if weekdays.is_empty() {
            return Err(SchedulingError::Validation("Select at least one weekday".to_string()));
        }
        if weeks == 0 || weeks > self.max_weeks {
            return Err(SchedulingError::Validation(format!(
                "Weeks must be between 1 and {}",
                self.max_weeks
            )));
        }
        if template.members.is_empty() {
            return Err(SchedulingError::Validation("The class has no participants".to_string()));
        }
        Ok(())
    }

    /// Appointments the repeat would create, one per participant per occurrence.
    pub fn plan(
        &self,
        template: &ClassTemplate,
        weekdays: &[WorkingDay],
        weeks: u32,
    ) -> Result<Vec<NewAppointment>, SchedulingError> {
        self.validate(template, weekdays, weeks)?;

        let selected: BTreeSet<WorkingDay> = weekdays.iter().copied().collect();
        let dates = occurrence_dates(template.slot, &selected, weeks, self.clock.now());
        debug!("Repeating {} on {} dates", template.slot, dates.len());

        let mut items = Vec::with_capacity(dates.len() * template.members.len());
        for date in dates {
            let slot = Slot::new(date, template.slot.time);
            for member in &template.members {
                let mut item = NewAppointment::from_template(member, member.patient_id, slot);
                item.specialist_id = template.specialist_id;
                item.difficulty = template.difficulty;
                items.push(item);
            }
        }

        Ok(items)
    }

    /// Generates and submits the repeated appointments as one batch.
    pub async fn repeat(
        &self,
        template: &ClassTemplate,
        weekdays: &[WorkingDay],
        weeks: u32,
    ) -> Result<BatchOutcome, SchedulingError> {
        let items = self.plan(template, weekdays, weeks)?;

        if items.is_empty() {
            info!("Nothing to repeat for {}: every occurrence is in the past", template.slot);
            return Ok(BatchOutcome::default());
        }

        let submitted = items.len();
        let outcome = self.repository.create_batch(items).await?;

        if outcome.is_complete() {
            info!("Repeated {}: {} appointments created", template.slot, outcome.success_count());
        } else {
            warn!(
                "Repeated {} partially: {} of {} created, {} failed",
                template.slot,
                outcome.success_count(),
                submitted,
                outcome.fail_count()
            );
        }

        Ok(outcome)
    }
}
