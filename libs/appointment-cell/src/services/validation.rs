use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use tracing::debug;
use uuid::Uuid;

use shared_config::SchedulingSettings;

use crate::clock::Clock;
use crate::models::{
    minute_time, Appointment, AppointmentDraft, AppointmentEdit, AppointmentPatch, AppointmentStatus,
    NewAppointment, PlanType, SchedulingError, Slot, APPOINTMENT_MINUTES,
};

const MAX_NOTES_CHARS: usize = 2000;

/// Turns boundary payloads into typed values before any scheduling logic sees them.
pub struct AppointmentValidator {
    settings: SchedulingSettings,
    clock: Arc<dyn Clock>,
}

impl AppointmentValidator {
    pub fn new(settings: SchedulingSettings, clock: Arc<dyn Clock>) -> Self {
        Self { settings, clock }
    }

    pub fn parse_time(raw: &str) -> Result<NaiveTime, SchedulingError> {
        minute_time::parse(raw)
            .ok_or_else(|| SchedulingError::Validation(format!("Invalid time '{}', expected HH:MM", raw)))
    }

    /// A bookable slot: inside opening hours and strictly in the future.
    pub fn validate_slot(&self, date: NaiveDate, time: NaiveTime) -> Result<Slot, SchedulingError> {
        let closes = date.and_time(self.settings.day_end);
        let starts = date.and_time(time);

        if time < self.settings.day_start || starts + Duration::minutes(APPOINTMENT_MINUTES) > closes {
            return Err(SchedulingError::Validation(format!(
                "Appointments must start between {} and one hour before {}",
                self.settings.day_start.format("%H:%M"),
                self.settings.day_end.format("%H:%M")
            )));
        }
        if starts <= self.clock.now() {
            return Err(SchedulingError::Validation(format!("{} is in the past", Slot::new(date, time))));
        }

        Ok(Slot::new(date, time))
    }

    pub fn parse_slot(&self, date: NaiveDate, time: &str) -> Result<Slot, SchedulingError> {
        self.validate_slot(date, Self::parse_time(time)?)
    }

    pub fn validate_new(&self, draft: AppointmentDraft) -> Result<NewAppointment, SchedulingError> {
        debug!("Validating appointment draft");

        let patient_id = required_id(draft.patient_id, "patient_id")?;
        let specialist_id = required_id(draft.specialist_id, "specialist_id")?;
        let specialty_id = required_id(draft.specialty_id, "specialty_id")?;
        let date = draft.date
            .ok_or_else(|| SchedulingError::Validation("date is required".to_string()))?;
        let time = draft.time.as_deref()
            .ok_or_else(|| SchedulingError::Validation("time is required".to_string()))?;
        let slot = self.parse_slot(date, time)?;

        if let Some(room_id) = draft.room_id {
            required_id(Some(room_id), "room_id")?;
        }
        validate_price(draft.price)?;
        let notes = validate_notes(draft.notes)?;

        Ok(NewAppointment {
            patient_id,
            specialist_id,
            specialty_id,
            room_id: draft.room_id,
            date: slot.date,
            time: slot.time,
            status: AppointmentStatus::Scheduled,
            plan_type: draft.plan_type.unwrap_or(PlanType::Private),
            price: draft.price,
            notes,
            treatment_group_id: draft.treatment_group_id,
            difficulty: draft.difficulty,
        })
    }

    /// Patch for an edit. Date and time are checked as a pair against the
    /// appointment's current values when only one of them changes. A slot sent
    /// back unchanged is not re-validated, so a started appointment stays editable.
    pub fn validate_edit(&self, current: &Appointment, edit: AppointmentEdit) -> Result<AppointmentPatch, SchedulingError> {
        let mut patch = AppointmentPatch::default();

        if edit.date.is_some() || edit.time.is_some() {
            let time = match edit.time.as_deref() {
                Some(raw) => Self::parse_time(raw)?,
                None => current.time,
            };
            let requested = Slot::new(edit.date.unwrap_or(current.date), time);
            if requested != current.slot() {
                let slot = self.validate_slot(requested.date, requested.time)?;
                patch.date = Some(slot.date);
                patch.time = Some(slot.time);
            }
        }

        if let Some(specialist_id) = edit.specialist_id {
            required_id(Some(specialist_id), "specialist_id")?;
            if specialist_id != current.specialist_id {
                patch.specialist_id = Some(specialist_id);
            }
        }

        if edit.clear_room {
            if edit.room_id.is_some() {
                return Err(SchedulingError::Validation("room_id and clear_room are exclusive".to_string()));
            }
            if current.room_id.is_some() {
                patch.room_id = Some(None);
            }
        } else if let Some(room_id) = edit.room_id {
            required_id(Some(room_id), "room_id")?;
            if current.room_id != Some(room_id) {
                patch.room_id = Some(Some(room_id));
            }
        }

        if let Some(plan_type) = edit.plan_type {
            patch.plan_type = Some(plan_type);
        }
        if edit.price.is_some() {
            validate_price(edit.price)?;
            patch.price = Some(edit.price);
        }
        if edit.notes.is_some() {
            patch.notes = Some(validate_notes(edit.notes)?);
        }
        if let Some(difficulty) = edit.difficulty {
            if current.difficulty != Some(difficulty) {
                patch.difficulty = Some(Some(difficulty));
            }
        }

        if patch.is_empty() {
            return Err(SchedulingError::Validation("Nothing to update".to_string()));
        }
        Ok(patch)
    }
}

fn required_id(id: Option<Uuid>, field: &str) -> Result<Uuid, SchedulingError> {
    match id {
        Some(id) if !id.is_nil() => Ok(id),
        _ => Err(SchedulingError::Validation(format!("{} is required", field))),
    }
}

fn validate_price(price: Option<f64>) -> Result<(), SchedulingError> {
    match price {
        Some(p) if !p.is_finite() || p < 0.0 => {
            Err(SchedulingError::Validation("price must be a non-negative amount".to_string()))
        }
        _ => Ok(()),
    }
}

fn validate_notes(notes: Option<String>) -> Result<Option<String>, SchedulingError> {
    let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    if notes.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTES_CHARS) {
        return Err(SchedulingError::Validation(format!("notes exceed {} characters", MAX_NOTES_CHARS)));
    }
    Ok(notes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::clock::FixedClock;

    fn validator() -> AppointmentValidator {
        let now = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(10, 20, 0).unwrap();
        AppointmentValidator::new(SchedulingSettings::default(), Arc::new(FixedClock::at(now)))
    }

    fn draft() -> AppointmentDraft {
        AppointmentDraft {
            patient_id: Some(Uuid::new_v4()),
            specialist_id: Some(Uuid::new_v4()),
            specialty_id: Some(Uuid::new_v4()),
            room_id: None,
            date: NaiveDate::from_ymd_opt(2026, 3, 3),
            time: Some("09:30".to_string()),
            plan_type: Some(PlanType::Insurance),
            price: Some(8500.0),
            notes: Some("  first visit ".to_string()),
            treatment_group_id: None,
            difficulty: None,
        }
    }

    #[test]
    fn test_valid_draft() {
        let new = validator().validate_new(draft()).unwrap();
        assert_eq!(new.time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(new.notes.as_deref(), Some("first visit"));
        assert_eq!(new.status, AppointmentStatus::Scheduled);
    }

    #[test]
    fn test_missing_patient_rejected() {
        let mut d = draft();
        d.patient_id = None;
        assert_matches!(validator().validate_new(d), Err(SchedulingError::Validation(msg)) if msg.contains("patient_id"));
    }

    #[test]
    fn test_past_slot_today_rejected() {
        let mut d = draft();
        d.date = NaiveDate::from_ymd_opt(2026, 3, 2);
        d.time = Some("10:15".to_string());
        assert_matches!(validator().validate_new(d), Err(SchedulingError::Validation(_)));
    }

    #[test]
    fn test_slot_outside_opening_hours_rejected() {
        let mut d = draft();
        d.time = Some("20:30".to_string());
        assert_matches!(validator().validate_new(d), Err(SchedulingError::Validation(_)));
    }

    #[test]
    fn test_negative_price_rejected() {
        let mut d = draft();
        d.price = Some(-1.0);
        assert_matches!(validator().validate_new(d), Err(SchedulingError::Validation(_)));
    }
}
