// libs/appointment-cell/src/models.rs
use std::collections::BTreeSet;
use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::AppError;

/// Every appointment books its resources for one hour.
pub const APPOINTMENT_MINUTES: i64 = 60;

/// Granularity of the occupancy grid.
pub const TICK_MINUTES: i64 = 15;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub specialist_id: Uuid,
    pub specialty_id: Uuid,
    pub room_id: Option<Uuid>,
    pub date: NaiveDate,
    #[serde(with = "minute_time")]
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub plan_type: PlanType,
    pub price: Option<f64>,
    pub notes: Option<String>,
    /// Links the visits of one treatment package.
    pub treatment_group_id: Option<Uuid>,
    /// Only set on group-class appointments.
    pub difficulty: Option<DifficultyLevel>,
}

impl Appointment {
    pub fn slot(&self) -> Slot {
        Slot::new(self.date, self.time)
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::starting_at(self.slot())
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_class(&self) -> bool {
        self.difficulty.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Scheduled,
    Attended,
    Cancelled,
}

impl AppointmentStatus {
    /// Cancelled appointments release their resources.
    pub fn is_active(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Attended => write!(f, "attended"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Private,
    Insurance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
    Beginner,
    Intermediate,
    Advanced,
}

// ==============================================================================
// TIME MODELS
// ==============================================================================

/// A calendar day plus a start time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    pub date: NaiveDate,
    #[serde(with = "minute_time")]
    pub time: NaiveTime,
}

impl Slot {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time.format("%H:%M"))
    }
}

/// Half-open `[start, end)` interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn starting_at(slot: Slot) -> Self {
        let start = slot.starts_at();
        Self {
            start,
            end: start + Duration::minutes(APPOINTMENT_MINUTES),
        }
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// The five working days a recurrence may target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WorkingDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl WorkingDay {
    /// 1 (Monday) through 5 (Friday).
    pub fn number(&self) -> u32 {
        self.weekday().number_from_monday()
    }

    pub fn weekday(&self) -> Weekday {
        match self {
            WorkingDay::Monday => Weekday::Mon,
            WorkingDay::Tuesday => Weekday::Tue,
            WorkingDay::Wednesday => Weekday::Wed,
            WorkingDay::Thursday => Weekday::Thu,
            WorkingDay::Friday => Weekday::Fri,
        }
    }
}

// ==============================================================================
// WRITE MODELS
// ==============================================================================

/// A validated appointment ready to be persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub specialist_id: Uuid,
    pub specialty_id: Uuid,
    pub room_id: Option<Uuid>,
    pub date: NaiveDate,
    #[serde(with = "minute_time")]
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub plan_type: PlanType,
    pub price: Option<f64>,
    pub notes: Option<String>,
    pub treatment_group_id: Option<Uuid>,
    pub difficulty: Option<DifficultyLevel>,
}

impl NewAppointment {
    pub fn slot(&self) -> Slot {
        Slot::new(self.date, self.time)
    }

    pub fn is_class(&self) -> bool {
        self.difficulty.is_some()
    }

    pub fn with_id(self, id: Uuid) -> Appointment {
        Appointment {
            id,
            patient_id: self.patient_id,
            specialist_id: self.specialist_id,
            specialty_id: self.specialty_id,
            room_id: self.room_id,
            date: self.date,
            time: self.time,
            status: self.status,
            plan_type: self.plan_type,
            price: self.price,
            notes: self.notes,
            treatment_group_id: self.treatment_group_id,
            difficulty: self.difficulty,
        }
    }

    /// Copy of an existing appointment for another patient or another day.
    pub fn from_template(template: &Appointment, patient_id: Uuid, slot: Slot) -> Self {
        Self {
            patient_id,
            specialist_id: template.specialist_id,
            specialty_id: template.specialty_id,
            room_id: template.room_id,
            date: slot.date,
            time: slot.time,
            status: AppointmentStatus::Scheduled,
            plan_type: template.plan_type,
            price: template.price,
            notes: None,
            treatment_group_id: None,
            difficulty: template.difficulty,
        }
    }
}

/// Partial update. `None` leaves a field untouched; `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppointmentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialist_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Option<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "minute_time::option")]
    pub time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<PlanType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Option<DifficultyLevel>>,
}

impl AppointmentPatch {
    pub fn reschedule(slot: Slot) -> Self {
        Self {
            date: Some(slot.date),
            time: Some(slot.time),
            ..Default::default()
        }
    }

    pub fn status(status: AppointmentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when the patch moves the appointment or reassigns a resource.
    pub fn touches_resources(&self) -> bool {
        self.specialist_id.is_some() || self.room_id.is_some() || self.date.is_some() || self.time.is_some()
    }

    pub fn apply_to(&self, appointment: &mut Appointment) {
        if let Some(specialist_id) = self.specialist_id {
            appointment.specialist_id = specialist_id;
        }
        if let Some(room_id) = self.room_id {
            appointment.room_id = room_id;
        }
        if let Some(date) = self.date {
            appointment.date = date;
        }
        if let Some(time) = self.time {
            appointment.time = time;
        }
        if let Some(status) = self.status {
            appointment.status = status;
        }
        if let Some(plan_type) = self.plan_type {
            appointment.plan_type = plan_type;
        }
        if let Some(price) = self.price {
            appointment.price = price;
        }
        if let Some(notes) = &self.notes {
            appointment.notes = notes.clone();
        }
        if let Some(difficulty) = self.difficulty {
            appointment.difficulty = difficulty;
        }
    }
}

// ==============================================================================
// REQUEST MODELS (boundary DTOs, validated before any scheduling logic runs)
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentDraft {
    pub patient_id: Option<Uuid>,
    pub specialist_id: Option<Uuid>,
    pub specialty_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub plan_type: Option<PlanType>,
    pub price: Option<f64>,
    pub notes: Option<String>,
    pub treatment_group_id: Option<Uuid>,
    pub difficulty: Option<DifficultyLevel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentEdit {
    pub specialist_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    #[serde(default)]
    pub clear_room: bool,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub plan_type: Option<PlanType>,
    pub price: Option<f64>,
    pub notes: Option<String>,
    pub difficulty: Option<DifficultyLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRequest {
    pub date: NaiveDate,
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatClassRequest {
    pub date: NaiveDate,
    pub time: String,
    pub weekdays: Vec<WorkingDay>,
    pub weeks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveClassRequest {
    pub date: NaiveDate,
    pub time: String,
    pub specialist_id: Uuid,
    pub difficulty: Option<DifficultyLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveParticipantsRequest {
    pub date: NaiveDate,
    pub time: String,
    pub specialist_id: Uuid,
    pub difficulty: Option<DifficultyLevel>,
    pub patient_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSlotRequest {
    pub date: NaiveDate,
    pub time: String,
}

// ==============================================================================
// READ MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CandidateTime {
    #[serde(with = "minute_time")]
    pub time: NaiveTime,
    pub available: bool,
}

/// "position/total" numbering of one appointment inside its package.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageLabel {
    pub appointment_id: Uuid,
    pub position: usize,
    pub total: usize,
}

impl fmt::Display for PackageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.position, self.total)
    }
}

/// A derived group session: the class appointments sharing one (date, time).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupClass {
    pub slot: Slot,
    pub appointments: Vec<Appointment>,
}

impl GroupClass {
    pub fn specialists(&self) -> BTreeSet<Uuid> {
        self.appointments.iter().map(|a| a.specialist_id).collect()
    }

    pub fn has_specialist_conflict(&self) -> bool {
        self.specialists().len() > 1
    }

    pub fn participants(&self) -> BTreeSet<Uuid> {
        self.appointments.iter().map(|a| a.patient_id).collect()
    }

    /// Specialist held by most members, ties broken by the earliest-listed appointment.
    pub fn lead_specialist(&self) -> Option<Uuid> {
        let mut best: Option<(Uuid, usize)> = None;
        for appointment in &self.appointments {
            let count = self.appointments.iter()
                .filter(|a| a.specialist_id == appointment.specialist_id)
                .count();
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((appointment.specialist_id, count));
            }
        }
        best.map(|(id, _)| id)
    }

    pub fn difficulty(&self) -> Option<DifficultyLevel> {
        self.appointments.iter().find_map(|a| a.difficulty)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchFailure {
    pub index: usize,
    pub slot: Slot,
    pub patient_id: Uuid,
    pub reason: String,
}

/// Per-item result of a batch create. Never all-or-nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchOutcome {
    pub created: Vec<Appointment>,
    pub failures: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn success_count(&self) -> usize {
        self.created.len()
    }

    pub fn fail_count(&self) -> usize {
        self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepFailure {
    pub appointment_id: Option<Uuid>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Appointments reassigned and still reassigned when the saga ended.
    pub updated: Vec<Uuid>,
    /// Appointments restored to their previous specialist after a later step failed.
    pub compensated: Vec<Uuid>,
    pub failure: Option<StepFailure>,
    pub compensation_failures: Vec<StepFailure>,
}

impl ResolutionReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantSaveReport {
    pub removed: Vec<Uuid>,
    pub added: Vec<Uuid>,
    pub updated: Vec<Uuid>,
    pub failures: Vec<StepFailure>,
}

impl ParticipantSaveReport {
    pub fn success_count(&self) -> usize {
        self.removed.len() + self.added.len() + self.updated.len()
    }

    pub fn fail_count(&self) -> usize {
        self.failures.len()
    }
}

/// Fully resolved appointment data handed to the outbound messaging collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentNotice {
    pub appointment_id: Uuid,
    pub patient_name: String,
    pub specialist_name: String,
    pub specialty_name: String,
    pub date: NaiveDate,
    #[serde(with = "minute_time")]
    pub time: NaiveTime,
}

impl AppointmentNotice {
    pub fn for_appointment(
        appointment: &Appointment,
        patient_name: impl Into<String>,
        specialist_name: impl Into<String>,
        specialty_name: impl Into<String>,
    ) -> Self {
        Self {
            appointment_id: appointment.id,
            patient_name: patient_name.into(),
            specialist_name: specialist_name.into(),
            specialty_name: specialty_name.into(),
            date: appointment.date,
            time: appointment.time,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Specialist is not available on {slot}")]
    SpecialistUnavailable { slot: Slot },

    #[error("Room is not available on {slot}")]
    RoomUnavailable { slot: Slot },

    #[error("Class on {slot} already has {capacity} participants")]
    ClassFull { slot: Slot, capacity: usize },

    #[error("Patient is already in the class")]
    DuplicateParticipant,

    #[error("Appointment not found")]
    NotFound,

    #[error("Cannot change status from {from} to {to}")]
    InvalidStatusTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Slot already taken: {0}")]
    SlotTaken(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl SchedulingError {
    /// Availability conflicts, whether caught by the read-side check or at the write boundary.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SchedulingError::SpecialistUnavailable { .. }
                | SchedulingError::RoomUnavailable { .. }
                | SchedulingError::ClassFull { .. }
                | SchedulingError::SlotTaken(_)
        )
    }
}

impl From<SchedulingError> for AppError {
    fn from(error: SchedulingError) -> Self {
        let message = error.to_string();
        match error {
            SchedulingError::Validation(msg) => AppError::ValidationError(msg),
            SchedulingError::NotFound => AppError::NotFound(message),
            SchedulingError::Forbidden(msg) => AppError::Forbidden(msg),
            SchedulingError::InvalidStatusTransition { .. } => AppError::BadRequest(message),
            SchedulingError::Database(msg) => AppError::Database(msg),
            SchedulingError::SpecialistUnavailable { .. }
            | SchedulingError::RoomUnavailable { .. }
            | SchedulingError::ClassFull { .. }
            | SchedulingError::DuplicateParticipant
            | SchedulingError::SlotTaken(_) => AppError::Conflict(message),
        }
    }
}

/// Times travel as "HH:MM" (PostgREST `time` columns also answer "HH:MM:SS").
pub mod minute_time {
    use chrono::{NaiveTime, Timelike};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .ok()
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time '{}'", raw)))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => super::serialize(t, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveTime>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|r| super::parse(&r).ok_or_else(|| serde::de::Error::custom(format!("invalid time '{}'", r))))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(h: u32, m: u32) -> Slot {
        Slot::new(
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            NaiveTime::from_hms_opt(h, m, 0).unwrap(),
        )
    }

    #[test]
    fn test_windows_are_half_open() {
        let ten = TimeWindow::starting_at(slot(10, 0));
        assert!(ten.overlaps(&TimeWindow::starting_at(slot(10, 30))));
        assert!(ten.overlaps(&TimeWindow::starting_at(slot(9, 1))));
        assert!(!ten.overlaps(&TimeWindow::starting_at(slot(11, 0))));
        assert!(!ten.overlaps(&TimeWindow::starting_at(slot(9, 0))));
    }

    #[test]
    fn test_minute_time_accepts_postgres_format() {
        assert_eq!(minute_time::parse("09:30:00"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(minute_time::parse("09:30"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(minute_time::parse("9h30"), None);
    }

    #[test]
    fn test_patch_serializes_only_set_fields() {
        let patch = AppointmentPatch {
            room_id: Some(None),
            time: NaiveTime::from_hms_opt(11, 0, 0),
            ..Default::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, serde_json::json!({ "room_id": null, "time": "11:00" }));
    }

    #[test]
    fn test_notice_payload_carries_resolved_names() {
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            specialist_id: Uuid::new_v4(),
            specialty_id: Uuid::new_v4(),
            room_id: None,
            date: slot(9, 45).date,
            time: slot(9, 45).time,
            status: AppointmentStatus::Scheduled,
            plan_type: PlanType::Private,
            price: None,
            notes: None,
            treatment_group_id: None,
            difficulty: None,
        };

        let notice = AppointmentNotice::for_appointment(&appointment, "Ana Ruiz", "Lic. Paz", "Kinesiology");
        let value = serde_json::to_value(&notice).unwrap();

        assert_eq!(value["patient_name"], "Ana Ruiz");
        assert_eq!(value["specialty_name"], "Kinesiology");
        assert_eq!(value["date"], "2026-03-02");
        assert_eq!(value["time"], "09:45");
    }

    #[test]
    fn test_package_label_display() {
        let label = PackageLabel { appointment_id: Uuid::nil(), position: 2, total: 3 };
        assert_eq!(label.to_string(), "2/3");
    }
}
