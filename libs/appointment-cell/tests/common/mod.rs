#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use mockall::mock;
use uuid::Uuid;

use appointment_cell::clock::{Clock, FixedClock};
use appointment_cell::models::*;
use appointment_cell::repository::AppointmentRepository;

mock! {
    pub Repository {}

    #[async_trait]
    impl AppointmentRepository for Repository {
        async fn specialist_day(&self, specialist_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError>;
        async fn day(&self, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError>;
        async fn patient_history(&self, patient_id: Uuid) -> Result<Vec<Appointment>, SchedulingError>;
        async fn get(&self, id: Uuid) -> Result<Appointment, SchedulingError>;
        async fn create(&self, appointment: NewAppointment) -> Result<Appointment, SchedulingError>;
        async fn update(&self, id: Uuid, patch: AppointmentPatch) -> Result<Appointment, SchedulingError>;
        async fn delete(&self, id: Uuid) -> Result<(), SchedulingError>;
        async fn create_batch(&self, items: Vec<NewAppointment>) -> Result<BatchOutcome, SchedulingError>;
    }
}

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// 2026-03-02 is a Monday.
pub fn monday() -> NaiveDate {
    ymd(2026, 3, 2)
}

pub fn wednesday() -> NaiveDate {
    ymd(2026, 3, 4)
}

/// Monday morning, before the working day starts.
pub fn early_monday_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::at(monday().and_time(hm(7, 0))))
}

pub fn clock_at(date: NaiveDate, h: u32, m: u32) -> Arc<dyn Clock> {
    Arc::new(FixedClock::at(date.and_time(hm(h, m))))
}

pub fn appointment(specialist_id: Uuid, date: NaiveDate, time: NaiveTime) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        specialist_id,
        specialty_id: Uuid::new_v4(),
        room_id: None,
        date,
        time,
        status: AppointmentStatus::Scheduled,
        plan_type: PlanType::Private,
        price: Some(9000.0),
        notes: None,
        treatment_group_id: None,
        difficulty: None,
    }
}

pub fn class_member(specialist_id: Uuid, slot: Slot, difficulty: DifficultyLevel) -> Appointment {
    let mut member = appointment(specialist_id, slot.date, slot.time);
    member.difficulty = Some(difficulty);
    member.plan_type = PlanType::Insurance;
    member
}

pub fn draft(specialist_id: Uuid, date: NaiveDate, time: &str) -> AppointmentDraft {
    AppointmentDraft {
        patient_id: Some(Uuid::new_v4()),
        specialist_id: Some(specialist_id),
        specialty_id: Some(Uuid::new_v4()),
        room_id: None,
        date: Some(date),
        time: Some(time.to_string()),
        plan_type: Some(PlanType::Private),
        price: Some(9000.0),
        notes: None,
        treatment_group_id: None,
        difficulty: None,
    }
}
