// libs/appointment-cell/src/services/availability.rs
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Timelike};
use tracing::debug;
use uuid::Uuid;

use shared_config::SchedulingSettings;

use crate::clock::Clock;
use crate::models::{Appointment, CandidateTime, SchedulingError, APPOINTMENT_MINUTES, TICK_MINUTES};
use crate::repository::AppointmentRepository;

/// One of the two exclusively bookable resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Specialist(Uuid),
    Room(Uuid),
}

/// Quarter-hour ticks held by a resource on one day.
///
/// An appointment holds every tick its one-hour window touches: four for
/// times on the quarter-hour grid, five when the start is off-grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyMap {
    ticks: BTreeSet<i64>,
}

impl OccupancyMap {
    pub fn from_appointments<'a>(date: NaiveDate, appointments: impl IntoIterator<Item = &'a Appointment>) -> Self {
        let ticks = appointments.into_iter()
            .filter(|a| a.date == date && a.is_active())
            .flat_map(|a| Self::ticks_of(a.time))
            .collect();
        Self { ticks }
    }

    fn ticks_of(time: NaiveTime) -> std::ops::RangeInclusive<i64> {
        let start = (time.num_seconds_from_midnight() / 60) as i64;
        start / TICK_MINUTES..=(start + APPOINTMENT_MINUTES - 1) / TICK_MINUTES
    }

    /// A start time is free when none of its own ticks are held.
    pub fn is_free(&self, time: NaiveTime) -> bool {
        !Self::ticks_of(time).any(|tick| self.ticks.contains(&tick))
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Start of every held tick, in order. Ticks past midnight are dropped.
    pub fn occupied_ticks(&self) -> Vec<NaiveTime> {
        self.ticks.iter()
            .filter_map(|tick| NaiveTime::from_num_seconds_from_midnight_opt((tick * TICK_MINUTES * 60) as u32, 0))
            .collect()
    }
}

pub struct AvailabilityService {
    repository: Arc<dyn AppointmentRepository>,
    clock: Arc<dyn Clock>,
    settings: SchedulingSettings,
}

impl AvailabilityService {
    pub fn new(
        repository: Arc<dyn AppointmentRepository>,
        clock: Arc<dyn Clock>,
        settings: SchedulingSettings,
    ) -> Self {
        Self { repository, clock, settings }
    }

    /// Start times offered on `date`. On the current day, times at or before
    /// now are not generated at all; past days offer nothing.
    pub fn candidate_times(&self, date: NaiveDate) -> Vec<NaiveTime> {
        let now = self.clock.now();
        if date < now.date() {
            return Vec::new();
        }

        let step = Duration::minutes(self.settings.slot_step_minutes.max(1) as i64);
        let length = Duration::minutes(APPOINTMENT_MINUTES);
        let mut times = Vec::new();
        let mut current = date.and_time(self.settings.day_start);
        let last_end = date.and_time(self.settings.day_end);

        while current + length <= last_end {
            if current > now {
                times.push(current.time());
            }
            current += step;
        }

        times
    }

    /// Occupancy of a resource on `date`, optionally ignoring one appointment.
    pub async fn occupancy(
        &self,
        resource: Resource,
        date: NaiveDate,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<OccupancyMap, SchedulingError> {
        let booked = self.booked(resource, date).await?;
        Ok(OccupancyMap::from_appointments(
            date,
            booked.iter().filter(|a| Some(a.id) != exclude_appointment_id),
        ))
    }

    pub async fn booked(&self, resource: Resource, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError> {
        let booked = match resource {
            Resource::Specialist(specialist_id) => self.repository.specialist_day(specialist_id, date).await?,
            Resource::Room(room_id) => self.repository.day(date).await?
                .into_iter()
                .filter(|a| a.room_id == Some(room_id))
                .collect(),
        };
        debug!("{:?} has {} bookings on {}", resource, booked.len(), date);
        Ok(booked)
    }

    /// Every non-cancelled booking on `date`, across all resources.
    pub async fn booked_day(&self, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError> {
        self.repository.day(date).await
    }

    /// Selection list for a resource: every candidate time with its free flag.
    pub async fn availability(
        &self,
        resource: Resource,
        date: NaiveDate,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<CandidateTime>, SchedulingError> {
        let occupancy = self.occupancy(resource, date, exclude_appointment_id).await?;

        Ok(self.candidate_times(date)
            .into_iter()
            .map(|time| CandidateTime { time, available: occupancy.is_free(time) })
            .collect())
    }

    pub fn settings(&self) -> &SchedulingSettings {
        &self.settings
    }
}
