use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, NewAppointment, SchedulingError, Slot, TimeWindow};
use crate::services::availability::{AvailabilityService, Resource};

/// A (slot, specialist, room) tuple someone wants to book or move to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub slot: Slot,
    pub specialist_id: Uuid,
    pub room_id: Option<Uuid>,
    pub is_class: bool,
    /// The appointment being edited; it never conflicts with itself.
    pub editing_id: Option<Uuid>,
}

impl Proposal {
    pub fn for_new(appointment: &NewAppointment) -> Self {
        Self {
            slot: appointment.slot(),
            specialist_id: appointment.specialist_id,
            room_id: appointment.room_id,
            is_class: appointment.is_class(),
            editing_id: None,
        }
    }

    /// The proposal an existing (possibly already patched) appointment represents.
    pub fn for_existing(appointment: &Appointment) -> Self {
        Self {
            slot: appointment.slot(),
            specialist_id: appointment.specialist_id,
            room_id: appointment.room_id,
            is_class: appointment.is_class(),
            editing_id: Some(appointment.id),
        }
    }

    fn window(&self) -> TimeWindow {
        TimeWindow::starting_at(self.slot)
    }

    fn counts(&self, other: &Appointment) -> bool {
        other.is_active() && Some(other.id) != self.editing_id
    }

    /// Members of the same class hold the resource once between them.
    fn same_class(&self, other: &Appointment) -> bool {
        self.is_class && other.is_class() && other.slot() == self.slot
    }

    fn shares_specialist_session(&self, other: &Appointment) -> bool {
        self.same_class(other) && other.specialist_id == self.specialist_id
    }

    fn shares_room_session(&self, other: &Appointment) -> bool {
        self.same_class(other) && other.room_id == self.room_id
    }
}

/// Exact half-open overlap check of a proposal against a day's bookings.
/// This is the rule repositories enforce at write time.
pub fn check_against(
    proposal: &Proposal,
    existing: &[Appointment],
    class_capacity: usize,
) -> Result<(), SchedulingError> {
    let window = proposal.window();

    for other in existing.iter().filter(|a| proposal.counts(a)) {
        if !other.window().overlaps(&window) {
            continue;
        }
        if other.specialist_id == proposal.specialist_id && !proposal.shares_specialist_session(other) {
            return Err(SchedulingError::SpecialistUnavailable { slot: proposal.slot });
        }
        if proposal.room_id.is_some() && other.room_id == proposal.room_id && !proposal.shares_room_session(other) {
            return Err(SchedulingError::RoomUnavailable { slot: proposal.slot });
        }
    }

    check_class_capacity(proposal, existing, class_capacity)
}

fn check_class_capacity(
    proposal: &Proposal,
    existing: &[Appointment],
    class_capacity: usize,
) -> Result<(), SchedulingError> {
    if !proposal.is_class {
        return Ok(());
    }
    let members = existing.iter()
        .filter(|a| proposal.counts(a) && proposal.same_class(a))
        .count();
    if members >= class_capacity {
        return Err(SchedulingError::ClassFull { slot: proposal.slot, capacity: class_capacity });
    }
    Ok(())
}

/// Advisory check run before create/edit/move. Not atomic with the write that follows;
/// the repository's own check is authoritative. Uses the same exact windows as
/// `check_against`; quarter-hour ticks only drive the selection list.
pub struct ConflictDetectionService {
    availability: Arc<AvailabilityService>,
}

impl ConflictDetectionService {
    pub fn new(availability: Arc<AvailabilityService>) -> Self {
        Self { availability }
    }

    pub async fn check(&self, proposal: &Proposal) -> Result<(), SchedulingError> {
        debug!("Checking conflicts for specialist {} at {}", proposal.specialist_id, proposal.slot);
        let date = proposal.slot.date;

        let window = proposal.window();
        let specialist_day = self.availability
            .booked(Resource::Specialist(proposal.specialist_id), date)
            .await?;
        let busy = specialist_day.iter()
            .filter(|a| proposal.counts(a) && !proposal.shares_specialist_session(a))
            .any(|a| a.window().overlaps(&window));
        if busy {
            warn!("Specialist {} already booked around {}", proposal.specialist_id, proposal.slot);
            return Err(SchedulingError::SpecialistUnavailable { slot: proposal.slot });
        }

        let capacity = self.availability.settings().class_capacity;
        if proposal.is_class || proposal.room_id.is_some() {
            let day = self.availability.booked_day(date).await?;

            if let Some(room_id) = proposal.room_id {
                let clash = day.iter()
                    .filter(|a| a.room_id == Some(room_id))
                    .filter(|a| proposal.counts(a) && !proposal.shares_room_session(a))
                    .any(|a| a.window().overlaps(&window));
                if clash {
                    warn!("Room {} already booked around {}", room_id, proposal.slot);
                    return Err(SchedulingError::RoomUnavailable { slot: proposal.slot });
                }
            }

            check_class_capacity(proposal, &day, capacity)?;
        }

        Ok(())
    }

    /// Rooms from `rooms` that are free for the slot. When editing, the
    /// appointment's current room is always offered.
    pub async fn available_rooms(
        &self,
        slot: Slot,
        rooms: &[Uuid],
        editing: Option<&Appointment>,
    ) -> Result<Vec<Uuid>, SchedulingError> {
        let day = self.availability.booked_day(slot.date).await?;
        let window = TimeWindow::starting_at(slot);
        let editing_id = editing.map(|a| a.id);
        let current_room = editing.and_then(|a| a.room_id);

        Ok(rooms.iter()
            .copied()
            .filter(|room_id| {
                Some(*room_id) == current_room
                    || !day.iter().any(|a| {
                        a.room_id == Some(*room_id)
                            && Some(a.id) != editing_id
                            && a.is_active()
                            && a.window().overlaps(&window)
                    })
            })
            .collect())
    }
}
