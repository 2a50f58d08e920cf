pub mod availability;
pub mod booking;
pub mod conflict;
pub mod group_class;
pub mod lifecycle;
pub mod numbering;
pub mod recurrence;
pub mod reschedule;
pub mod saga;
pub mod validation;

pub use availability::{AvailabilityService, OccupancyMap, Resource};
pub use booking::AppointmentBookingService;
pub use conflict::{check_against, ConflictDetectionService, Proposal};
pub use group_class::{derive_classes, ClassRoster, GroupClassService, RosterDiff};
pub use lifecycle::AppointmentLifecycleService;
pub use numbering::{package_labels, PackageLabelCache, PackageLabels, PackageNumberingService};
pub use recurrence::{occurrence_dates, ClassTemplate, RecurrenceService};
pub use reschedule::{MoveOutcome, Notice, OptimisticCoordinator, RescheduleCommand};
pub use saga::{Compensation, CompensationOutcome, Saga};
pub use validation::AppointmentValidator;
