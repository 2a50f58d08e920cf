pub mod clock;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod router;
pub mod services;
pub mod store;

// Re-export models and services for the api crate and tests
pub use clock::{Clock, FixedClock, SystemClock};
pub use models::*;
pub use repository::{AppointmentRepository, InMemoryAppointmentRepository, SupabaseAppointmentRepository};
pub use services::*;
pub use store::{AppointmentStore, StoreCommand, StoreEvent};
