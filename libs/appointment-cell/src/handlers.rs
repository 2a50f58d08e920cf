// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use chrono::NaiveDate;
use headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_config::{AppConfig, SchedulingSettings};
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_admin;

use crate::clock::{Clock, SystemClock};
use crate::models::{
    AppointmentDraft, AppointmentEdit, ClassSlotRequest, MoveRequest, RepeatClassRequest,
    ResolveClassRequest, SaveParticipantsRequest, Slot, StatusChangeRequest,
};
use crate::repository::{AppointmentRepository, SupabaseAppointmentRepository};
use crate::services::{
    AppointmentBookingService, AppointmentValidator, AvailabilityService, ConflictDetectionService,
    GroupClassService, PackageNumberingService, RecurrenceService, Resource,
};

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub specialist_id: Uuid,
    pub date: NaiveDate,
    /// Appointment being edited; its own hour shows as free.
    pub exclude_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RoomAvailabilityQuery {
    pub date: NaiveDate,
    pub time: String,
    /// Comma separated room ids.
    pub room_ids: String,
    pub editing_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ClassesQuery {
    pub date: NaiveDate,
}

// ==============================================================================
// SERVICE WIRING
// ==============================================================================

/// Services for one request, all sharing one repository.
pub struct SchedulingServices {
    pub booking: AppointmentBookingService,
    pub availability: Arc<AvailabilityService>,
    pub numbering: PackageNumberingService,
    pub classes: GroupClassService,
}

impl SchedulingServices {
    /// Supabase-backed services acting with the caller's token.
    pub fn for_request(config: &AppConfig, token: &str) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let repository: Arc<dyn AppointmentRepository> = Arc::new(SupabaseAppointmentRepository::new(
            supabase,
            token,
            config.scheduling.batch_concurrency,
        ));
        Self::new(repository, Arc::new(SystemClock), config.scheduling.clone())
    }

    pub fn new(
        repository: Arc<dyn AppointmentRepository>,
        clock: Arc<dyn Clock>,
        settings: SchedulingSettings,
    ) -> Self {
        let availability = Arc::new(AvailabilityService::new(repository.clone(), clock.clone(), settings.clone()));
        let conflict = Arc::new(ConflictDetectionService::new(availability.clone()));
        let validator = Arc::new(AppointmentValidator::new(settings.clone(), clock.clone()));
        let recurrence = Arc::new(RecurrenceService::new(repository.clone(), clock, settings.recurrence_max_weeks));

        Self {
            booking: AppointmentBookingService::new(repository.clone(), conflict, validator),
            availability,
            numbering: PackageNumberingService::new(repository.clone(), settings.package_grouping),
            classes: GroupClassService::new(repository, recurrence, settings.class_capacity),
        }
    }
}

fn class_slot(date: NaiveDate, time: &str) -> Result<Slot, AppError> {
    Ok(Slot::new(date, AppointmentValidator::parse_time(time)?))
}

// ==============================================================================
// AVAILABILITY HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_specialist_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let services = SchedulingServices::for_request(&state, auth.token());

    let times = services.availability
        .availability(Resource::Specialist(query.specialist_id), query.date, query.exclude_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "specialist_id": query.specialist_id,
        "date": query.date,
        "times": times
    })))
}

#[axum::debug_handler]
pub async fn get_available_rooms(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<RoomAvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let rooms = query.room_ids
        .split(',')
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(|raw| Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid room id '{}'", raw))))
        .collect::<Result<Vec<Uuid>, AppError>>()?;

    let services = SchedulingServices::for_request(&state, auth.token());
    let available = services.booking
        .available_rooms(query.date, &query.time, &rooms, query.editing_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "available_rooms": available
    })))
}

// ==============================================================================
// SINGLE APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(draft): Json<AppointmentDraft>,
) -> Result<Json<Value>, AppError> {
    let services = SchedulingServices::for_request(&state, auth.token());
    let appointment = services.booking.book_appointment(draft).await?;
    info!("User {} booked appointment {}", user.id, appointment.id);

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked"
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let services = SchedulingServices::for_request(&state, auth.token());
    let appointment = services.booking.get_appointment(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(edit): Json<AppointmentEdit>,
) -> Result<Json<Value>, AppError> {
    let services = SchedulingServices::for_request(&state, auth.token());
    let appointment = services.booking.update_appointment(appointment_id, edit).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment updated"
    })))
}

#[axum::debug_handler]
pub async fn move_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<MoveRequest>,
) -> Result<Json<Value>, AppError> {
    let services = SchedulingServices::for_request(&state, auth.token());
    let appointment = services.booking.reschedule_appointment(appointment_id, request).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment moved"
    })))
}

#[axum::debug_handler]
pub async fn change_appointment_status(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<StatusChangeRequest>,
) -> Result<Json<Value>, AppError> {
    let services = SchedulingServices::for_request(&state, auth.token());
    let appointment = services.booking.change_status(appointment_id, request.status).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn delete_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let services = SchedulingServices::for_request(&state, auth.token());
    services.booking.delete_appointment(appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment deleted"
    })))
}

#[axum::debug_handler]
pub async fn get_patient_packages(
    State(state): State<Arc<AppConfig>>,
    Path(patient_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let services = SchedulingServices::for_request(&state, auth.token());
    let timeline = services.numbering.package_timeline(patient_id).await?;

    let labels: Vec<Value> = timeline.iter()
        .map(|(appointment, label)| json!({
            "appointment_id": label.appointment_id,
            "date": appointment.date,
            "time": appointment.time.format("%H:%M").to_string(),
            "treatment_group_id": appointment.treatment_group_id,
            "position": label.position,
            "total": label.total,
            "label": label.to_string()
        }))
        .collect();

    Ok(Json(json!({
        "success": true,
        "patient_id": patient_id,
        "labels": labels
    })))
}

// ==============================================================================
// GROUP CLASS HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_classes(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<ClassesQuery>,
) -> Result<Json<Value>, AppError> {
    let services = SchedulingServices::for_request(&state, auth.token());
    let classes = services.classes.classes_on(query.date).await?;

    let classes: Vec<Value> = classes.iter()
        .map(|class| json!({
            "date": class.slot.date,
            "time": class.slot.time.format("%H:%M").to_string(),
            "has_conflict": class.has_specialist_conflict(),
            "specialists": class.specialists(),
            "participants": class.participants(),
            "difficulty": class.difficulty(),
            "appointments": class.appointments
        }))
        .collect();

    Ok(Json(json!({
        "success": true,
        "date": query.date,
        "classes": classes
    })))
}

#[axum::debug_handler]
pub async fn resolve_class_conflict(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ResolveClassRequest>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;

    let slot = class_slot(request.date, &request.time)?;
    let services = SchedulingServices::for_request(&state, auth.token());
    let report = services.classes
        .resolve(&user, slot, request.specialist_id, request.difficulty)
        .await?;

    Ok(Json(json!({
        "success": report.is_complete(),
        "report": report,
        "message": if report.is_complete() {
            "Class conflict resolved"
        } else {
            "Resolution stopped; applied changes were rolled back where possible"
        }
    })))
}

#[axum::debug_handler]
pub async fn save_class_participants(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<SaveParticipantsRequest>,
) -> Result<Json<Value>, AppError> {
    let slot = class_slot(request.date, &request.time)?;
    let services = SchedulingServices::for_request(&state, auth.token());

    let mut roster = services.classes.open_roster(slot).await?;
    roster.set_specialist(request.specialist_id);
    if let Some(difficulty) = request.difficulty {
        roster.set_difficulty(difficulty);
    }

    let leaving: Vec<Uuid> = roster.participants().iter()
        .filter(|patient_id| !request.patient_ids.contains(patient_id))
        .copied()
        .collect();
    for patient_id in leaving {
        roster.remove(patient_id);
    }
    for patient_id in &request.patient_ids {
        if !roster.participants().contains(patient_id) {
            roster.add(*patient_id)?;
        }
    }

    let report = services.classes.save(&roster).await?;

    Ok(Json(json!({
        "success": report.failures.is_empty(),
        "success_count": report.success_count(),
        "fail_count": report.fail_count(),
        "report": report
    })))
}

#[axum::debug_handler]
pub async fn delete_class(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<ClassSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let slot = class_slot(request.date, &request.time)?;
    let services = SchedulingServices::for_request(&state, auth.token());
    let report = services.classes.delete_class(slot).await?;

    Ok(Json(json!({
        "success": report.failures.is_empty(),
        "success_count": report.success_count(),
        "fail_count": report.fail_count(),
        "report": report
    })))
}

#[axum::debug_handler]
pub async fn repeat_class(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<RepeatClassRequest>,
) -> Result<Json<Value>, AppError> {
    let slot = class_slot(request.date, &request.time)?;
    let services = SchedulingServices::for_request(&state, auth.token());
    let outcome = services.classes
        .repeat_class(slot, &request.weekdays, request.weeks)
        .await?;

    Ok(Json(json!({
        "success": outcome.is_complete(),
        "success_count": outcome.success_count(),
        "fail_count": outcome.fail_count(),
        "created": outcome.created,
        "failures": outcome.failures
    })))
}
