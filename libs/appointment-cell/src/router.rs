// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put, patch},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    // Every scheduling operation requires an authenticated staff member
    let protected_routes = Router::new()
        // Availability
        .route("/availability", get(handlers::get_specialist_availability))
        .route("/rooms/available", get(handlers::get_available_rooms))

        // Single appointments
        .route("/", post(handlers::book_appointment))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment)
                .put(handlers::update_appointment)
                .delete(handlers::delete_appointment),
        )
        .route("/{appointment_id}/move", patch(handlers::move_appointment))
        .route("/{appointment_id}/status", post(handlers::change_appointment_status))

        // Package numbering
        .route("/patients/{patient_id}/packages", get(handlers::get_patient_packages))

        // Group classes
        .route("/classes", get(handlers::get_classes))
        .route("/classes/resolve", post(handlers::resolve_class_conflict)) // Admin only
        .route("/classes/participants", put(handlers::save_class_participants))
        .route("/classes/delete", post(handlers::delete_class))
        .route("/classes/repeat", post(handlers::repeat_class))

        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
