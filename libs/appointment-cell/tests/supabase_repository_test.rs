mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::*;
use appointment_cell::repository::{AppointmentRepository, SupabaseAppointmentRepository};
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

use common::*;

fn repository(mock_server: &MockServer) -> SupabaseAppointmentRepository {
    let config = TestConfig {
        supabase_url: mock_server.uri(),
        ..Default::default()
    };
    let client = Arc::new(SupabaseClient::new(&config.to_app_config()));
    SupabaseAppointmentRepository::new(client, "test-token", 2)
}

fn new_appointment(specialist_id: Uuid, patient_id: Uuid) -> NewAppointment {
    let template = appointment(specialist_id, wednesday(), hm(10, 0));
    NewAppointment::from_template(&template, patient_id, template.slot())
}

#[tokio::test]
async fn test_specialist_day_filters_and_decodes_rows() {
    let mock_server = MockServer::start().await;
    let specialist = Uuid::new_v4();
    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("specialist_id", format!("eq.{}", specialist)))
        .and(query_param("date", "eq.2026-03-04"))
        .and(query_param("status", "neq.cancelled"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(id, Uuid::new_v4(), specialist, "2026-03-04", "10:15:00")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let rows = repository(&mock_server).specialist_day(specialist, wednesday()).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, id);
    assert_eq!(rows[0].time, hm(10, 15));
    assert_eq!(rows[0].status, AppointmentStatus::Scheduled);
}

#[tokio::test]
async fn test_conflict_status_maps_to_slot_taken() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::error_response(
            "conflicting key value violates exclusion constraint \"appointments_specialist_no_overlap\"",
            "23P01",
        )))
        .mount(&mock_server)
        .await;

    let result = repository(&mock_server)
        .create(new_appointment(Uuid::new_v4(), Uuid::new_v4()))
        .await;

    assert_matches!(result, Err(SchedulingError::SlotTaken(message)) if message.contains("exclusion constraint"));
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    assert_matches!(repository(&mock_server).get(Uuid::new_v4()).await, Err(SchedulingError::NotFound));
}

#[tokio::test]
async fn test_server_error_is_a_database_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream unavailable"))
        .mount(&mock_server)
        .await;

    assert_matches!(
        repository(&mock_server).day(wednesday()).await,
        Err(SchedulingError::Database(message)) if message.contains("upstream unavailable")
    );
}

#[tokio::test]
async fn test_update_asks_for_the_stored_row() {
    let mock_server = MockServer::start().await;
    let id = Uuid::new_v4();
    let specialist = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({ "date": "2026-03-05", "time": "11:30" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_row(id, Uuid::new_v4(), specialist, "2026-03-05", "11:30:00")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let updated = repository(&mock_server)
        .update(id, AppointmentPatch::reschedule(Slot::new(ymd(2026, 3, 5), hm(11, 30))))
        .await
        .unwrap();

    assert_eq!(updated.slot(), Slot::new(ymd(2026, 3, 5), hm(11, 30)));
}

#[tokio::test]
async fn test_delete_of_missing_row_is_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    assert_matches!(repository(&mock_server).delete(Uuid::new_v4()).await, Err(SchedulingError::NotFound));
}

#[tokio::test]
async fn test_batch_reports_each_rejected_item() {
    let mock_server = MockServer::start().await;
    let specialist = Uuid::new_v4();
    let rejected_patient = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({ "patient_id": rejected_patient })))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate key value"))
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_row(Uuid::new_v4(), Uuid::new_v4(), specialist, "2026-03-04", "10:00:00")
        ])))
        .mount(&mock_server)
        .await;

    let items = vec![
        new_appointment(specialist, Uuid::new_v4()),
        new_appointment(specialist, rejected_patient),
        new_appointment(specialist, Uuid::new_v4()),
    ];

    let outcome = repository(&mock_server).create_batch(items).await.unwrap();

    assert_eq!(outcome.success_count(), 2);
    assert_eq!(outcome.fail_count(), 1);
    assert_eq!(outcome.failures[0].index, 1);
    assert_eq!(outcome.failures[0].patient_id, rejected_patient);
    assert!(outcome.failures[0].reason.contains("Slot already taken"));
}
