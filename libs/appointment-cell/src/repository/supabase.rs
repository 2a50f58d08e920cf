use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentPatch, BatchFailure, BatchOutcome, NewAppointment, SchedulingError,
};

use super::AppointmentRepository;

const TABLE: &str = "/rest/v1/appointments";

/// PostgREST-backed repository. Write-time overlap enforcement comes from the
/// table's exclusion constraints, which PostgREST reports as 409.
pub struct SupabaseAppointmentRepository {
    supabase: Arc<SupabaseClient>,
    auth_token: String,
    batch_concurrency: usize,
}

impl SupabaseAppointmentRepository {
    pub fn new(supabase: Arc<SupabaseClient>, auth_token: impl Into<String>, batch_concurrency: usize) -> Self {
        Self {
            supabase,
            auth_token: auth_token.into(),
            batch_concurrency: batch_concurrency.max(1),
        }
    }

    fn representation() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    async fn select(&self, query: String) -> Result<Vec<Appointment>, SchedulingError> {
        let path = format!("{}?{}", TABLE, query);
        self.supabase
            .request::<Vec<Appointment>>(Method::GET, &path, Some(&self.auth_token), None)
            .await
            .map_err(|e| map_error("Failed to fetch appointments", e))
    }

    async fn write(&self, method: Method, path: &str, body: Value) -> Result<Appointment, SchedulingError> {
        let rows: Vec<Appointment> = self.supabase
            .request_with_headers(method, path, Some(&self.auth_token), Some(body), Some(Self::representation()))
            .await
            .map_err(|e| map_error("Failed to write appointment", e))?;

        rows.into_iter().next().ok_or(SchedulingError::NotFound)
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, SchedulingError> {
    serde_json::to_value(value)
        .map_err(|e| SchedulingError::Database(format!("Failed to encode appointment: {}", e)))
}

fn map_error(context: &str, error: anyhow::Error) -> SchedulingError {
    match SupabaseClient::api_error(&error) {
        Some(api) if api.is_conflict() => SchedulingError::SlotTaken(api.message.clone()),
        Some(api) if api.is_not_found() => SchedulingError::NotFound,
        _ => SchedulingError::Database(format!("{}: {}", context, error)),
    }
}

#[async_trait]
impl AppointmentRepository for SupabaseAppointmentRepository {
    async fn specialist_day(&self, specialist_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError> {
        debug!("Fetching appointments of specialist {} on {}", specialist_id, date);
        self.select(format!(
            "specialist_id=eq.{}&date=eq.{}&status=neq.cancelled&order=time.asc",
            specialist_id, date
        ))
        .await
    }

    async fn day(&self, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError> {
        debug!("Fetching all appointments on {}", date);
        self.select(format!("date=eq.{}&status=neq.cancelled&order=time.asc,id.asc", date)).await
    }

    async fn patient_history(&self, patient_id: Uuid) -> Result<Vec<Appointment>, SchedulingError> {
        self.select(format!("patient_id=eq.{}&order=date.asc,time.asc,id.asc", patient_id)).await
    }

    async fn get(&self, id: Uuid) -> Result<Appointment, SchedulingError> {
        self.select(format!("id=eq.{}", id))
            .await?
            .into_iter()
            .next()
            .ok_or(SchedulingError::NotFound)
    }

    async fn create(&self, appointment: NewAppointment) -> Result<Appointment, SchedulingError> {
        let body = to_body(&appointment)?;
        let created = self.write(Method::POST, TABLE, body).await?;
        info!("Appointment {} created for {}", created.id, created.slot());
        Ok(created)
    }

    async fn update(&self, id: Uuid, patch: AppointmentPatch) -> Result<Appointment, SchedulingError> {
        let path = format!("{}?id=eq.{}", TABLE, id);
        let updated = self.write(Method::PATCH, &path, to_body(&patch)?).await?;
        debug!("Appointment {} updated", id);
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<(), SchedulingError> {
        let path = format!("{}?id=eq.{}", TABLE, id);
        let deleted: Vec<Appointment> = self.supabase
            .request_with_headers(Method::DELETE, &path, Some(&self.auth_token), None, Some(Self::representation()))
            .await
            .map_err(|e| map_error("Failed to delete appointment", e))?;

        if deleted.is_empty() {
            return Err(SchedulingError::NotFound);
        }
        Ok(())
    }

    /// Inserts run independently, a few at a time, so one rejected row does not
    /// sink the rest.
    async fn create_batch(&self, items: Vec<NewAppointment>) -> Result<BatchOutcome, SchedulingError> {
        let total = items.len();
        let mut results: Vec<(usize, NewAppointment, Result<Appointment, SchedulingError>)> =
            stream::iter(items.into_iter().enumerate())
                .map(|(index, item)| async move {
                    let result = self.create(item.clone()).await;
                    (index, item, result)
                })
                .buffer_unordered(self.batch_concurrency)
                .collect()
                .await;

        results.sort_by_key(|(index, _, _)| *index);

        let mut outcome = BatchOutcome::default();
        for (index, item, result) in results {
            match result {
                Ok(created) => outcome.created.push(created),
                Err(e) => {
                    warn!("Batch item {} ({} for patient {}) failed: {}", index, item.slot(), item.patient_id, e);
                    outcome.failures.push(BatchFailure {
                        index,
                        slot: item.slot(),
                        patient_id: item.patient_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("Batch create: {} of {} succeeded", outcome.success_count(), total);
        Ok(outcome)
    }
}
