mod common;

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use uuid::Uuid;

use appointment_cell::handlers::SchedulingServices;
use appointment_cell::models::*;
use appointment_cell::repository::{AppointmentRepository, InMemoryAppointmentRepository};
use appointment_cell::services::{GroupClassService, RecurrenceService};
use shared_config::SchedulingSettings;
use shared_utils::test_utils::TestUser;

use common::*;

fn evening() -> Slot {
    Slot::new(wednesday(), hm(18, 0))
}

/// Three members split between two specialists, as left behind by an
/// earlier partial edit.
fn split_class(x: Uuid, y: Uuid) -> Vec<Appointment> {
    vec![
        class_member(x, evening(), DifficultyLevel::Beginner),
        class_member(y, evening(), DifficultyLevel::Beginner),
        class_member(y, evening(), DifficultyLevel::Beginner),
    ]
}

async fn seeded(rows: Vec<Appointment>) -> (Arc<InMemoryAppointmentRepository>, SchedulingServices) {
    let repository = Arc::new(InMemoryAppointmentRepository::new(4));
    repository.seed(rows).await;
    let services = SchedulingServices::new(repository.clone(), early_monday_clock(), SchedulingSettings::default());
    (repository, services)
}

#[tokio::test]
async fn test_class_with_two_specialists_is_flagged() {
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    let (_, services) = seeded(split_class(x, y)).await;

    let classes = services.classes.classes_on(wednesday()).await.unwrap();

    assert_eq!(classes.len(), 1);
    assert!(classes[0].has_specialist_conflict());
    assert_eq!(classes[0].lead_specialist(), Some(y));
}

#[tokio::test]
async fn test_admin_resolution_reassigns_every_member() {
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    let (repository, services) = seeded(split_class(x, y)).await;
    let admin = TestUser::admin("admin@clinic.test").to_user();

    let report = services.classes.resolve(&admin, evening(), x, None).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.updated.len(), 2);
    let rows = repository.all().await;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|a| a.specialist_id == x));
    assert!(!services.classes.class_at(evening()).await.unwrap().has_specialist_conflict());
}

#[tokio::test]
async fn test_resolution_can_unify_difficulty() {
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    let mut rows = split_class(x, y);
    rows[0].difficulty = Some(DifficultyLevel::Advanced);
    let (repository, services) = seeded(rows).await;
    let admin = TestUser::admin("admin@clinic.test").to_user();

    let report = services.classes
        .resolve(&admin, evening(), y, Some(DifficultyLevel::Beginner))
        .await
        .unwrap();

    assert_eq!(report.updated.len(), 1);
    assert!(repository.all().await.iter().all(|a| a.specialist_id == y && a.difficulty == Some(DifficultyLevel::Beginner)));
}

#[tokio::test]
async fn test_non_admin_cannot_resolve() {
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    let rows = split_class(x, y);
    let (repository, services) = seeded(rows.clone()).await;
    let reception = TestUser::reception("front@clinic.test").to_user();

    let result = services.classes.resolve(&reception, evening(), x, None).await;

    assert_matches!(result, Err(SchedulingError::Forbidden(_)));
    assert_eq!(repository.all().await.iter().filter(|a| a.specialist_id == y).count(), 2);
}

#[tokio::test]
async fn test_failed_step_compensates_earlier_updates() {
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    let rows = split_class(x, y);
    let (second, third) = (rows[1].clone(), rows[2].clone());

    let patches: Arc<Mutex<Vec<(Uuid, AppointmentPatch)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut repository = MockRepository::new();
    let day = rows.clone();
    repository.expect_day().returning(move |_| Ok(day.clone()));

    let recorded = patches.clone();
    let second_row = second.clone();
    repository.expect_update()
        .withf(move |id, _| *id == second_row.id)
        .times(2)
        .returning({
            let second_row = second.clone();
            move |id, patch| {
                recorded.lock().unwrap().push((id, patch.clone()));
                let mut row = second_row.clone();
                patch.apply_to(&mut row);
                Ok(row)
            }
        });
    let third_id = third.id;
    repository.expect_update()
        .withf(move |id, _| *id == third_id)
        .times(1)
        .returning(|_, _| Err(SchedulingError::SlotTaken("specialist busy".to_string())));

    let repository: Arc<dyn AppointmentRepository> = Arc::new(repository);
    let recurrence = Arc::new(RecurrenceService::new(repository.clone(), early_monday_clock(), 26));
    let classes = GroupClassService::new(repository, recurrence, 4);
    let admin = TestUser::admin("admin@clinic.test").to_user();

    let report = classes.resolve(&admin, evening(), x, None).await.unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.failure.as_ref().and_then(|f| f.appointment_id), Some(third.id));
    assert_eq!(report.compensated, vec![second.id]);
    assert!(report.updated.is_empty());
    assert!(report.compensation_failures.is_empty());

    let patches = patches.lock().unwrap();
    assert_eq!(patches[0].1.specialist_id, Some(x));
    assert_eq!(patches[1].1.specialist_id, Some(y));
}

#[tokio::test]
async fn test_roster_save_applies_three_way_diff() {
    let specialist = Uuid::new_v4();
    let rows: Vec<Appointment> = (0..3)
        .map(|_| class_member(specialist, evening(), DifficultyLevel::Beginner))
        .collect();
    let leaving = rows[0].patient_id;
    let (repository, services) = seeded(rows).await;
    let newcomer = Uuid::new_v4();

    let mut roster = services.classes.open_roster(evening()).await.unwrap();
    roster.remove(leaving);
    roster.add(newcomer).unwrap();
    roster.set_difficulty(DifficultyLevel::Intermediate);

    let report = services.classes.save(&roster).await.unwrap();

    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.updated.len(), 2);
    assert_eq!(report.fail_count(), 0);

    let class = services.classes.class_at(evening()).await.unwrap();
    let participants = class.participants();
    assert_eq!(participants.len(), 3);
    assert!(participants.contains(&newcomer));
    assert!(!participants.contains(&leaving));
    assert!(class.appointments.iter().all(|a| a.difficulty == Some(DifficultyLevel::Intermediate)));
    assert_eq!(repository.all().await.len(), 3);
}

#[tokio::test]
async fn test_unchanged_roster_saves_nothing() {
    let specialist = Uuid::new_v4();
    let rows: Vec<Appointment> = (0..2)
        .map(|_| class_member(specialist, evening(), DifficultyLevel::Beginner))
        .collect();
    let (_, services) = seeded(rows).await;

    let roster = services.classes.open_roster(evening()).await.unwrap();
    let report = services.classes.save(&roster).await.unwrap();

    assert_eq!(report.success_count(), 0);
    assert_eq!(report.fail_count(), 0);
}

#[tokio::test]
async fn test_full_class_rejects_another_participant() {
    let specialist = Uuid::new_v4();
    let rows: Vec<Appointment> = (0..4)
        .map(|_| class_member(specialist, evening(), DifficultyLevel::Advanced))
        .collect();
    let existing = rows[2].patient_id;
    let (repository, services) = seeded(rows).await;

    let mut roster = services.classes.open_roster(evening()).await.unwrap();
    assert_matches!(roster.add(Uuid::new_v4()), Err(SchedulingError::ClassFull { capacity: 4, .. }));
    assert_matches!(roster.add(existing), Err(SchedulingError::DuplicateParticipant));

    // The write boundary enforces the same limit
    let template = repository.all().await[0].clone();
    let fifth = NewAppointment::from_template(&template, Uuid::new_v4(), evening());
    assert_matches!(repository.create(fifth).await, Err(SchedulingError::SlotTaken(_)));
}

#[tokio::test]
async fn test_delete_class_removes_every_member() {
    let specialist = Uuid::new_v4();
    let mut rows: Vec<Appointment> = (0..3)
        .map(|_| class_member(specialist, evening(), DifficultyLevel::Beginner))
        .collect();
    let unrelated = appointment(specialist, wednesday(), hm(9, 0));
    rows.push(unrelated.clone());
    let (repository, services) = seeded(rows).await;

    let report = services.classes.delete_class(evening()).await.unwrap();

    assert_eq!(report.removed.len(), 3);
    assert_eq!(repository.all().await, vec![unrelated]);
    assert_matches!(services.classes.class_at(evening()).await, Err(SchedulingError::NotFound));
}

#[tokio::test]
async fn test_repeat_uses_the_class_as_it_stands() {
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    let (_, services) = seeded(split_class(x, y)).await;

    let outcome = services.classes
        .repeat_class(evening(), &[WorkingDay::Friday], 1)
        .await
        .unwrap();

    assert_eq!(outcome.success_count(), 3);
    assert!(outcome.created.iter().all(|a| a.specialist_id == y && a.date == ymd(2026, 3, 6)));
}
