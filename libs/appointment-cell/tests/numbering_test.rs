mod common;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use appointment_cell::models::*;
use appointment_cell::repository::InMemoryAppointmentRepository;
use appointment_cell::services::{package_labels, PackageLabelCache, PackageNumberingService};
use appointment_cell::store::{AppointmentStore, StoreCommand};
use shared_config::PackageGrouping;

use common::*;

fn package(patient_id: Uuid, group: Uuid, dates: &[(u32, u32)]) -> Vec<Appointment> {
    dates.iter()
        .map(|(day, hour)| {
            let mut a = appointment(Uuid::new_v4(), ymd(2026, 4, *day), hm(*hour, 0));
            a.patient_id = patient_id;
            a.treatment_group_id = Some(group);
            a
        })
        .collect()
}

#[test]
fn test_three_visits_numbered_by_date() {
    let patient = Uuid::new_v4();
    // Deliberately out of order
    let visits = package(patient, Uuid::new_v4(), &[(20, 9), (6, 9), (13, 9)]);

    let labels = package_labels(&visits, PackageGrouping::TreatmentGroup);

    let rendered: Vec<String> = [&visits[1], &visits[2], &visits[0]]
        .iter()
        .map(|a| labels[&a.id].to_string())
        .collect();
    assert_eq!(rendered, vec!["1/3", "2/3", "3/3"]);
}

#[test]
fn test_lone_visit_has_no_label() {
    let patient = Uuid::new_v4();
    let mut visits = package(patient, Uuid::new_v4(), &[(6, 9)]);
    visits.push(appointment(Uuid::new_v4(), ymd(2026, 4, 7), hm(9, 0)));

    assert!(package_labels(&visits, PackageGrouping::TreatmentGroup).is_empty());
}

#[test]
fn test_cancelled_visits_neither_numbered_nor_counted() {
    let patient = Uuid::new_v4();
    let mut visits = package(patient, Uuid::new_v4(), &[(6, 9), (8, 9), (13, 9), (15, 9)]);
    visits[1].status = AppointmentStatus::Cancelled;

    let labels = package_labels(&visits, PackageGrouping::TreatmentGroup);

    assert!(!labels.contains_key(&visits[1].id));
    assert_eq!(labels[&visits[0].id].to_string(), "1/3");
    assert_eq!(labels[&visits[2].id].to_string(), "2/3");
    assert_eq!(labels[&visits[3].id].to_string(), "3/3");
}

#[test]
fn test_same_day_visits_ordered_by_time() {
    let patient = Uuid::new_v4();
    let visits = package(patient, Uuid::new_v4(), &[(6, 15), (6, 9)]);

    let labels = package_labels(&visits, PackageGrouping::TreatmentGroup);

    assert_eq!(labels[&visits[1].id].position, 1);
    assert_eq!(labels[&visits[0].id].position, 2);
}

#[test]
fn test_legacy_grouping_keys_on_specialty() {
    let patient = Uuid::new_v4();
    let specialty = Uuid::new_v4();
    let mut visits = package(patient, Uuid::new_v4(), &[(6, 9)]);
    visits.extend(package(patient, Uuid::new_v4(), &[(9, 9)]));
    for visit in &mut visits {
        visit.specialty_id = specialty;
    }

    assert!(package_labels(&visits, PackageGrouping::TreatmentGroup).is_empty());

    let legacy = package_labels(&visits, PackageGrouping::Specialty);
    assert_eq!(legacy[&visits[0].id].to_string(), "1/2");
    assert_eq!(legacy[&visits[1].id].to_string(), "2/2");
}

#[tokio::test]
async fn test_service_numbers_the_full_history() {
    let patient = Uuid::new_v4();
    let group = Uuid::new_v4();
    let mut visits = package(patient, group, &[(6, 9), (13, 9)]);
    // A visit months earlier still counts
    let mut old = appointment(Uuid::new_v4(), ymd(2025, 11, 3), hm(9, 0));
    old.patient_id = patient;
    old.treatment_group_id = Some(group);
    old.status = AppointmentStatus::Attended;
    visits.push(old.clone());

    let repository = Arc::new(InMemoryAppointmentRepository::new(4));
    repository.seed(visits.clone()).await;
    let service = PackageNumberingService::new(repository, PackageGrouping::TreatmentGroup);

    let labels = service.labels_for_patient(patient).await.unwrap();

    assert_eq!(labels[&old.id].to_string(), "1/3");
    assert_eq!(labels[&visits[1].id].to_string(), "3/3");
}

#[tokio::test]
async fn test_cache_drops_patient_entry_on_store_change() {
    let patient = Uuid::new_v4();
    let other_patient = Uuid::new_v4();
    let visits = package(patient, Uuid::new_v4(), &[(6, 9), (13, 9)]);
    let repository = Arc::new(InMemoryAppointmentRepository::new(4));
    repository.seed(visits.clone()).await;

    let cache = PackageLabelCache::new(Arc::new(PackageNumberingService::new(
        repository,
        PackageGrouping::TreatmentGroup,
    )));
    let store = AppointmentStore::new();
    let watcher = cache.watch(&store);

    cache.labels(patient).await.unwrap();
    cache.labels(other_patient).await.unwrap();
    assert!(cache.is_cached(patient).await);

    store.apply(StoreCommand::Upsert(visits[0].clone())).await.unwrap();

    let mut dropped = false;
    for _ in 0..50 {
        if !cache.is_cached(patient).await {
            dropped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(dropped, "cache entry was not invalidated");
    assert!(cache.is_cached(other_patient).await);

    watcher.abort();
}

#[tokio::test]
async fn test_timeline_interleaves_packages_by_visit() {
    let patient = Uuid::new_v4();
    let massage = package(patient, Uuid::new_v4(), &[(6, 9), (13, 9), (20, 9)]);
    let physio = package(patient, Uuid::new_v4(), &[(8, 11), (15, 11)]);
    let repository = Arc::new(InMemoryAppointmentRepository::new(4));
    repository.seed(massage.iter().chain(&physio).cloned()).await;
    let service = PackageNumberingService::new(repository, PackageGrouping::TreatmentGroup);

    let timeline = service.package_timeline(patient).await.unwrap();

    let order: Vec<Uuid> = timeline.iter().map(|(a, _)| a.id).collect();
    assert_eq!(order, vec![massage[0].id, physio[0].id, massage[1].id, physio[1].id, massage[2].id]);
    let rendered: Vec<String> = timeline.iter().map(|(_, label)| label.to_string()).collect();
    assert_eq!(rendered, vec!["1/3", "1/2", "2/3", "2/2", "3/3"]);
}

#[tokio::test]
async fn test_cache_drops_previous_patient_when_row_changes_hands() {
    let patient = Uuid::new_v4();
    let visits = package(patient, Uuid::new_v4(), &[(6, 9), (13, 9)]);
    let repository = Arc::new(InMemoryAppointmentRepository::new(4));
    repository.seed(visits.clone()).await;

    let cache = PackageLabelCache::new(Arc::new(PackageNumberingService::new(
        repository,
        PackageGrouping::TreatmentGroup,
    )));
    let store = AppointmentStore::new();
    store.apply(StoreCommand::Load(visits.clone())).await.unwrap();
    let watcher = cache.watch(&store);

    let new_patient = Uuid::new_v4();
    cache.labels(patient).await.unwrap();
    cache.labels(new_patient).await.unwrap();

    let mut reassigned = visits[1].clone();
    reassigned.patient_id = new_patient;
    store.apply(StoreCommand::Upsert(reassigned)).await.unwrap();

    let mut dropped = false;
    for _ in 0..50 {
        if !cache.is_cached(patient).await && !cache.is_cached(new_patient).await {
            dropped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(dropped, "both patients' entries should be invalidated");

    watcher.abort();
}
