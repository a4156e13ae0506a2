use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime, Weekday};
use tokio_test::{assert_err, assert_ok};

use doctor_cell::*;
use shared_models::{AppointmentId, DoctorId};

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn weekday_doctor(id: &str, department: &str) -> Doctor {
    let hours = DayHours::new(t(9, 0), t(12, 0), 30);
    Doctor::new(id, format!("Dr. {}", id), department).with_working_hours(WorkingHours::uniform(
        &[Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
        hours,
    ))
}

async fn setup() -> (Arc<CalendarStore>, AvailabilityResolver) {
    let store = Arc::new(CalendarStore::new());
    store.register_doctor(weekday_doctor("dr-smith", "Cardiology")).await.unwrap();
    store.register_doctor(weekday_doctor("dr-jones", "Neurology")).await.unwrap();
    let resolver = AvailabilityResolver::new(Arc::clone(&store));
    (store, resolver)
}

#[tokio::test]
async fn test_availability_over_a_range_skips_weekend() {
    let (_store, resolver) = setup().await;

    // Friday through Monday
    let days = resolver
        .get_availability(&DoctorId::from("dr-smith"), date(2025, 1, 17), date(2025, 1, 20))
        .await
        .unwrap();

    assert_eq!(days.len(), 4);
    let counts: Vec<usize> = days.iter().map(|d| d.slots().count()).collect();
    assert_eq!(counts, vec![6, 0, 0, 6]);
}

#[tokio::test]
async fn test_unknown_doctor_and_inverted_range() {
    let (_store, resolver) = setup().await;

    let unknown = resolver
        .get_availability(&DoctorId::from("dr-nobody"), date(2025, 1, 15), date(2025, 1, 15))
        .await;
    assert_matches!(unknown, Err(CalendarError::UnknownDoctor(_)));

    let inverted = resolver
        .get_availability(&DoctorId::from("dr-smith"), date(2025, 1, 16), date(2025, 1, 15))
        .await;
    assert_matches!(inverted, Err(CalendarError::InvalidRange { .. }));
}

#[tokio::test]
async fn test_reservation_is_reflected_on_next_call_only() {
    let (store, resolver) = setup().await;
    let doctor_id = DoctorId::from("dr-smith");
    let day = date(2025, 1, 15);

    let before = resolver.slots_for_date(&doctor_id, day).await.unwrap();

    let appointment_id = AppointmentId::from("APT_TEST_0001");
    assert_ok!(store.reserve(&doctor_id, &appointment_id, Interval::from_minutes(day, t(10, 0), 30)).await);

    // The earlier sequence is a snapshot and still includes 10:00
    assert!(before.restart().any(|slot| slot.start_time == t(10, 0)));

    let after = resolver.slots_for_date(&doctor_id, day).await.unwrap();
    assert!(!after.restart().any(|slot| slot.start_time == t(10, 0)));
    assert_eq!(after.count(), 5);

    let excluding = resolver.slots_excluding(&doctor_id, day, Some(&appointment_id)).await.unwrap();
    assert_eq!(excluding.count(), 6);
}

#[tokio::test]
async fn test_overlapping_reservation_is_refused() {
    let (store, _resolver) = setup().await;
    let doctor_id = DoctorId::from("dr-smith");
    let day = date(2025, 1, 15);

    assert_ok!(store.reserve(&doctor_id, &AppointmentId::from("A"), Interval::from_minutes(day, t(10, 0), 30)).await);
    let second = store.reserve(&doctor_id, &AppointmentId::from("B"), Interval::from_minutes(day, t(10, 15), 30)).await;
    assert_matches!(second, Err(CalendarError::IntervalOccupied(_)));

    assert!(store.release(&doctor_id, &AppointmentId::from("A")).await.unwrap());
    assert_ok!(store.reserve(&doctor_id, &AppointmentId::from("B"), Interval::from_minutes(day, t(10, 15), 30)).await);
}

#[tokio::test]
async fn test_move_reservation_ignores_its_own_interval() {
    let (store, resolver) = setup().await;
    let doctor_id = DoctorId::from("dr-smith");
    let day = date(2025, 1, 15);
    let id = AppointmentId::from("A");

    store.reserve(&doctor_id, &id, Interval::from_minutes(day, t(10, 0), 30)).await.unwrap();
    store.reserve(&doctor_id, &AppointmentId::from("B"), Interval::from_minutes(day, t(11, 0), 30)).await.unwrap();

    // Sliding onto itself is fine, onto B is not
    assert_ok!(store.move_reservation(&doctor_id, &id, Interval::from_minutes(day, t(10, 15), 30)).await);
    assert_err!(store.move_reservation(&doctor_id, &id, Interval::from_minutes(day, t(11, 0), 30)).await);

    let starts: Vec<_> = resolver.slots_for_date(&doctor_id, day).await.unwrap().map(|s| s.start_time).collect();
    assert_eq!(starts, vec![t(9, 0), t(9, 30), t(11, 30)]);
}

#[tokio::test]
async fn test_blocked_interval_removes_slots_until_unblocked() {
    let (store, resolver) = setup().await;
    let doctor_id = DoctorId::from("dr-jones");
    let day = date(2025, 1, 15);

    let block = store
        .block_interval(&doctor_id, day, t(9, 0), t(10, 0), Some("Staff meeting".to_string()))
        .await
        .unwrap();
    assert_eq!(resolver.slots_for_date(&doctor_id, day).await.unwrap().count(), 4);
    assert_eq!(store.list_blocks(&doctor_id).await.unwrap().len(), 1);

    assert_ok!(store.unblock_interval(&doctor_id, block.id).await);
    assert_eq!(resolver.slots_for_date(&doctor_id, day).await.unwrap().count(), 6);

    let missing = store.unblock_interval(&doctor_id, block.id).await;
    assert_matches!(missing, Err(CalendarError::BlockNotFound(_)));
}

#[tokio::test]
async fn test_schedule_update_and_department_listing() {
    let (store, resolver) = setup().await;
    let doctor_id = DoctorId::from("dr-smith");
    let wednesday = date(2025, 1, 15);

    let updated = store
        .update_schedule(&doctor_id, Weekday::Wed, Some(DayHours::new(t(14, 0), t(16, 0), 20)))
        .await
        .unwrap();
    assert!(updated.works_on(wednesday));

    let slots: Vec<_> = resolver.slots_for_date(&doctor_id, wednesday).await.unwrap().collect();
    assert_eq!(slots.len(), 6);
    assert!(slots.iter().all(|slot| slot.duration_minutes == 20));

    store.update_schedule(&doctor_id, Weekday::Wed, None).await.unwrap();
    assert_eq!(resolver.slots_for_date(&doctor_id, wednesday).await.unwrap().count(), 0);

    let invalid = store
        .update_schedule(&doctor_id, Weekday::Wed, Some(DayHours::new(t(16, 0), t(14, 0), 20)))
        .await;
    assert_matches!(invalid, Err(CalendarError::InvalidSchedule(_)));

    let cardiology = store.list_doctors(Some("cardiology")).await;
    assert_eq!(cardiology.len(), 1);
    assert_eq!(cardiology[0].id, doctor_id);
    assert_eq!(store.list_doctors(None).await.len(), 2);

    let duplicate = store.register_doctor(weekday_doctor("dr-smith", "Cardiology")).await;
    assert_matches!(duplicate, Err(CalendarError::DuplicateDoctor(_)));
}
