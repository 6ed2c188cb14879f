mod common;

use chrono::NaiveDate;

use common::BookingHarness;
use reminder_cell::{ReminderOption, ReminderSpec};
use shared_models::{ReminderKind, ReminderStatus};
use shared_utils::test_utils::at;

async fn seeded() -> BookingHarness {
    let harness = BookingHarness::new().await;
    let now = at(2025, 1, 8, 9, 0);

    for time in [at(2025, 1, 10, 9, 0), at(2025, 1, 10, 14, 0), at(2025, 1, 14, 9, 0), at(2025, 2, 3, 9, 0)] {
        harness
            .coordinator
            .book(
                harness.request_with(
                    time,
                    vec![ReminderSpec::ByOptions(vec![ReminderOption::Immediate, ReminderOption::OneDayBefore])],
                ),
                now,
            )
            .await
            .unwrap();
    }
    harness
}

#[tokio::test]
async fn test_day_view_carries_reminder_schedule() {
    let harness = seeded().await;

    let day = harness.calendar.day(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()).await;
    assert_eq!(day.len(), 2);
    assert_eq!(day[0].appointment.appointment_time, at(2025, 1, 10, 9, 0));

    let schedule = &day[0].reminders;
    assert_eq!(schedule.len(), 2);
    assert_eq!(schedule[0].kind, ReminderKind::Immediate);
    assert_eq!(schedule[0].status, ReminderStatus::Sent);
    assert_eq!(schedule[1].kind, ReminderKind::OneDayBefore);
    assert_eq!(schedule[1].scheduled_time, at(2025, 1, 9, 9, 0));
    assert_eq!(schedule[1].status, ReminderStatus::Pending);
}

#[tokio::test]
async fn test_week_and_month_views() {
    let harness = seeded().await;

    let week = harness.calendar.week(NaiveDate::from_ymd_opt(2025, 1, 8).unwrap()).await;
    assert_eq!(week.len(), 3);

    let january = harness.calendar.month(2025, 1).await;
    assert_eq!(january.len(), 3);
    let february = harness.calendar.month(2025, 2).await;
    assert_eq!(february.len(), 1);

    assert!(harness.calendar.month(2025, 13).await.is_empty());
}

#[tokio::test]
async fn test_range_is_half_open() {
    let harness = seeded().await;

    let range = harness.calendar.range(at(2025, 1, 10, 9, 0), at(2025, 1, 10, 14, 0)).await;
    assert_eq!(range.len(), 1);
}

#[tokio::test]
async fn test_upcoming_lists_scheduled_only() {
    let harness = seeded().await;
    let now = at(2025, 1, 9, 0, 0);

    let day = harness.calendar.day(NaiveDate::from_ymd_opt(2025, 1, 14).unwrap()).await;
    harness.coordinator.cancel(day[0].appointment.id, now).await.unwrap();

    let upcoming = harness.calendar.upcoming(now).await;
    let times: Vec<_> = upcoming.iter().map(|e| e.appointment.appointment_time).collect();
    assert_eq!(times, vec![at(2025, 1, 10, 9, 0), at(2025, 1, 10, 14, 0), at(2025, 2, 3, 9, 0)]);
}

#[tokio::test]
async fn test_store_outage_degrades_to_empty() {
    let harness = seeded().await;

    harness.clinic.store.set_unavailable(true);
    let day = harness.calendar.day(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()).await;
    let upcoming = harness.calendar.upcoming(at(2025, 1, 9, 0, 0)).await;
    harness.clinic.store.set_unavailable(false);

    assert!(day.is_empty());
    assert!(upcoming.is_empty());
}
