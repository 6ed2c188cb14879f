mod common;

use assert_matches::assert_matches;
use std::sync::Arc;
use std::time::Duration;

use common::{Harness, RecordingSender};
use reminder_cell::{DeliveryError, NotificationDispatcher, ReminderError};
use shared_config::AppConfig;
use shared_database::ClinicStore;
use shared_models::{
    NotificationChannel, NotificationStatus, Reminder, ReminderKind, ReminderStatus,
};
use shared_utils::test_utils::{at, TestClinic};

async fn pending_reminder(harness: &Harness) -> Reminder {
    let appointment = harness.clinic.add_appointment(at(2025, 1, 10, 9, 0)).await;
    let reminder = Reminder::pending(
        appointment.id,
        None,
        ReminderKind::OneDayBefore,
        at(2025, 1, 9, 9, 0),
        at(2025, 1, 8, 9, 0),
    );
    harness.clinic.store.save_reminder(&reminder).await.unwrap();
    reminder
}

#[tokio::test]
async fn test_deliver_marks_sent() {
    let harness = Harness::new().await;
    let reminder = pending_reminder(&harness).await;

    let status = harness.dispatcher.deliver(reminder.id).await.unwrap();
    assert_eq!(status, Some(ReminderStatus::Sent));

    let stored = harness.clinic.store.find_reminder(reminder.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::Sent);
    assert!(stored.sent_at.is_some());

    let (_, message) = &harness.email.sent()[0];
    assert_eq!(message.subject, "Appointment Reminder - Test Client");
    assert!(message.body.contains("Reminder Type: 1 day before"));
    assert!(message.body.ends_with("Test Clinic"));
}

#[tokio::test]
async fn test_deliver_is_noop_for_terminal_reminder() {
    let harness = Harness::new().await;
    let reminder = pending_reminder(&harness).await;

    harness.dispatcher.deliver(reminder.id).await.unwrap();
    let again = harness.dispatcher.deliver(reminder.id).await.unwrap();

    assert_eq!(again, None);
    assert_eq!(harness.email.sent_count(), 1);
    assert_eq!(harness.dispatcher.history_for_reminder(reminder.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_partial_channel_failure_fails_reminder() {
    let harness = Harness::with_senders(
        RecordingSender::new(NotificationChannel::Email),
        RecordingSender::failing(NotificationChannel::Sms, "gateway rejected"),
    )
    .await;
    let reminder = pending_reminder(&harness).await;

    let status = harness.dispatcher.deliver(reminder.id).await.unwrap();
    assert_eq!(status, Some(ReminderStatus::Failed));

    let logs = harness.dispatcher.history_for_reminder(reminder.id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(
        logs.iter().filter(|log| log.status == NotificationStatus::Failed).count(),
        1
    );
}

#[tokio::test]
async fn test_missing_appointment_fails_reminder() {
    let harness = Harness::new().await;
    let orphan = Reminder::pending(
        uuid::Uuid::new_v4(),
        None,
        ReminderKind::Custom,
        at(2025, 1, 9, 9, 0),
        at(2025, 1, 8, 9, 0),
    );
    harness.clinic.store.save_reminder(&orphan).await.unwrap();

    let status = harness.dispatcher.deliver(orphan.id).await.unwrap();
    assert_eq!(status, Some(ReminderStatus::Failed));
    assert_eq!(harness.email.sent_count(), 0);
}

#[tokio::test]
async fn test_unknown_reminder_is_an_error() {
    let harness = Harness::new().await;
    let id = uuid::Uuid::new_v4();

    let result = harness.dispatcher.deliver(id).await;
    assert_matches!(result, Err(ReminderError::ReminderNotFound(missing)) if missing == id);
}

#[tokio::test]
async fn test_concurrent_deliveries_send_once() {
    let harness = Harness::with_senders(
        RecordingSender::slow(NotificationChannel::Email, Duration::from_millis(100)),
        RecordingSender::new(NotificationChannel::Sms),
    )
    .await;
    let reminder = pending_reminder(&harness).await;

    let (first, second) = futures::join!(
        harness.dispatcher.deliver(reminder.id),
        harness.dispatcher.deliver(reminder.id)
    );

    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|o| o.is_some());
    assert_eq!(outcomes, vec![None, Some(ReminderStatus::Sent)]);
    assert_eq!(harness.email.sent_count(), 1);
}

#[tokio::test]
async fn test_slow_channel_times_out() {
    let clinic = TestClinic::seeded().await;
    let config = AppConfig {
        notification_send_timeout_seconds: 1,
        ..AppConfig::default()
    };
    let dispatcher = NotificationDispatcher::new(clinic.store.clone(), &config).with_sender(Arc::new(
        RecordingSender::slow(NotificationChannel::Email, Duration::from_secs(5)),
    ));

    let appointment = clinic.add_appointment(at(2025, 1, 10, 9, 0)).await;
    let reminder = Reminder::pending(
        appointment.id,
        None,
        ReminderKind::TenMinutesBefore,
        at(2025, 1, 10, 8, 50),
        at(2025, 1, 8, 9, 0),
    );
    clinic.store.save_reminder(&reminder).await.unwrap();

    let status = dispatcher.deliver(reminder.id).await.unwrap();
    assert_eq!(status, Some(ReminderStatus::Failed));

    let logs = dispatcher.history_for_reminder(reminder.id).await.unwrap();
    let email = logs
        .iter()
        .find(|log| log.channel == NotificationChannel::Email)
        .unwrap();
    assert!(email.error_message.as_deref().unwrap().contains("timed out"));
    // SMS has no sender registered here.
    let sms = logs.iter().find(|log| log.channel == NotificationChannel::Sms).unwrap();
    assert!(sms.error_message.as_deref().unwrap().contains("No sender configured"));
}

#[tokio::test]
async fn test_send_test_email() {
    let harness = Harness::new().await;
    harness
        .dispatcher
        .send_test_email("staff@example.com", "SMTP check", "It works")
        .await
        .unwrap();

    let (recipient, message) = &harness.email.sent()[0];
    assert_eq!(recipient, "staff@example.com");
    assert_eq!(message.subject, "SMTP check");

    let store = harness.clinic.store.clone();
    let bare = NotificationDispatcher::new(store, &AppConfig::default());
    assert_matches!(
        bare.send_test_email("staff@example.com", "SMTP check", "It works").await,
        Err(DeliveryError::NotConfigured(NotificationChannel::Email))
    );
}
