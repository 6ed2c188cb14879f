#![allow(dead_code)]

use std::sync::Arc;

use appointment_cell::{AppointmentLifecycleCoordinator, BookAppointmentRequest, CalendarService};
use chrono::{DateTime, Utc};
use reminder_cell::{LoggingSender, NotificationDispatcher, ReminderPlanner, ReminderSpec};
use shared_models::NotificationChannel;
use shared_utils::test_utils::{TestClinic, TestConfig};

pub struct BookingHarness {
    pub clinic: TestClinic,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub coordinator: Arc<AppointmentLifecycleCoordinator>,
    pub calendar: CalendarService,
}

impl BookingHarness {
    pub async fn new() -> Self {
        let clinic = TestClinic::seeded().await;
        let config = TestConfig::default().to_app_config();

        let dispatcher = Arc::new(
            NotificationDispatcher::new(clinic.store.clone(), &config)
                .with_sender(Arc::new(LoggingSender::new(NotificationChannel::Email)))
                .with_sender(Arc::new(LoggingSender::new(NotificationChannel::Sms))),
        );
        let planner = Arc::new(ReminderPlanner::new(clinic.store.clone(), dispatcher.clone()));
        let coordinator = Arc::new(AppointmentLifecycleCoordinator::new(
            clinic.store.clone(),
            planner,
            &config,
        ));
        let calendar = CalendarService::new(clinic.store.clone());

        Self {
            clinic,
            dispatcher,
            coordinator,
            calendar,
        }
    }

    pub fn request(&self, time: DateTime<Utc>) -> BookAppointmentRequest {
        BookAppointmentRequest {
            practitioner_id: self.clinic.practitioner.id,
            client_id: self.clinic.client.id,
            appointment_time: time,
            notes: None,
            reminders: Vec::new(),
        }
    }

    pub fn request_with(&self, time: DateTime<Utc>, reminders: Vec<ReminderSpec>) -> BookAppointmentRequest {
        BookAppointmentRequest {
            reminders,
            ..self.request(time)
        }
    }
}
