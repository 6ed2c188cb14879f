use std::sync::Arc;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{ClinicStore, MemoryStore};
use shared_models::{Appointment, Client, Practitioner, ReminderRule};

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_key: String,
    pub appointment_duration_minutes: i64,
    pub notification_send_timeout_seconds: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            supabase_service_key: "test-service-key".to_string(),
            appointment_duration_minutes: 30,
            notification_send_timeout_seconds: 2,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_service_key: self.supabase_service_key.clone(),
            appointment_duration_minutes: self.appointment_duration_minutes,
            notification_send_timeout_seconds: self.notification_send_timeout_seconds,
            smtp_host: "localhost".to_string(),
            smtp_from_address: "reminders@clinic.test".to_string(),
            clinic_name: "Test Clinic".to_string(),
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// UTC timestamp shorthand for fixtures.
pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid fixture time {year}-{month}-{day} {hour}:{minute}"))
}

/// A memory-backed clinic seeded with one practitioner and one client.
pub struct TestClinic {
    pub store: Arc<MemoryStore>,
    pub practitioner: Practitioner,
    pub client: Client,
}

impl TestClinic {
    pub async fn seeded() -> Self {
        let store = Arc::new(MemoryStore::new());
        let practitioner = Practitioner::new("Dr. Test", Some("General Dentistry"));
        let client = Client::new("Test Client", Some("+15550100"), Some("client@example.com"));

        store.save_practitioner(&practitioner).await.expect("seed practitioner");
        store.save_client(&client).await.expect("seed client");

        Self {
            store,
            practitioner,
            client,
        }
    }

    pub async fn add_practitioner(&self, name: &str) -> Practitioner {
        let practitioner = Practitioner::new(name, None);
        self.store.save_practitioner(&practitioner).await.expect("seed practitioner");
        practitioner
    }

    pub async fn add_client(&self, name: &str, phone: Option<&str>, email: Option<&str>) -> Client {
        let client = Client::new(name, phone, email);
        self.store.save_client(&client).await.expect("seed client");
        client
    }

    /// Stores an appointment directly, bypassing the booking workflow.
    pub async fn add_appointment(&self, time: DateTime<Utc>) -> Appointment {
        let appointment = Appointment::new(self.practitioner.id, self.client.id, time, None);
        self.store.save_appointment(&appointment).await.expect("seed appointment");
        appointment
    }

    pub async fn add_rule(&self, rule: ReminderRule) -> ReminderRule {
        self.store.save_rule(&rule).await.expect("seed rule");
        rule
    }
}

pub struct TestRules;

impl TestRules {
    fn base(name: &str) -> ReminderRule {
        ReminderRule {
            id: Uuid::new_v4(),
            name: name.to_string(),
            hours_before: None,
            minutes_before: None,
            is_instant: false,
            is_custom: false,
            custom_time: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn offset(name: &str, hours_before: Option<i64>, minutes_before: Option<i64>) -> ReminderRule {
        ReminderRule {
            hours_before,
            minutes_before,
            ..Self::base(name)
        }
    }

    pub fn instant(name: &str) -> ReminderRule {
        ReminderRule {
            is_instant: true,
            ..Self::base(name)
        }
    }

    pub fn custom(name: &str, custom_time: DateTime<Utc>) -> ReminderRule {
        ReminderRule {
            is_custom: true,
            custom_time: Some(custom_time),
            ..Self::base(name)
        }
    }

    pub fn inactive(name: &str, hours_before: i64) -> ReminderRule {
        ReminderRule {
            hours_before: Some(hours_before),
            is_active: false,
            ..Self::base(name)
        }
    }
}
