use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use shared_models::{
    Appointment, Client, NotificationLog, Practitioner, Reminder, ReminderRule, ReminderStatus,
};

/// Record store consumed by the booking and reminder cells.
///
/// Each method is atomic on its own. Multi-step units (check-then-insert,
/// cancel-then-delete) are serialized by the callers.
#[async_trait]
pub trait ClinicStore: Send + Sync {
    // Clients and practitioners
    async fn save_client(&self, client: &Client) -> Result<()>;
    async fn find_client(&self, id: Uuid) -> Result<Option<Client>>;
    async fn save_practitioner(&self, practitioner: &Practitioner) -> Result<()>;
    async fn find_practitioner(&self, id: Uuid) -> Result<Option<Practitioner>>;

    // Appointments
    async fn save_appointment(&self, appointment: &Appointment) -> Result<()>;
    async fn find_appointment(&self, id: Uuid) -> Result<Option<Appointment>>;

    /// Removes the appointment together with its reminder rows.
    /// Notification logs are history and stay.
    async fn delete_appointment(&self, id: Uuid) -> Result<bool>;

    /// Appointments of one practitioner whose start lies in `[from, to]`,
    /// any status, ordered by start time.
    async fn practitioner_appointments_between(
        &self,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>>;

    /// All appointments starting in `[from, to)`, ordered by start time.
    async fn appointments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>>;

    // Reminder rules
    async fn save_rule(&self, rule: &ReminderRule) -> Result<()>;
    async fn find_rule(&self, id: Uuid) -> Result<Option<ReminderRule>>;
    async fn find_rules(&self, ids: &[Uuid]) -> Result<Vec<ReminderRule>>;
    async fn active_rules(&self) -> Result<Vec<ReminderRule>>;
    async fn delete_rule(&self, id: Uuid) -> Result<bool>;
    async fn rule_name_taken(&self, name: &str, exclude_id: Option<Uuid>) -> Result<bool>;

    // Reminders
    async fn save_reminder(&self, reminder: &Reminder) -> Result<()>;
    async fn find_reminder(&self, id: Uuid) -> Result<Option<Reminder>>;
    async fn reminders_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<Reminder>>;

    /// `Pending` reminders with `scheduled_time <= now`, oldest first.
    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>>;

    /// Compare-and-set from `Pending` to `to`. Returns `false` without
    /// touching the row when the reminder is missing or already terminal.
    async fn transition_reminder(
        &self,
        id: Uuid,
        to: ReminderStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    // Notification logs
    async fn append_notification_log(&self, log: &NotificationLog) -> Result<()>;
    async fn logs_for_reminder(&self, reminder_id: Uuid) -> Result<Vec<NotificationLog>>;
    async fn logs_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<NotificationLog>>;
}
