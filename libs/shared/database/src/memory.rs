use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_models::{
    Appointment, Client, NotificationLog, Practitioner, Reminder, ReminderRule, ReminderStatus,
};

use crate::store::ClinicStore;

#[derive(Default)]
struct Tables {
    clients: HashMap<Uuid, Client>,
    practitioners: HashMap<Uuid, Practitioner>,
    appointments: HashMap<Uuid, Appointment>,
    rules: HashMap<Uuid, ReminderRule>,
    reminders: HashMap<Uuid, Reminder>,
    logs: Vec<NotificationLog>,
}

/// In-process store. Every operation runs under one table lock, so each
/// call is a transaction of its own.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    reminder_writes_failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: while set, every call fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// While set, `save_reminder` fails and everything else works.
    pub fn set_reminder_writes_failing(&self, failing: bool) {
        self.reminder_writes_failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("record store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ClinicStore for MemoryStore {
    async fn save_client(&self, client: &Client) -> Result<()> {
        self.check_available()?;
        self.tables.write().await.clients.insert(client.id, client.clone());
        Ok(())
    }

    async fn find_client(&self, id: Uuid) -> Result<Option<Client>> {
        self.check_available()?;
        Ok(self.tables.read().await.clients.get(&id).cloned())
    }

    async fn save_practitioner(&self, practitioner: &Practitioner) -> Result<()> {
        self.check_available()?;
        self.tables
            .write()
            .await
            .practitioners
            .insert(practitioner.id, practitioner.clone());
        Ok(())
    }

    async fn find_practitioner(&self, id: Uuid) -> Result<Option<Practitioner>> {
        self.check_available()?;
        Ok(self.tables.read().await.practitioners.get(&id).cloned())
    }

    async fn save_appointment(&self, appointment: &Appointment) -> Result<()> {
        self.check_available()?;
        self.tables
            .write()
            .await
            .appointments
            .insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn find_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        self.check_available()?;
        Ok(self.tables.read().await.appointments.get(&id).cloned())
    }

    async fn delete_appointment(&self, id: Uuid) -> Result<bool> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let removed = tables.appointments.remove(&id).is_some();
        let before = tables.reminders.len();
        tables.reminders.retain(|_, reminder| reminder.appointment_id != id);
        debug!(
            "Deleted appointment {} with {} reminders",
            id,
            before - tables.reminders.len()
        );
        Ok(removed)
    }

    async fn practitioner_appointments_between(
        &self,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut appointments: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|apt| apt.practitioner_id == practitioner_id)
            .filter(|apt| apt.appointment_time >= from && apt.appointment_time <= to)
            .cloned()
            .collect();
        appointments.sort_by_key(|apt| apt.appointment_time);
        Ok(appointments)
    }

    async fn appointments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut appointments: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|apt| apt.appointment_time >= from && apt.appointment_time < to)
            .cloned()
            .collect();
        appointments.sort_by_key(|apt| apt.appointment_time);
        Ok(appointments)
    }

    async fn save_rule(&self, rule: &ReminderRule) -> Result<()> {
        self.check_available()?;
        self.tables.write().await.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn find_rule(&self, id: Uuid) -> Result<Option<ReminderRule>> {
        self.check_available()?;
        Ok(self.tables.read().await.rules.get(&id).cloned())
    }

    async fn find_rules(&self, ids: &[Uuid]) -> Result<Vec<ReminderRule>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(ids.iter().filter_map(|id| tables.rules.get(id).cloned()).collect())
    }

    async fn active_rules(&self) -> Result<Vec<ReminderRule>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut rules: Vec<ReminderRule> =
            tables.rules.values().filter(|rule| rule.is_active).cloned().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rules)
    }

    async fn delete_rule(&self, id: Uuid) -> Result<bool> {
        self.check_available()?;
        Ok(self.tables.write().await.rules.remove(&id).is_some())
    }

    async fn rule_name_taken(&self, name: &str, exclude_id: Option<Uuid>) -> Result<bool> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .rules
            .values()
            .any(|rule| rule.name == name && Some(rule.id) != exclude_id))
    }

    async fn save_reminder(&self, reminder: &Reminder) -> Result<()> {
        self.check_available()?;
        if self.reminder_writes_failing.load(Ordering::SeqCst) {
            return Err(anyhow!("reminder write rejected"));
        }
        self.tables
            .write()
            .await
            .reminders
            .insert(reminder.id, reminder.clone());
        Ok(())
    }

    async fn find_reminder(&self, id: Uuid) -> Result<Option<Reminder>> {
        self.check_available()?;
        Ok(self.tables.read().await.reminders.get(&id).cloned())
    }

    async fn reminders_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<Reminder>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut reminders: Vec<Reminder> = tables
            .reminders
            .values()
            .filter(|reminder| reminder.appointment_id == appointment_id)
            .cloned()
            .collect();
        reminders.sort_by_key(|reminder| reminder.scheduled_time);
        Ok(reminders)
    }

    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut due: Vec<Reminder> = tables
            .reminders
            .values()
            .filter(|reminder| reminder.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|reminder| reminder.scheduled_time);
        Ok(due)
    }

    async fn transition_reminder(
        &self,
        id: Uuid,
        to: ReminderStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        match tables.reminders.get_mut(&id) {
            Some(reminder) if reminder.status.can_transition_to(&to) => {
                reminder.status = to;
                reminder.sent_at = sent_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_notification_log(&self, log: &NotificationLog) -> Result<()> {
        self.check_available()?;
        self.tables.write().await.logs.push(log.clone());
        Ok(())
    }

    async fn logs_for_reminder(&self, reminder_id: Uuid) -> Result<Vec<NotificationLog>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut logs: Vec<NotificationLog> = tables
            .logs
            .iter()
            .filter(|log| log.reminder_id == reminder_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(logs)
    }

    async fn logs_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<NotificationLog>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut logs: Vec<NotificationLog> = tables
            .logs
            .iter()
            .filter(|log| log.appointment_id == appointment_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shared_models::ReminderKind;

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let reminder = Reminder::pending(Uuid::new_v4(), None, ReminderKind::Custom, now, now);
        store.save_reminder(&reminder).await.unwrap();

        assert!(store
            .transition_reminder(reminder.id, ReminderStatus::Sent, Some(now))
            .await
            .unwrap());
        assert!(!store
            .transition_reminder(reminder.id, ReminderStatus::Failed, None)
            .await
            .unwrap());

        let stored = store.find_reminder(reminder.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Sent);
        assert_eq!(stored.sent_at, Some(now));
    }

    #[tokio::test]
    async fn test_due_reminders_only_pending_and_past() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let appointment_id = Uuid::new_v4();

        let due = Reminder::pending(appointment_id, None, ReminderKind::Custom, now - Duration::minutes(5), now);
        let boundary = Reminder::pending(appointment_id, None, ReminderKind::Custom, now, now);
        let later = Reminder::pending(appointment_id, None, ReminderKind::Custom, now + Duration::minutes(5), now);
        let mut cancelled = Reminder::pending(appointment_id, None, ReminderKind::Custom, now - Duration::minutes(1), now);
        cancelled.status = ReminderStatus::Cancelled;

        for reminder in [&due, &boundary, &later, &cancelled] {
            store.save_reminder(reminder).await.unwrap();
        }

        let ids: Vec<Uuid> = store.due_reminders(now).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![due.id, boundary.id]);
    }

    #[tokio::test]
    async fn test_delete_appointment_removes_reminders_keeps_logs() {
        let store = MemoryStore::new();
        let appointment = Appointment::new(Uuid::new_v4(), Uuid::new_v4(), Utc::now(), None);
        store.save_appointment(&appointment).await.unwrap();

        let reminder = Reminder::pending(appointment.id, None, ReminderKind::Immediate, Utc::now(), Utc::now());
        store.save_reminder(&reminder).await.unwrap();
        store
            .append_notification_log(&NotificationLog {
                id: Uuid::new_v4(),
                reminder_id: reminder.id,
                appointment_id: appointment.id,
                channel: shared_models::NotificationChannel::Email,
                status: shared_models::NotificationStatus::Sent,
                timestamp: Utc::now(),
                recipient: "client@example.com".to_string(),
                error_message: None,
            })
            .await
            .unwrap();

        assert!(store.delete_appointment(appointment.id).await.unwrap());
        assert!(store.find_appointment(appointment.id).await.unwrap().is_none());
        assert!(store.reminders_for_appointment(appointment.id).await.unwrap().is_empty());
        assert_eq!(store.logs_for_appointment(appointment.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.find_client(Uuid::new_v4()).await.is_err());

        store.set_unavailable(false);
        assert!(store.find_client(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failing_reminder_writes_leave_other_calls_working() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let stored = Reminder::pending(Uuid::new_v4(), None, ReminderKind::Custom, now, now);
        store.save_reminder(&stored).await.unwrap();

        store.set_reminder_writes_failing(true);
        let rejected = Reminder::pending(stored.appointment_id, None, ReminderKind::Custom, now, now);
        assert!(store.save_reminder(&rejected).await.is_err());
        assert!(store
            .transition_reminder(stored.id, ReminderStatus::Cancelled, None)
            .await
            .unwrap());
        assert_eq!(store.reminders_for_appointment(stored.appointment_id).await.unwrap().len(), 1);

        store.set_reminder_writes_failing(false);
        assert!(store.save_reminder(&rejected).await.is_ok());
    }
}
