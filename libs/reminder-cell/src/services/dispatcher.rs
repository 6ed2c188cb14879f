use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::ClinicStore;
use shared_models::{
    NotificationChannel, NotificationLog, NotificationStatus, ReminderStatus,
};

use crate::error::{DeliveryError, ReminderError};
use crate::models::{DispatchOutcome, NotificationMessage, ReminderEnvelope};
use crate::services::channels::{ChannelSender, LoggingSender, SmtpEmailSender};

pub struct NotificationDispatcher {
    store: Arc<dyn ClinicStore>,
    senders: HashMap<NotificationChannel, Arc<dyn ChannelSender>>,
    send_timeout: Duration,
    clinic_name: String,
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Holds a reminder id in the in-flight set until dropped.
struct InFlightClaim<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    reminder_id: Uuid,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.reminder_id);
    }
}

impl NotificationDispatcher {
    /// A dispatcher with no channels registered.
    pub fn new(store: Arc<dyn ClinicStore>, config: &AppConfig) -> Self {
        Self {
            store,
            senders: HashMap::new(),
            send_timeout: Duration::from_secs(config.notification_send_timeout_seconds),
            clinic_name: config.clinic_name.clone(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// SMTP email when configured, logging placeholders for SMS and WhatsApp.
    pub fn from_config(store: Arc<dyn ClinicStore>, config: &AppConfig) -> Result<Self, DeliveryError> {
        let mut dispatcher = Self::new(store, config)
            .with_sender(Arc::new(LoggingSender::new(NotificationChannel::Sms)))
            .with_sender(Arc::new(LoggingSender::new(NotificationChannel::WhatsApp)));

        if config.is_email_configured() {
            dispatcher = dispatcher.with_sender(Arc::new(SmtpEmailSender::from_config(config)?));
        } else {
            warn!("No SMTP settings, email notifications will be logged as failed");
        }

        Ok(dispatcher)
    }

    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    pub fn compose(&self, envelope: &ReminderEnvelope) -> NotificationMessage {
        let client_name = &envelope.client.name;
        let appointment_time = envelope
            .appointment
            .appointment_time
            .format("%B %d, %Y at %H:%M");

        let mut body = format!(
            "Dear {},\n\nThis is a reminder for your upcoming appointment.\n\nAppointment Details:\nDate & Time: {}\n",
            client_name, appointment_time
        );
        if let Some(notes) = envelope.appointment.notes.as_deref().filter(|n| !n.is_empty()) {
            body.push_str(&format!("Notes: {}\n", notes));
        }
        body.push_str(&format!("\nReminder Type: {}\n", envelope.reminder.kind.label()));
        body.push_str("\nPlease arrive on time for your appointment.\n\n");
        body.push_str(&format!("Thank you,\n{}", self.clinic_name));

        NotificationMessage {
            subject: format!("Appointment Reminder - {}", client_name),
            body,
        }
    }

    /// Sends one reminder on one channel and appends exactly one log entry.
    pub async fn send(
        &self,
        envelope: &ReminderEnvelope,
        channel: NotificationChannel,
        recipient: &str,
    ) -> NotificationLog {
        let result = match self.senders.get(&channel) {
            Some(sender) => {
                let message = self.compose(envelope);
                match timeout(self.send_timeout, sender.send(recipient, &message)).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout {
                        timeout_seconds: self.send_timeout.as_secs(),
                    }),
                }
            }
            None => Err(DeliveryError::NotConfigured(channel)),
        };

        let (status, error_message) = match result {
            Ok(()) => (NotificationStatus::Sent, None),
            Err(e) => {
                warn!(
                    "Failed to send {} notification to {} for reminder {}: {}",
                    channel, recipient, envelope.reminder.id, e
                );
                (NotificationStatus::Failed, Some(e.to_string()))
            }
        };

        let log = NotificationLog {
            id: Uuid::new_v4(),
            reminder_id: envelope.reminder.id,
            appointment_id: envelope.appointment.id,
            channel,
            status,
            timestamp: Utc::now(),
            recipient: recipient.to_string(),
            error_message,
        };

        if let Err(e) = self.store.append_notification_log(&log).await {
            error!("Failed to record notification log for reminder {}: {}", envelope.reminder.id, e);
        }

        log
    }

    /// Attempts every channel with a non-empty address: email for the email
    /// address, SMS for the phone number.
    pub async fn send_all_channels(
        &self,
        envelope: &ReminderEnvelope,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        if let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) {
            outcome
                .attempts
                .push(self.send(envelope, NotificationChannel::Email, email).await);
        }

        if let Some(phone) = phone.map(str::trim).filter(|p| !p.is_empty()) {
            outcome
                .attempts
                .push(self.send(envelope, NotificationChannel::Sms, phone).await);
        }

        outcome
    }

    /// Delivers a pending reminder and moves it to `Sent` or `Failed`.
    ///
    /// Returns `None` when another delivery already owns the reminder or it
    /// is no longer pending.
    #[instrument(skip(self))]
    pub async fn deliver(&self, reminder_id: Uuid) -> Result<Option<ReminderStatus>, ReminderError> {
        let Some(_claim) = self.claim(reminder_id) else {
            debug!("Reminder {} already in flight", reminder_id);
            return Ok(None);
        };

        let reminder = self
            .store
            .find_reminder(reminder_id)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?
            .ok_or(ReminderError::ReminderNotFound(reminder_id))?;

        if reminder.status.is_terminal() {
            debug!("Reminder {} already {}", reminder_id, reminder.status);
            return Ok(None);
        }

        let appointment = self
            .store
            .find_appointment(reminder.appointment_id)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;
        let Some(appointment) = appointment else {
            warn!(
                "Reminder {} references missing appointment {}",
                reminder_id, reminder.appointment_id
            );
            return self.finish(reminder_id, ReminderStatus::Failed).await;
        };

        let client = self
            .store
            .find_client(appointment.client_id)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;
        let Some(client) = client else {
            warn!("Reminder {} references missing client {}", reminder_id, appointment.client_id);
            return self.finish(reminder_id, ReminderStatus::Failed).await;
        };

        let phone = client.phone.clone();
        let email = client.email.clone();
        let envelope = ReminderEnvelope {
            reminder,
            appointment,
            client,
        };

        let outcome = self
            .send_all_channels(&envelope, phone.as_deref(), email.as_deref())
            .await;
        let status = outcome.reminder_status();

        if let Some(summary) = outcome.error_summary() {
            warn!("Reminder {} failed: {}", reminder_id, summary);
        }

        self.finish(reminder_id, status).await
    }

    async fn finish(
        &self,
        reminder_id: Uuid,
        status: ReminderStatus,
    ) -> Result<Option<ReminderStatus>, ReminderError> {
        let sent_at = (status == ReminderStatus::Sent).then(Utc::now);

        let moved = self
            .store
            .transition_reminder(reminder_id, status, sent_at)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        if moved {
            info!("Reminder {} marked {}", reminder_id, status);
            Ok(Some(status))
        } else {
            warn!("Reminder {} left pending state during delivery, {} not recorded", reminder_id, status);
            Ok(None)
        }
    }

    fn claim(&self, reminder_id: Uuid) -> Option<InFlightClaim<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(reminder_id) {
            return None;
        }
        Some(InFlightClaim {
            in_flight: &self.in_flight,
            reminder_id,
        })
    }

    pub async fn send_test_email(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let sender = self
            .senders
            .get(&NotificationChannel::Email)
            .ok_or(DeliveryError::NotConfigured(NotificationChannel::Email))?;

        let message = NotificationMessage {
            subject: subject.to_string(),
            body: body.to_string(),
        };

        match timeout(self.send_timeout, sender.send(to, &message)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DeliveryError::Timeout {
                    timeout_seconds: self.send_timeout.as_secs(),
                })
            }
        }

        info!("Test email sent successfully to {}", to);
        Ok(())
    }

    pub async fn history_for_reminder(&self, reminder_id: Uuid) -> Result<Vec<NotificationLog>, ReminderError> {
        self.store
            .logs_for_reminder(reminder_id)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))
    }

    pub async fn history_for_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Vec<NotificationLog>, ReminderError> {
        self.store
            .logs_for_appointment(appointment_id)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shared_database::MemoryStore;
    use shared_models::{Appointment, Client, Reminder, ReminderKind};

    fn envelope(notes: Option<&str>) -> ReminderEnvelope {
        let client = Client::new("Jane Roe", None, Some("jane@example.com"));
        let time = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();
        let appointment = Appointment::new(Uuid::new_v4(), client.id, time, notes.map(str::to_string));
        let reminder = Reminder::pending(appointment.id, None, ReminderKind::OneDayBefore, time, time);
        ReminderEnvelope {
            reminder,
            appointment,
            client,
        }
    }

    fn dispatcher() -> NotificationDispatcher {
        let config = AppConfig {
            clinic_name: "Test Clinic".to_string(),
            ..AppConfig::default()
        };
        NotificationDispatcher::new(Arc::new(MemoryStore::new()), &config)
    }

    #[test]
    fn test_compose_includes_details() {
        let message = dispatcher().compose(&envelope(Some("Bring x-rays")));

        assert_eq!(message.subject, "Appointment Reminder - Jane Roe");
        assert!(message.body.starts_with("Dear Jane Roe,"));
        assert!(message.body.contains("Date & Time: January 10, 2025 at 09:00"));
        assert!(message.body.contains("Notes: Bring x-rays"));
        assert!(message.body.contains("Reminder Type: 1 day before"));
        assert!(message.body.ends_with("Test Clinic"));
    }

    #[test]
    fn test_compose_skips_empty_notes() {
        let message = dispatcher().compose(&envelope(Some("")));
        assert!(!message.body.contains("Notes:"));
    }

    #[tokio::test]
    async fn test_unregistered_channel_logs_failure() {
        let dispatcher = dispatcher();
        let envelope = envelope(None);

        let log = dispatcher
            .send(&envelope, NotificationChannel::Email, "jane@example.com")
            .await;

        assert_eq!(log.status, NotificationStatus::Failed);
        assert!(log.error_message.unwrap().contains("No sender configured"));
        assert_eq!(dispatcher.history_for_reminder(envelope.reminder.id).await.unwrap().len(), 1);
    }

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let dispatcher = dispatcher();
        let id = Uuid::new_v4();

        let first = dispatcher.claim(id);
        assert!(first.is_some());
        assert!(dispatcher.claim(id).is_none());

        drop(first);
        assert!(dispatcher.claim(id).is_some());
    }
}
