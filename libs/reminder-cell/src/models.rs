use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use shared_models::{
    Appointment, Client, NotificationLog, NotificationStatus, Reminder, ReminderKind,
    ReminderStatus,
};

// ==============================================================================
// REMINDER REQUESTS
// ==============================================================================

/// One entry of a reminder request. A booking carries a list of these;
/// an empty list means "booking confirmation only".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum ReminderSpec {
    ByRules(Vec<Uuid>),
    ByOptions(Vec<ReminderOption>),
    Custom(Vec<DateTime<Utc>>),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderOption {
    Immediate,
    TenMinutesBefore,
    OneDayBefore,
}

impl ReminderOption {
    pub fn kind(&self) -> ReminderKind {
        match self {
            ReminderOption::Immediate => ReminderKind::Immediate,
            ReminderOption::TenMinutesBefore => ReminderKind::TenMinutesBefore,
            ReminderOption::OneDayBefore => ReminderKind::OneDayBefore,
        }
    }

    /// Offset before the appointment; `None` fires at planning time.
    pub fn offset(&self) -> Option<Duration> {
        match self {
            ReminderOption::Immediate => None,
            ReminderOption::TenMinutesBefore => Some(Duration::minutes(10)),
            ReminderOption::OneDayBefore => Some(Duration::days(1)),
        }
    }
}

/// A reminder the planner decided to create, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderDraft {
    pub kind: ReminderKind,
    pub rule_id: Option<Uuid>,
    pub scheduled_time: DateTime<Utc>,
}

impl ReminderDraft {
    pub fn is_immediate(&self) -> bool {
        self.kind == ReminderKind::Immediate
    }

    pub fn into_reminder(self, appointment_id: Uuid, created_at: DateTime<Utc>) -> Reminder {
        Reminder::pending(
            appointment_id,
            self.rule_id,
            self.kind,
            self.scheduled_time,
            created_at,
        )
    }
}

// ==============================================================================
// REMINDER RULE REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateReminderRuleRequest {
    pub name: String,
    pub hours_before: Option<i64>,
    pub minutes_before: Option<i64>,
    pub is_instant: Option<bool>,
    pub is_custom: Option<bool>,
    pub custom_time: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

/// Partial update; an absent field keeps the stored value.
///
/// The offsets and `custom_time` can also be cleared: `Some(None)`, or an
/// explicit `null` in JSON, removes the stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateReminderRuleRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub hours_before: Option<Option<i64>>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub minutes_before: Option<Option<i64>>,
    pub is_instant: Option<bool>,
    pub is_custom: Option<bool>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub custom_time: Option<Option<DateTime<Utc>>>,
    pub is_active: Option<bool>,
}

/// A present field, `null` included, becomes `Some`; a missing one stays
/// `None` through `#[serde(default)]`.
fn clearable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ==============================================================================
// DISPATCH
// ==============================================================================

/// Everything needed to render and address one reminder.
#[derive(Debug, Clone)]
pub struct ReminderEnvelope {
    pub reminder: Reminder,
    pub appointment: Appointment,
    pub client: Client,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub subject: String,
    pub body: String,
}

/// Logs written by one `send_all_channels` call.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub attempts: Vec<NotificationLog>,
}

impl DispatchOutcome {
    /// Sent only when something was attempted and every attempt went out.
    pub fn reminder_status(&self) -> ReminderStatus {
        let delivered = !self.attempts.is_empty()
            && self
                .attempts
                .iter()
                .all(|log| log.status == NotificationStatus::Sent);

        if delivered {
            ReminderStatus::Sent
        } else {
            ReminderStatus::Failed
        }
    }

    pub fn error_summary(&self) -> Option<String> {
        if self.attempts.is_empty() {
            return Some("no deliverable recipient".to_string());
        }

        let errors: Vec<String> = self
            .attempts
            .iter()
            .filter_map(|log| {
                log.error_message
                    .as_ref()
                    .map(|message| format!("{}: {}", log.channel, message))
            })
            .collect();

        (!errors.is_empty()).then(|| errors.join("; "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    /// Handled concurrently by another delivery (e.g. the booking path).
    pub skipped: usize,
    /// Store errors; these reminders stay pending for the next tick.
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    /// A previous tick was still running.
    Skipped,
}
