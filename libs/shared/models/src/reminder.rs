use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// REMINDER RULES
// ==============================================================================

/// Reusable reminder policy, referenced by id when planning reminders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReminderRule {
    pub id: Uuid,
    pub name: String,
    pub hours_before: Option<i64>,
    pub minutes_before: Option<i64>,
    pub is_instant: bool,
    pub is_custom: bool,
    pub custom_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// MATERIALIZED REMINDERS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reminder {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub kind: ReminderKind,
    pub scheduled_time: DateTime<Utc>,
    pub status: ReminderStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Reminder {
    pub fn pending(
        appointment_id: Uuid,
        rule_id: Option<Uuid>,
        kind: ReminderKind,
        scheduled_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            appointment_id,
            rule_id,
            kind,
            scheduled_time,
            status: ReminderStatus::Pending,
            created_at,
            sent_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReminderStatus::Pending && self.scheduled_time <= now
    }
}

/// What triggered a reminder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    Immediate,
    TenMinutesBefore,
    OneDayBefore,
    Rule,
    Custom,
}

impl ReminderKind {
    pub fn label(&self) -> &'static str {
        match self {
            ReminderKind::Immediate => "Booking confirmation",
            ReminderKind::TenMinutesBefore => "10 minutes before",
            ReminderKind::OneDayBefore => "1 day before",
            ReminderKind::Rule => "Scheduled reminder",
            ReminderKind::Custom => "Custom reminder",
        }
    }
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReminderKind::Immediate => write!(f, "immediate"),
            ReminderKind::TenMinutesBefore => write!(f, "ten_minutes_before"),
            ReminderKind::OneDayBefore => write!(f, "one_day_before"),
            ReminderKind::Rule => write!(f, "rule"),
            ReminderKind::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl ReminderStatus {
    /// Only `Pending` reminders move; every other status is terminal.
    pub fn can_transition_to(&self, target: &ReminderStatus) -> bool {
        use ReminderStatus::*;
        matches!((self, target), (Pending, Sent) | (Pending, Failed) | (Pending, Cancelled))
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReminderStatus::Pending)
    }
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReminderStatus::Pending => write!(f, "pending"),
            ReminderStatus::Sent => write!(f, "sent"),
            ReminderStatus::Failed => write!(f, "failed"),
            ReminderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}
