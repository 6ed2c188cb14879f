use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use reminder_cell::{ReminderError, ReminderSpec};
use shared_models::{Appointment, AppointmentStatus, Reminder, ReminderKind, ReminderStatus};

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub practitioner_id: Uuid,
    pub client_id: Uuid,
    pub appointment_time: DateTime<Utc>,
    pub notes: Option<String>,
    /// Empty means a booking confirmation only.
    #[serde(default)]
    pub reminders: Vec<ReminderSpec>,
}

/// `None` keeps the stored value. Supplying `reminders` replans them even
/// when the time is unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub appointment_time: Option<DateTime<Utc>>,
    pub practitioner_id: Option<Uuid>,
    pub notes: Option<String>,
    pub reminders: Option<Vec<ReminderSpec>>,
}

// ==============================================================================
// RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookedAppointment {
    pub appointment: Appointment,
    pub reminders: Vec<Reminder>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReminderScheduleInfo {
    pub reminder_id: Uuid,
    pub kind: ReminderKind,
    pub scheduled_time: DateTime<Utc>,
    pub status: ReminderStatus,
}

impl From<&Reminder> for ReminderScheduleInfo {
    fn from(reminder: &Reminder) -> Self {
        Self {
            reminder_id: reminder.id,
            kind: reminder.kind,
            scheduled_time: reminder.scheduled_time,
            status: reminder.status,
        }
    }
}

/// An appointment with its reminder schedule, as listed in calendar views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarAppointment {
    pub appointment: Appointment,
    pub reminders: Vec<ReminderScheduleInfo>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Client not found: {0}")]
    ClientNotFound(Uuid),

    #[error("Practitioner not found: {0}")]
    PractitionerNotFound(Uuid),

    #[error("Practitioner {practitioner_id} is already booked at {requested_time}")]
    SlotConflict {
        practitioner_id: Uuid,
        requested_time: DateTime<Utc>,
    },

    #[error("Appointment cannot be modified in current status: {0}")]
    InvalidStatusTransition(AppointmentStatus),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error(transparent)]
    Reminder(#[from] ReminderError),
}
