use thiserror::Error;
use uuid::Uuid;

use shared_models::NotificationChannel;

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Reminder not found: {0}")]
    ReminderNotFound(Uuid),

    #[error("Reminder rule not found: {0}")]
    RuleNotFound(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// A single channel send failed. Never leaves the dispatcher: it is
/// recorded as a failed notification log instead.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Send timed out after {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    #[error("No sender configured for channel {0}")]
    NotConfigured(NotificationChannel),

    #[error("Delivery failed: {0}")]
    Other(String),
}
