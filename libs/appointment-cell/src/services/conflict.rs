use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::ClinicStore;
use shared_models::Appointment;

use crate::models::AppointmentError;

/// Decides whether a practitioner is free for a fixed-length slot.
///
/// Callers that go on to insert must hold the practitioner's booking lock
/// across the check and the insert.
pub struct ConflictDetectionService {
    store: Arc<dyn ClinicStore>,
    slot_duration: Duration,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<dyn ClinicStore>, config: &AppConfig) -> Self {
        Self::with_duration(store, Duration::minutes(config.appointment_duration_minutes))
    }

    pub fn with_duration(store: Arc<dyn ClinicStore>, slot_duration: Duration) -> Self {
        Self {
            store,
            slot_duration,
        }
    }

    pub fn slot_duration(&self) -> Duration {
        self.slot_duration
    }

    pub async fn is_slot_free(
        &self,
        practitioner_id: Uuid,
        proposed_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<bool, AppointmentError> {
        let conflicts = self
            .find_conflicts(practitioner_id, proposed_time, exclude_appointment_id)
            .await?;
        Ok(conflicts.is_empty())
    }

    /// Non-cancelled appointments of the practitioner whose slot overlaps
    /// `[proposed_time, proposed_time + duration)`.
    pub async fn find_conflicts(
        &self,
        practitioner_id: Uuid,
        proposed_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let proposed_end = proposed_time + self.slot_duration;

        debug!(
            "Checking conflicts for practitioner {} from {} to {}",
            practitioner_id, proposed_time, proposed_end
        );

        // Anything starting a full slot before the proposal may still run into it.
        let nearby = self
            .store
            .practitioner_appointments_between(
                practitioner_id,
                proposed_time - self.slot_duration,
                proposed_end,
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let conflicts: Vec<Appointment> = nearby
            .into_iter()
            .filter(|existing| Some(existing.id) != exclude_appointment_id)
            .filter(Appointment::occupies_slot)
            .filter(|existing| {
                appointments_overlap(
                    proposed_time,
                    proposed_end,
                    existing.appointment_time,
                    existing.slot_end(self.slot_duration),
                )
            })
            .collect();

        if !conflicts.is_empty() {
            warn!(
                "Conflict detected for practitioner {} at {} - {} conflicting appointments",
                practitioner_id,
                proposed_time,
                conflicts.len()
            );
        }

        Ok(conflicts)
    }
}

/// Half-open intervals overlap when each starts before the other ends.
pub fn appointments_overlap(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && start2 < end1
}
