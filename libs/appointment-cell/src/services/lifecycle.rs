use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use reminder_cell::{ReminderOption, ReminderPlanner, ReminderSpec};
use shared_config::AppConfig;
use shared_database::ClinicStore;
use shared_models::{Appointment, AppointmentStatus, Reminder, ReminderKind, ReminderStatus};

use crate::models::{
    AppointmentError, BookAppointmentRequest, BookedAppointment, UpdateAppointmentRequest,
};
use crate::services::conflict::ConflictDetectionService;

/// Books, moves, cancels and deletes appointments together with their
/// reminders.
///
/// Writes for one practitioner are serialized: bookings, moves, cancellations
/// and status changes run their checks and writes under that practitioner's
/// lock. Immediate reminders go out after it is released.
pub struct AppointmentLifecycleCoordinator {
    store: Arc<dyn ClinicStore>,
    conflicts: ConflictDetectionService,
    planner: Arc<ReminderPlanner>,
    practitioner_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl AppointmentLifecycleCoordinator {
    pub fn new(store: Arc<dyn ClinicStore>, planner: Arc<ReminderPlanner>, config: &AppConfig) -> Self {
        Self {
            conflicts: ConflictDetectionService::new(store.clone(), config),
            store,
            planner,
            practitioner_locks: Mutex::new(HashMap::new()),
        }
    }

    // ==========================================================================
    // COLLABORATOR CONTRACT
    // ==========================================================================

    pub async fn is_slot_free(
        &self,
        practitioner_id: Uuid,
        proposed_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<bool, AppointmentError> {
        self.conflicts
            .is_slot_free(practitioner_id, proposed_time, exclude_appointment_id)
            .await
    }

    pub async fn plan_and_persist_reminders(
        &self,
        appointment: &Appointment,
        specs: &[ReminderSpec],
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, AppointmentError> {
        Ok(self.planner.plan_and_persist(appointment, specs, now).await?)
    }

    pub async fn cancel_reminders(&self, appointment_id: Uuid) -> Result<usize, AppointmentError> {
        Ok(self.planner.cancel_all(appointment_id).await?)
    }

    pub async fn reschedule_reminders(
        &self,
        appointment: &Appointment,
        specs: &[ReminderSpec],
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, AppointmentError> {
        Ok(self.planner.reschedule(appointment, specs, now).await?)
    }

    // ==========================================================================
    // BOOKING WORKFLOW
    // ==========================================================================

    #[instrument(skip(self, request), fields(practitioner_id = %request.practitioner_id))]
    pub async fn book(
        &self,
        request: BookAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<BookedAppointment, AppointmentError> {
        info!(
            "Booking appointment for client {} with practitioner {} at {}",
            request.client_id, request.practitioner_id, request.appointment_time
        );

        self.ensure_client(request.client_id).await?;
        self.ensure_practitioner(request.practitioner_id).await?;

        if request.appointment_time <= now {
            return Err(AppointmentError::ValidationError(
                "Appointment time must be in the future".to_string(),
            ));
        }

        let mut appointment = Appointment::new(
            request.practitioner_id,
            request.client_id,
            request.appointment_time,
            clean_notes(request.notes),
        );
        appointment.created_at = now;
        appointment.updated_at = now;

        let drafts = self.planner.plan(&appointment, &request.reminders, now).await?;

        let mut reminders = {
            let lock = self.practitioner_lock(appointment.practitioner_id);
            let _guard = lock.lock().await;

            self.ensure_slot_free(&appointment, None).await?;

            self.store
                .save_appointment(&appointment)
                .await
                .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

            match self.planner.persist(appointment.id, drafts, now).await {
                Ok(reminders) => reminders,
                Err(e) => {
                    self.roll_back_booking(appointment.id).await;
                    return Err(e.into());
                }
            }
        };

        self.planner.dispatch_immediate(&mut reminders).await;

        info!(
            "Appointment {} booked with {} reminders",
            appointment.id,
            reminders.len()
        );
        Ok(BookedAppointment {
            appointment,
            reminders,
        })
    }

    /// Applies the changes. A new time or practitioner re-runs the conflict
    /// check (excluding this appointment) and replans the reminders.
    ///
    /// The returned reminders are the new plan when one was made, otherwise
    /// the appointment's pending reminders.
    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<BookedAppointment, AppointmentError> {
        let (current, guards) = self
            .lock_appointment(appointment_id, request.practitioner_id)
            .await?;
        if current.status.is_terminal() {
            return Err(AppointmentError::InvalidStatusTransition(current.status));
        }

        let mut updated = current.clone();
        if let Some(practitioner_id) = request.practitioner_id {
            if practitioner_id != current.practitioner_id {
                self.ensure_practitioner(practitioner_id).await?;
            }
            updated.practitioner_id = practitioner_id;
        }
        if let Some(appointment_time) = request.appointment_time {
            if appointment_time <= now {
                return Err(AppointmentError::ValidationError(
                    "Appointment time must be in the future".to_string(),
                ));
            }
            updated.appointment_time = appointment_time;
        }
        if request.notes.is_some() {
            updated.notes = clean_notes(request.notes);
        }
        updated.updated_at = now;

        let moved = updated.appointment_time != current.appointment_time
            || updated.practitioner_id != current.practitioner_id;

        let pending = self.pending_reminders(appointment_id).await?;
        let specs = match request.reminders {
            Some(specs) => Some(specs),
            None if moved => Some(specs_from_reminders(&pending)),
            None => None,
        };

        let drafts = match &specs {
            Some(specs) => Some(self.planner.plan(&updated, specs, now).await?),
            None => None,
        };

        if moved {
            self.ensure_slot_free(&updated, Some(appointment_id)).await?;
        }

        self.store
            .save_appointment(&updated)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let reminders = match drafts {
            Some(drafts) => match self.planner.replace_pending(appointment_id, drafts, now).await {
                Ok(mut reminders) => {
                    drop(guards);
                    self.planner.dispatch_immediate(&mut reminders).await;
                    reminders
                }
                Err(e) => {
                    self.roll_back_update(&current).await;
                    return Err(e.into());
                }
            },
            None => pending,
        };

        info!("Appointment {} updated", appointment_id);
        Ok(BookedAppointment {
            appointment: updated,
            reminders,
        })
    }

    /// Cancels pending reminders first, then marks the appointment
    /// cancelled. Cancelling twice is a no-op.
    #[instrument(skip(self))]
    pub async fn cancel(&self, appointment_id: Uuid, now: DateTime<Utc>) -> Result<Appointment, AppointmentError> {
        let (mut appointment, _guards) = self.lock_appointment(appointment_id, None).await?;

        match appointment.status {
            AppointmentStatus::Cancelled => {
                debug!("Appointment {} already cancelled", appointment_id);
                return Ok(appointment);
            }
            AppointmentStatus::Scheduled => {}
            status => return Err(AppointmentError::InvalidStatusTransition(status)),
        }

        self.planner.cancel_all(appointment_id).await?;

        appointment.status = AppointmentStatus::Cancelled;
        appointment.updated_at = now;
        self.store
            .save_appointment(&appointment)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        info!("Appointment {} cancelled", appointment_id);
        Ok(appointment)
    }

    /// Cancels pending reminders, then removes the appointment and its
    /// reminders. Notification history is kept.
    #[instrument(skip(self))]
    pub async fn delete(&self, appointment_id: Uuid) -> Result<(), AppointmentError> {
        let (_, _guards) = self.lock_appointment(appointment_id, None).await?;

        self.planner.cancel_all(appointment_id).await?;

        let deleted = self
            .store
            .delete_appointment(appointment_id)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if !deleted {
            return Err(AppointmentError::NotFound(appointment_id));
        }

        info!("Appointment {} deleted", appointment_id);
        Ok(())
    }

    /// Closes a scheduled appointment as completed, no-show or cancelled.
    pub async fn set_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        if status == AppointmentStatus::Cancelled {
            return self.cancel(appointment_id, now).await;
        }

        let (mut appointment, _guards) = self.lock_appointment(appointment_id, None).await?;
        if appointment.status.is_terminal() || status == AppointmentStatus::Scheduled {
            warn!(
                "Invalid status transition attempted: {} -> {}",
                appointment.status, status
            );
            return Err(AppointmentError::InvalidStatusTransition(appointment.status));
        }

        self.planner.cancel_all(appointment_id).await?;

        appointment.status = status;
        appointment.updated_at = now;
        self.store
            .save_appointment(&appointment)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        info!("Appointment {} marked {}", appointment_id, status);
        Ok(appointment)
    }

    pub async fn get(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .find_appointment(appointment_id)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    fn practitioner_lock(&self, practitioner_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .practitioner_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        locks.entry(practitioner_id).or_default().clone()
    }

    /// Locks the appointment's practitioner, plus `other` when given, and
    /// returns the appointment as read under those locks. Locks are taken in
    /// id order. A practitioner change seen after locking starts over.
    async fn lock_appointment(
        &self,
        appointment_id: Uuid,
        other: Option<Uuid>,
    ) -> Result<(Appointment, Vec<OwnedMutexGuard<()>>), AppointmentError> {
        loop {
            let seen = self.get(appointment_id).await?;

            let mut practitioner_ids = vec![seen.practitioner_id];
            if let Some(other) = other {
                if other != seen.practitioner_id {
                    practitioner_ids.push(other);
                }
            }
            practitioner_ids.sort();

            let mut guards = Vec::with_capacity(practitioner_ids.len());
            for practitioner_id in practitioner_ids {
                guards.push(self.practitioner_lock(practitioner_id).lock_owned().await);
            }

            let appointment = self.get(appointment_id).await?;
            if appointment.practitioner_id == seen.practitioner_id {
                return Ok((appointment, guards));
            }
            debug!("Appointment {} changed practitioner while locking", appointment_id);
        }
    }

    async fn ensure_slot_free(
        &self,
        appointment: &Appointment,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        let free = self
            .conflicts
            .is_slot_free(
                appointment.practitioner_id,
                appointment.appointment_time,
                exclude_appointment_id,
            )
            .await?;

        if free {
            Ok(())
        } else {
            Err(AppointmentError::SlotConflict {
                practitioner_id: appointment.practitioner_id,
                requested_time: appointment.appointment_time,
            })
        }
    }

    async fn ensure_client(&self, client_id: Uuid) -> Result<(), AppointmentError> {
        self.store
            .find_client(client_id)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?
            .map(|_| ())
            .ok_or(AppointmentError::ClientNotFound(client_id))
    }

    async fn ensure_practitioner(&self, practitioner_id: Uuid) -> Result<(), AppointmentError> {
        let practitioner = self
            .store
            .find_practitioner(practitioner_id)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?
            .ok_or(AppointmentError::PractitionerNotFound(practitioner_id))?;

        if !practitioner.is_active {
            return Err(AppointmentError::ValidationError(format!(
                "Practitioner {} is not accepting appointments",
                practitioner.name
            )));
        }
        Ok(())
    }

    async fn pending_reminders(&self, appointment_id: Uuid) -> Result<Vec<Reminder>, AppointmentError> {
        let reminders = self
            .store
            .reminders_for_appointment(appointment_id)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(reminders
            .into_iter()
            .filter(|r| r.status == ReminderStatus::Pending)
            .collect())
    }

    async fn roll_back_booking(&self, appointment_id: Uuid) {
        if let Err(e) = self.store.delete_appointment(appointment_id).await {
            error!("Failed to roll back appointment {}: {}", appointment_id, e);
        }
    }

    async fn roll_back_update(&self, previous: &Appointment) {
        if let Err(e) = self.store.save_appointment(previous).await {
            error!("Failed to restore appointment {}: {}", previous.id, e);
        }
    }
}

pub fn specs_from_reminders(reminders: &[Reminder]) -> Vec<ReminderSpec> {
    let mut rule_ids = Vec::new();
    let mut options = Vec::new();
    let mut custom_times = Vec::new();

    for reminder in reminders {
        match (reminder.kind, reminder.rule_id) {
            (ReminderKind::Immediate, _) => {}
            (_, Some(rule_id)) => {
                if !rule_ids.contains(&rule_id) {
                    rule_ids.push(rule_id);
                }
            }
            (ReminderKind::TenMinutesBefore, None) => options.push(ReminderOption::TenMinutesBefore),
            (ReminderKind::OneDayBefore, None) => options.push(ReminderOption::OneDayBefore),
            (ReminderKind::Custom, None) | (ReminderKind::Rule, None) => {
                custom_times.push(reminder.scheduled_time)
            }
        }
    }

    let mut specs = Vec::new();
    if !rule_ids.is_empty() {
        specs.push(ReminderSpec::ByRules(rule_ids));
    }
    if !options.is_empty() {
        specs.push(ReminderSpec::ByOptions(options));
    }
    if !custom_times.is_empty() {
        specs.push(ReminderSpec::Custom(custom_times));
    }
    specs
}

fn clean_notes(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use reminder_cell::{LoggingSender, NotificationDispatcher};
    use shared_models::NotificationChannel;
    use shared_utils::test_utils::{at, TestClinic, TestConfig};

    fn reminder(kind: ReminderKind, rule_id: Option<Uuid>, hour: u32) -> Reminder {
        let time = Utc.with_ymd_and_hms(2025, 1, 10, hour, 0, 0).unwrap();
        Reminder::pending(Uuid::new_v4(), rule_id, kind, time, time)
    }

    #[test]
    fn test_specs_from_reminders() {
        let rule_id = Uuid::new_v4();
        let reminders = vec![
            reminder(ReminderKind::Immediate, None, 6),
            reminder(ReminderKind::Rule, Some(rule_id), 7),
            reminder(ReminderKind::Custom, Some(rule_id), 7),
            reminder(ReminderKind::OneDayBefore, None, 8),
            reminder(ReminderKind::Custom, None, 9),
        ];

        let specs = specs_from_reminders(&reminders);
        assert_eq!(
            specs,
            vec![
                ReminderSpec::ByRules(vec![rule_id]),
                ReminderSpec::ByOptions(vec![ReminderOption::OneDayBefore]),
                ReminderSpec::Custom(vec![Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap()]),
            ]
        );
    }

    #[test]
    fn test_specs_from_nothing_is_empty() {
        assert!(specs_from_reminders(&[]).is_empty());
    }

    #[test]
    fn test_clean_notes() {
        assert_eq!(clean_notes(Some("  bring x-rays ".to_string())), Some("bring x-rays".to_string()));
        assert_eq!(clean_notes(Some("   ".to_string())), None);
        assert_eq!(clean_notes(None), None);
    }

    async fn coordinator(clinic: &TestClinic) -> Arc<AppointmentLifecycleCoordinator> {
        let config = TestConfig::default().to_app_config();
        let dispatcher = Arc::new(
            NotificationDispatcher::new(clinic.store.clone(), &config)
                .with_sender(Arc::new(LoggingSender::new(NotificationChannel::Email)))
                .with_sender(Arc::new(LoggingSender::new(NotificationChannel::Sms))),
        );
        let planner = Arc::new(ReminderPlanner::new(clinic.store.clone(), dispatcher));
        Arc::new(AppointmentLifecycleCoordinator::new(clinic.store.clone(), planner, &config))
    }

    #[tokio::test]
    async fn test_cancel_queued_with_update_stays_cancelled() {
        let clinic = TestClinic::seeded().await;
        let coordinator = coordinator(&clinic).await;
        let now = at(2025, 1, 8, 9, 0);

        let booked = coordinator
            .book(
                BookAppointmentRequest {
                    practitioner_id: clinic.practitioner.id,
                    client_id: clinic.client.id,
                    appointment_time: at(2025, 1, 10, 9, 0),
                    notes: None,
                    reminders: vec![ReminderSpec::ByOptions(vec![ReminderOption::OneDayBefore])],
                },
                now,
            )
            .await
            .unwrap();
        let id = booked.appointment.id;

        // Both calls read the appointment and then wait on the held lock.
        let lock = coordinator.practitioner_lock(clinic.practitioner.id);
        let held = lock.lock().await;

        let update = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                let request = UpdateAppointmentRequest {
                    appointment_time: Some(at(2025, 1, 10, 11, 0)),
                    ..UpdateAppointmentRequest::default()
                };
                coordinator.update(id, request, now).await
            }
        });
        let cancel = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.cancel(id, now).await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(held);

        let cancelled = cancel.await.unwrap().unwrap();
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
        if let Err(e) = update.await.unwrap() {
            assert_matches!(e, AppointmentError::InvalidStatusTransition(AppointmentStatus::Cancelled));
        }

        let stored = coordinator.get(id).await.unwrap();
        assert_eq!(stored.status, AppointmentStatus::Cancelled);
        let reminders = clinic.store.reminders_for_appointment(id).await.unwrap();
        assert!(reminders.iter().all(|r| r.status != ReminderStatus::Pending));
    }
}
