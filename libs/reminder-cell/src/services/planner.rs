use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_database::ClinicStore;
use shared_models::{Appointment, Reminder, ReminderKind, ReminderRule, ReminderStatus};

use crate::error::ReminderError;
use crate::models::{ReminderDraft, ReminderOption, ReminderSpec};
use crate::services::dispatcher::NotificationDispatcher;

/// Turns an appointment and a list of reminder specs into reminder records.
pub struct ReminderPlanner {
    store: Arc<dyn ClinicStore>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl ReminderPlanner {
    pub fn new(store: Arc<dyn ClinicStore>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Computes the drafts without persisting anything.
    ///
    /// An empty spec list yields a single booking confirmation. Every rule id
    /// must exist; inactive rules are skipped.
    pub async fn plan(
        &self,
        appointment: &Appointment,
        specs: &[ReminderSpec],
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderDraft>, ReminderError> {
        if specs.is_empty() {
            return Ok(vec![immediate_draft(None, now)]);
        }

        let mut drafts = Vec::new();
        for spec in specs {
            match spec {
                ReminderSpec::ByRules(rule_ids) => {
                    for rule in self.load_rules(rule_ids).await? {
                        if !rule.is_active {
                            debug!("Skipping inactive reminder rule {}", rule.id);
                            continue;
                        }
                        drafts.extend(draft_for_rule(&rule, appointment.appointment_time, now));
                    }
                }
                ReminderSpec::ByOptions(options) => {
                    drafts.extend(
                        options
                            .iter()
                            .filter_map(|option| draft_for_option(*option, appointment.appointment_time, now)),
                    );
                }
                ReminderSpec::Custom(times) => {
                    drafts.extend(custom_drafts(times, appointment.appointment_time, now));
                }
            }
        }

        Ok(normalize(drafts))
    }

    /// Writes the drafts as `Pending` reminders.
    pub async fn persist(
        &self,
        appointment_id: Uuid,
        drafts: Vec<ReminderDraft>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, ReminderError> {
        let mut reminders = Vec::with_capacity(drafts.len());

        for draft in drafts {
            let reminder = draft.into_reminder(appointment_id, now);
            self.store
                .save_reminder(&reminder)
                .await
                .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;
            debug!(
                "Reminder {} ({}) scheduled for {}",
                reminder.id, reminder.kind, reminder.scheduled_time
            );
            reminders.push(reminder);
        }

        Ok(reminders)
    }

    /// Delivers the immediate reminders right away instead of waiting for
    /// the dispatch loop, and refreshes their status in `reminders`.
    ///
    /// A delivery that errors leaves the reminder `Pending` and due, so the
    /// next tick finishes it.
    pub async fn dispatch_immediate(&self, reminders: &mut [Reminder]) {
        for reminder in reminders
            .iter_mut()
            .filter(|r| r.kind == ReminderKind::Immediate && r.status == ReminderStatus::Pending)
        {
            if let Err(e) = self.dispatcher.deliver(reminder.id).await {
                error!("Immediate delivery of reminder {} failed: {}", reminder.id, e);
                continue;
            }

            match self.store.find_reminder(reminder.id).await {
                Ok(Some(current)) => *reminder = current,
                Ok(None) => warn!("Reminder {} disappeared after delivery", reminder.id),
                Err(e) => error!("Failed to reload reminder {}: {}", reminder.id, e),
            }
        }
    }

    #[instrument(skip(self, appointment, specs), fields(appointment_id = %appointment.id))]
    pub async fn plan_and_persist(
        &self,
        appointment: &Appointment,
        specs: &[ReminderSpec],
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, ReminderError> {
        let drafts = self.plan(appointment, specs, now).await?;
        let mut reminders = self.persist(appointment.id, drafts, now).await?;
        self.dispatch_immediate(&mut reminders).await;

        info!("Planned {} reminders for appointment {}", reminders.len(), appointment.id);
        Ok(reminders)
    }

    /// Cancels every pending reminder of the appointment. Terminal reminders
    /// are left alone, so a second call cancels nothing.
    pub async fn cancel_all(&self, appointment_id: Uuid) -> Result<usize, ReminderError> {
        self.cancel_all_except(appointment_id, &[]).await
    }

    /// Cancels the appointment's pending reminders whose ids are not in `keep`.
    pub async fn cancel_all_except(&self, appointment_id: Uuid, keep: &[Uuid]) -> Result<usize, ReminderError> {
        let reminders = self
            .store
            .reminders_for_appointment(appointment_id)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        let mut cancelled = 0;
        for reminder in reminders
            .iter()
            .filter(|r| r.status == ReminderStatus::Pending && !keep.contains(&r.id))
        {
            let moved = self
                .store
                .transition_reminder(reminder.id, ReminderStatus::Cancelled, None)
                .await
                .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;
            if moved {
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            info!("Cancelled {} pending reminders for appointment {}", cancelled, appointment_id);
        }
        Ok(cancelled)
    }

    /// Replaces the pending reminders with a fresh plan for the appointment's
    /// current time. The new reminders are written before the old ones are
    /// cancelled; if a write fails the old ones stay pending.
    #[instrument(skip(self, appointment, specs), fields(appointment_id = %appointment.id))]
    pub async fn reschedule(
        &self,
        appointment: &Appointment,
        specs: &[ReminderSpec],
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, ReminderError> {
        let drafts = self.plan(appointment, specs, now).await?;
        let mut reminders = self.replace_pending(appointment.id, drafts, now).await?;
        self.dispatch_immediate(&mut reminders).await;
        Ok(reminders)
    }

    /// Persists `drafts` and then cancels every other pending reminder of the
    /// appointment. On a failed write the drafts already stored are cancelled
    /// and the previous pending set is left as it was.
    pub async fn replace_pending(
        &self,
        appointment_id: Uuid,
        drafts: Vec<ReminderDraft>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, ReminderError> {
        let previous: Vec<Uuid> = self
            .store
            .reminders_for_appointment(appointment_id)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?
            .into_iter()
            .filter(|r| r.status == ReminderStatus::Pending)
            .map(|r| r.id)
            .collect();

        let reminders = match self.persist(appointment_id, drafts, now).await {
            Ok(reminders) => reminders,
            Err(e) => {
                if let Err(cleanup) = self.cancel_all_except(appointment_id, &previous).await {
                    error!(
                        "Failed to cancel partial reminders for appointment {}: {}",
                        appointment_id, cleanup
                    );
                }
                return Err(e);
            }
        };

        let kept: Vec<Uuid> = reminders.iter().map(|r| r.id).collect();
        self.cancel_all_except(appointment_id, &kept).await?;
        Ok(reminders)
    }

    /// Rules in the order requested.
    async fn load_rules(&self, rule_ids: &[Uuid]) -> Result<Vec<ReminderRule>, ReminderError> {
        if rule_ids.is_empty() {
            return Ok(Vec::new());
        }

        let found = self
            .store
            .find_rules(rule_ids)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        rule_ids
            .iter()
            .map(|id| {
                found
                    .iter()
                    .find(|rule| rule.id == *id)
                    .cloned()
                    .ok_or(ReminderError::RuleNotFound(*id))
            })
            .collect()
    }
}

fn immediate_draft(rule_id: Option<Uuid>, now: DateTime<Utc>) -> ReminderDraft {
    ReminderDraft {
        kind: ReminderKind::Immediate,
        rule_id,
        scheduled_time: now,
    }
}

pub fn draft_for_rule(
    rule: &ReminderRule,
    appointment_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<ReminderDraft> {
    if rule.is_instant {
        return Some(immediate_draft(Some(rule.id), now));
    }

    let scheduled_time = if rule.is_custom {
        match rule.custom_time {
            Some(time) => time,
            None => {
                warn!("Custom reminder rule {} has no custom time", rule.id);
                return None;
            }
        }
    } else {
        appointment_time
            - Duration::hours(rule.hours_before.unwrap_or(0))
            - Duration::minutes(rule.minutes_before.unwrap_or(0))
    };

    (scheduled_time > now).then(|| ReminderDraft {
        kind: if rule.is_custom {
            ReminderKind::Custom
        } else {
            ReminderKind::Rule
        },
        rule_id: Some(rule.id),
        scheduled_time,
    })
}

pub fn draft_for_option(
    option: ReminderOption,
    appointment_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<ReminderDraft> {
    match option.offset() {
        None => Some(immediate_draft(None, now)),
        Some(offset) => {
            let scheduled_time = appointment_time - offset;
            (scheduled_time > now).then(|| ReminderDraft {
                kind: option.kind(),
                rule_id: None,
                scheduled_time,
            })
        }
    }
}

/// Custom timestamps survive only inside `(now, appointment_time)`.
pub fn custom_drafts(
    times: &[DateTime<Utc>],
    appointment_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<ReminderDraft> {
    times
        .iter()
        .filter(|time| **time > now && **time < appointment_time)
        .map(|time| ReminderDraft {
            kind: ReminderKind::Custom,
            rule_id: None,
            scheduled_time: *time,
        })
        .collect()
}

/// One booking confirmation at most, then chronological order.
fn normalize(drafts: Vec<ReminderDraft>) -> Vec<ReminderDraft> {
    let mut seen_immediate = false;
    let mut drafts: Vec<ReminderDraft> = drafts
        .into_iter()
        .filter(|draft| {
            if !draft.is_immediate() {
                return true;
            }
            !std::mem::replace(&mut seen_immediate, true)
        })
        .collect();

    drafts.sort_by_key(|draft| draft.scheduled_time);
    drafts
}
