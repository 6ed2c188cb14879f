use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::ClinicStore;
use shared_models::ReminderRule;

use crate::error::ReminderError;
use crate::models::{CreateReminderRuleRequest, UpdateReminderRuleRequest};

/// Manages reusable reminder rules. Changing or deleting a rule never
/// touches reminders already created from it.
pub struct ReminderRuleService {
    store: Arc<dyn ClinicStore>,
}

impl ReminderRuleService {
    pub fn new(store: Arc<dyn ClinicStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, request: CreateReminderRuleRequest) -> Result<ReminderRule, ReminderError> {
        let rule = ReminderRule {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            hours_before: request.hours_before,
            minutes_before: request.minutes_before,
            is_instant: request.is_instant.unwrap_or(false),
            is_custom: request.is_custom.unwrap_or(false),
            custom_time: request.custom_time,
            is_active: request.is_active.unwrap_or(true),
            created_at: Utc::now(),
        };

        self.validate(&rule).await?;

        self.store
            .save_rule(&rule)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        info!("Reminder rule '{}' created with id {}", rule.name, rule.id);
        Ok(rule)
    }

    pub async fn update(
        &self,
        rule_id: Uuid,
        request: UpdateReminderRuleRequest,
    ) -> Result<ReminderRule, ReminderError> {
        let mut rule = self.get(rule_id).await?;

        if let Some(name) = request.name {
            rule.name = name.trim().to_string();
        }
        if let Some(hours_before) = request.hours_before {
            rule.hours_before = hours_before;
        }
        if let Some(minutes_before) = request.minutes_before {
            rule.minutes_before = minutes_before;
        }
        if let Some(is_instant) = request.is_instant {
            rule.is_instant = is_instant;
        }
        if let Some(is_custom) = request.is_custom {
            rule.is_custom = is_custom;
        }
        if let Some(custom_time) = request.custom_time {
            rule.custom_time = custom_time;
        }
        if let Some(is_active) = request.is_active {
            rule.is_active = is_active;
        }

        self.validate(&rule).await?;

        self.store
            .save_rule(&rule)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        info!("Reminder rule {} updated", rule_id);
        Ok(rule)
    }

    pub async fn get(&self, rule_id: Uuid) -> Result<ReminderRule, ReminderError> {
        self.store
            .find_rule(rule_id)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?
            .ok_or(ReminderError::RuleNotFound(rule_id))
    }

    pub async fn list_active(&self) -> Result<Vec<ReminderRule>, ReminderError> {
        let rules = self
            .store
            .active_rules()
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        debug!("Found {} active reminder rules", rules.len());
        Ok(rules)
    }

    pub async fn delete(&self, rule_id: Uuid) -> Result<(), ReminderError> {
        let deleted = self
            .store
            .delete_rule(rule_id)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        if !deleted {
            return Err(ReminderError::RuleNotFound(rule_id));
        }

        info!("Reminder rule {} deleted", rule_id);
        Ok(())
    }

    async fn validate(&self, rule: &ReminderRule) -> Result<(), ReminderError> {
        validate_rule_fields(rule)?;

        let taken = self
            .store
            .rule_name_taken(&rule.name, Some(rule.id))
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        if taken {
            return Err(ReminderError::ValidationError(format!(
                "A reminder rule named '{}' already exists",
                rule.name
            )));
        }

        Ok(())
    }
}

pub fn validate_rule_fields(rule: &ReminderRule) -> Result<(), ReminderError> {
    if rule.name.is_empty() {
        return Err(ReminderError::ValidationError("Rule name is required".to_string()));
    }

    if rule.hours_before.is_some_and(|h| h < 0) || rule.minutes_before.is_some_and(|m| m < 0) {
        return Err(ReminderError::ValidationError(
            "Reminder offsets cannot be negative".to_string(),
        ));
    }

    if rule.is_custom && rule.custom_time.is_none() {
        return Err(ReminderError::ValidationError(
            "Custom reminder rules need a custom time".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn rule() -> ReminderRule {
        ReminderRule {
            id: Uuid::new_v4(),
            name: "2 hours before".to_string(),
            hours_before: Some(2),
            minutes_before: None,
            is_instant: false,
            is_custom: false,
            custom_time: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_field_validation() {
        assert!(validate_rule_fields(&rule()).is_ok());

        let unnamed = ReminderRule {
            name: String::new(),
            ..rule()
        };
        assert_matches!(validate_rule_fields(&unnamed), Err(ReminderError::ValidationError(_)));

        let negative = ReminderRule {
            minutes_before: Some(-5),
            ..rule()
        };
        assert_matches!(validate_rule_fields(&negative), Err(ReminderError::ValidationError(_)));

        let custom_without_time = ReminderRule {
            is_custom: true,
            ..rule()
        };
        assert_matches!(
            validate_rule_fields(&custom_without_time),
            Err(ReminderError::ValidationError(msg)) if msg.contains("custom time")
        );
    }
}
