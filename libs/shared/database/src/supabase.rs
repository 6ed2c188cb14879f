use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{
    Appointment, Client as ClinicClient, NotificationLog, Practitioner, Reminder, ReminderRule,
    ReminderStatus,
};

use crate::store::ClinicStore;

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
    service_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
            service_key: config.supabase_service_key.clone(),
        }
    }

    fn get_headers(&self, prefer: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.service_key))?,
        );

        if let Some(prefer) = prefer {
            headers.insert("Prefer", HeaderValue::from_str(prefer)?);
        }

        Ok(headers)
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        prefer: Option<&str>,
        body: Option<Value>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut req = self.client.request(method, &url).headers(self.get_headers(prefer)?);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Authentication error: {}", error_text),
                404 => anyhow!("Resource not found: {}", error_text),
                409 => anyhow!("Constraint violation: {}", error_text),
                _ => anyhow!("API error ({}): {}", status, error_text),
            });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

const RETURN_ROWS: &str = "return=representation";
const UPSERT_ROWS: &str = "resolution=merge-duplicates,return=representation";

fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>, table: &str) -> Result<Vec<T>> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<std::result::Result<Vec<T>, _>>()
        .with_context(|| format!("Failed to parse {} rows", table))
}

/// `ClinicStore` over Supabase PostgREST tables.
pub struct SupabaseStore {
    supabase: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<T>> {
        let path = format!("/rest/v1/{}?{}", table, query);
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;
        parse_rows(rows, table)
    }

    async fn select_one<T: DeserializeOwned>(&self, table: &str, id: Uuid) -> Result<Option<T>> {
        let mut rows = self.select(table, &format!("id=eq.{}&limit=1", id)).await?;
        Ok(rows.pop())
    }

    async fn upsert<T: Serialize>(&self, table: &str, row: &T) -> Result<()> {
        let path = format!("/rest/v1/{}", table);
        let body = serde_json::to_value(row)?;
        let _: Vec<Value> = self
            .supabase
            .request(Method::POST, &path, Some(UPSERT_ROWS), Some(body))
            .await?;
        Ok(())
    }

    async fn delete_where(&self, table: &str, query: &str) -> Result<usize> {
        let path = format!("/rest/v1/{}?{}", table, query);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::DELETE, &path, Some(RETURN_ROWS), None)
            .await?;
        Ok(rows.len())
    }
}

#[async_trait]
impl ClinicStore for SupabaseStore {
    async fn save_client(&self, client: &ClinicClient) -> Result<()> {
        self.upsert("clients", client).await
    }

    async fn find_client(&self, id: Uuid) -> Result<Option<ClinicClient>> {
        self.select_one("clients", id).await
    }

    async fn save_practitioner(&self, practitioner: &Practitioner) -> Result<()> {
        self.upsert("practitioners", practitioner).await
    }

    async fn find_practitioner(&self, id: Uuid) -> Result<Option<Practitioner>> {
        self.select_one("practitioners", id).await
    }

    async fn save_appointment(&self, appointment: &Appointment) -> Result<()> {
        self.upsert("appointments", appointment).await
    }

    async fn find_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        self.select_one("appointments", id).await
    }

    async fn delete_appointment(&self, id: Uuid) -> Result<bool> {
        let reminders = self
            .delete_where("reminders", &format!("appointment_id=eq.{}", id))
            .await?;
        debug!("Deleted {} reminders of appointment {}", reminders, id);
        let appointments = self.delete_where("appointments", &format!("id=eq.{}", id)).await?;
        Ok(appointments > 0)
    }

    async fn practitioner_appointments_between(
        &self,
        practitioner_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        let query = format!(
            "practitioner_id=eq.{}&appointment_time=gte.{}&appointment_time=lte.{}&order=appointment_time.asc",
            practitioner_id,
            ts(from),
            ts(to)
        );
        self.select("appointments", &query).await
    }

    async fn appointments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        let query = format!(
            "appointment_time=gte.{}&appointment_time=lt.{}&order=appointment_time.asc",
            ts(from),
            ts(to)
        );
        self.select("appointments", &query).await
    }

    async fn save_rule(&self, rule: &ReminderRule) -> Result<()> {
        self.upsert("reminder_rules", rule).await
    }

    async fn find_rule(&self, id: Uuid) -> Result<Option<ReminderRule>> {
        self.select_one("reminder_rules", id).await
    }

    async fn find_rules(&self, ids: &[Uuid]) -> Result<Vec<ReminderRule>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let list = ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
        self.select("reminder_rules", &format!("id=in.({})", list)).await
    }

    async fn active_rules(&self) -> Result<Vec<ReminderRule>> {
        self.select("reminder_rules", "is_active=eq.true&order=name.asc").await
    }

    async fn delete_rule(&self, id: Uuid) -> Result<bool> {
        Ok(self.delete_where("reminder_rules", &format!("id=eq.{}", id)).await? > 0)
    }

    async fn rule_name_taken(&self, name: &str, exclude_id: Option<Uuid>) -> Result<bool> {
        let mut query = format!("name=eq.{}&select=id", urlencoding::encode(name));
        if let Some(exclude) = exclude_id {
            query.push_str(&format!("&id=neq.{}", exclude));
        }
        let rows: Vec<Value> = self.select("reminder_rules", &query).await?;
        Ok(!rows.is_empty())
    }

    async fn save_reminder(&self, reminder: &Reminder) -> Result<()> {
        self.upsert("reminders", reminder).await
    }

    async fn find_reminder(&self, id: Uuid) -> Result<Option<Reminder>> {
        self.select_one("reminders", id).await
    }

    async fn reminders_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<Reminder>> {
        let query = format!("appointment_id=eq.{}&order=scheduled_time.asc", appointment_id);
        self.select("reminders", &query).await
    }

    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let query = format!(
            "status=eq.{}&scheduled_time=lte.{}&order=scheduled_time.asc",
            ReminderStatus::Pending,
            ts(now)
        );
        self.select("reminders", &query).await
    }

    async fn transition_reminder(
        &self,
        id: Uuid,
        to: ReminderStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        if !ReminderStatus::Pending.can_transition_to(&to) {
            return Ok(false);
        }

        let path = format!(
            "/rest/v1/reminders?id=eq.{}&status=eq.{}",
            id,
            ReminderStatus::Pending
        );
        let body = json!({ "status": to, "sent_at": sent_at });
        let rows: Vec<Value> = self
            .supabase
            .request(Method::PATCH, &path, Some(RETURN_ROWS), Some(body))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn append_notification_log(&self, log: &NotificationLog) -> Result<()> {
        let body = serde_json::to_value(log)?;
        let _: Vec<Value> = self
            .supabase
            .request(Method::POST, "/rest/v1/notification_logs", Some(RETURN_ROWS), Some(body))
            .await?;
        Ok(())
    }

    async fn logs_for_reminder(&self, reminder_id: Uuid) -> Result<Vec<NotificationLog>> {
        let query = format!("reminder_id=eq.{}&order=timestamp.desc", reminder_id);
        self.select("notification_logs", &query).await
    }

    async fn logs_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<NotificationLog>> {
        let query = format!("appointment_id=eq.{}&order=timestamp.desc", appointment_id);
        self.select("notification_logs", &query).await
    }
}
