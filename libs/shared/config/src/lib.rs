use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_key: String,
    pub appointment_duration_minutes: i64,
    pub reminder_dispatch_interval_seconds: u64,
    pub notification_send_timeout_seconds: u64,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_from_address: String,
    pub clinic_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_key: String::new(),
            appointment_duration_minutes: 30,
            reminder_dispatch_interval_seconds: 60,
            notification_send_timeout_seconds: 10,
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_from_address: String::new(),
            clinic_name: "GetRem Dental Clinic".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            supabase_url: string_var("SUPABASE_URL", defaults.supabase_url),
            supabase_anon_key: string_var("SUPABASE_ANON_PUBLIC_KEY", defaults.supabase_anon_key),
            supabase_service_key: string_var("SUPABASE_SERVICE_ROLE_KEY", defaults.supabase_service_key),
            appointment_duration_minutes: parsed_var(
                "APPOINTMENT_DURATION_MINUTES",
                defaults.appointment_duration_minutes,
            ),
            reminder_dispatch_interval_seconds: parsed_var(
                "REMINDER_DISPATCH_INTERVAL_SECONDS",
                defaults.reminder_dispatch_interval_seconds,
            ),
            notification_send_timeout_seconds: parsed_var(
                "NOTIFICATION_SEND_TIMEOUT_SECONDS",
                defaults.notification_send_timeout_seconds,
            ),
            smtp_host: string_var("SMTP_HOST", defaults.smtp_host),
            smtp_port: parsed_var("SMTP_PORT", defaults.smtp_port),
            smtp_username: string_var("SMTP_USERNAME", defaults.smtp_username),
            smtp_password: string_var("SMTP_PASSWORD", defaults.smtp_password),
            smtp_from_address: string_var("SMTP_FROM_ADDRESS", defaults.smtp_from_address),
            clinic_name: string_var("CLINIC_NAME", defaults.clinic_name),
        };

        if !config.is_configured() {
            warn!("Record store not configured - missing Supabase environment variables");
        }
        if !config.is_email_configured() {
            warn!("SMTP not configured - email reminders will fail");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_service_key.is_empty()
    }

    pub fn is_email_configured(&self) -> bool {
        !self.smtp_host.is_empty() && !self.smtp_from_address.is_empty()
    }
}

fn string_var(key: &str, default: String) -> String {
    env::var(key).unwrap_or_else(|_| {
        if default.is_empty() {
            warn!("{} not set, using empty value", key);
        } else {
            warn!("{} not set, using default", key);
        }
        default
    })
}

fn parsed_var<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
