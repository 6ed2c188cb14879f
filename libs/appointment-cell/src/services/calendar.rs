use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use shared_database::ClinicStore;
use shared_models::{Appointment, AppointmentStatus};

use crate::models::{CalendarAppointment, ReminderScheduleInfo};

/// Read-only appointment listings. Store failures yield empty results.
pub struct CalendarService {
    store: Arc<dyn ClinicStore>,
}

impl CalendarService {
    pub fn new(store: Arc<dyn ClinicStore>) -> Self {
        Self { store }
    }

    pub async fn day(&self, date: NaiveDate) -> Vec<CalendarAppointment> {
        let start = start_of(date);
        self.range(start, start + Duration::days(1)).await
    }

    /// Seven days starting at `start`.
    pub async fn week(&self, start: NaiveDate) -> Vec<CalendarAppointment> {
        let start = start_of(start);
        self.range(start, start + Duration::weeks(1)).await
    }

    pub async fn month(&self, year: i32, month: u32) -> Vec<CalendarAppointment> {
        let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
            warn!("Invalid calendar month {}-{}", year, month);
            return Vec::new();
        };
        let start = start_of(first);
        let Some(end) = start.checked_add_months(Months::new(1)) else {
            return Vec::new();
        };
        self.range(start, end).await
    }

    /// Appointments starting in `[from, to)`.
    pub async fn range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<CalendarAppointment> {
        let appointments = match self.store.appointments_between(from, to).await {
            Ok(appointments) => appointments,
            Err(e) => {
                warn!("Failed to load appointments from {} to {}: {}", from, to, e);
                return Vec::new();
            }
        };

        debug!("Found {} appointments from {} to {}", appointments.len(), from, to);
        self.with_schedules(appointments).await
    }

    /// Scheduled appointments over the next three months.
    pub async fn upcoming(&self, now: DateTime<Utc>) -> Vec<CalendarAppointment> {
        let Some(end) = now.checked_add_months(Months::new(3)) else {
            return Vec::new();
        };

        let mut entries = self.range(now, end).await;
        entries.retain(|entry| entry.appointment.status == AppointmentStatus::Scheduled);
        entries
    }

    async fn with_schedules(&self, appointments: Vec<Appointment>) -> Vec<CalendarAppointment> {
        let mut entries = Vec::with_capacity(appointments.len());

        for appointment in appointments {
            let reminders = match self.store.reminders_for_appointment(appointment.id).await {
                Ok(reminders) => reminders.iter().map(ReminderScheduleInfo::from).collect(),
                Err(e) => {
                    warn!("Failed to load reminders for appointment {}: {}", appointment.id, e);
                    Vec::new()
                }
            };
            entries.push(CalendarAppointment {
                appointment,
                reminders,
            });
        }

        entries
    }
}

fn start_of(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
