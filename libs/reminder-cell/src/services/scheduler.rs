use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use shared_config::AppConfig;
use shared_database::ClinicStore;
use shared_models::ReminderStatus;

use crate::models::{TickOutcome, TickReport};
use crate::services::dispatcher::NotificationDispatcher;

/// Periodically delivers due reminders. At most one tick runs at a time.
pub struct ReminderDispatchLoop {
    store: Arc<dyn ClinicStore>,
    dispatcher: Arc<NotificationDispatcher>,
    tick_interval: Duration,
    tick_in_progress: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

/// Clears the tick flag when the tick ends, including on panic.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickGuard(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ReminderDispatchLoop {
    pub fn new(
        store: Arc<dyn ClinicStore>,
        dispatcher: Arc<NotificationDispatcher>,
        config: &AppConfig,
    ) -> Self {
        Self::with_interval(
            store,
            dispatcher,
            Duration::from_secs(config.reminder_dispatch_interval_seconds.max(1)),
        )
    }

    pub fn with_interval(
        store: Arc<dyn ClinicStore>,
        dispatcher: Arc<NotificationDispatcher>,
        tick_interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            dispatcher,
            tick_interval,
            tick_in_progress: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Delivers every reminder due at `now`. One failing reminder never
    /// stops the rest of the batch; a store error leaves it pending.
    #[instrument(skip(self))]
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickOutcome {
        let Some(_guard) = TickGuard::acquire(&self.tick_in_progress) else {
            warn!("Previous reminder dispatch tick still running, skipping");
            return TickOutcome::Skipped;
        };

        let mut report = TickReport::default();

        let due = match self.store.due_reminders(now).await {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to load due reminders: {}", e);
                report.errors += 1;
                return TickOutcome::Completed(report);
            }
        };

        report.due = due.len();
        if due.is_empty() {
            debug!("No reminders due");
            return TickOutcome::Completed(report);
        }

        info!("Dispatching {} due reminders", due.len());

        for reminder in due {
            match self.dispatcher.deliver(reminder.id).await {
                Ok(Some(ReminderStatus::Sent)) => report.sent += 1,
                Ok(Some(ReminderStatus::Failed)) => report.failed += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    error!("Failed to process reminder {}: {}", reminder.id, e);
                    report.errors += 1;
                }
            }
        }

        info!(
            "Dispatch tick finished: {} sent, {} failed, {} skipped, {} errors",
            report.sent, report.failed, report.skipped, report.errors
        );
        TickOutcome::Completed(report)
    }

    /// Spawns the ticker. Runs until `shutdown` is called.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if *shutdown_rx.borrow() {
                return;
            }

            info!("Reminder dispatch loop started, interval {:?}", self.tick_interval);

            let mut ticker = interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_tick(Utc::now()).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Reminder dispatch loop stopped");
        })
    }

    pub fn shutdown(&self) {
        info!("Stopping reminder dispatch loop");
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_tick_running(&self) -> bool {
        self.tick_in_progress.load(Ordering::Acquire)
    }
}
