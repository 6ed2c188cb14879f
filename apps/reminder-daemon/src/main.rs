use std::sync::Arc;
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reminder_cell::{NotificationDispatcher, ReminderDispatchLoop};
use shared_config::AppConfig;
use shared_database::{ClinicStore, MemoryStore, SupabaseStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic reminder daemon");

    let config = AppConfig::from_env();

    let store: Arc<dyn ClinicStore> = if config.is_configured() {
        info!("Using Supabase store at {}", config.supabase_url);
        Arc::new(SupabaseStore::new(&config))
    } else {
        warn!("Supabase is not configured, reminders will be kept in memory only");
        Arc::new(MemoryStore::new())
    };

    let dispatcher = Arc::new(NotificationDispatcher::from_config(store.clone(), &config)?);
    let dispatch_loop = Arc::new(ReminderDispatchLoop::new(store, dispatcher, &config));

    let handle = dispatch_loop.clone().start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    dispatch_loop.shutdown();
    handle.await?;

    info!("Clinic reminder daemon stopped");
    Ok(())
}
