//! Shelfshare engine process
//!
//! Connects the stores, projects the catalogue into the read model, runs the
//! due-date reminder sweep and waits for shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shelfshare_server::{config::AppConfig, services::Services, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("shelfshare_server={}", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Shelfshare engine v{}", env!("CARGO_PKG_VERSION"));

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations completed");

    let services = Services::connect(&config, pool)
        .await
        .context("Failed to create services")?;

    // A failed sync leaves the projection empty; queries fall back and repair it
    if let Err(e) = services.initial_sync().await {
        tracing::warn!("Initial read model sync failed: {}", e);
    }

    let reminders = if config.reminders.enabled {
        let interval = Duration::from_secs(config.reminders.interval_secs.max(1));
        tracing::info!("Due date reminders every {}s", interval.as_secs());
        Some(services.reminders.clone().spawn(interval))
    } else {
        None
    };

    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    if let Some(handle) = reminders {
        handle.abort();
    }
    state.services.events.settle().await;

    Ok(())
}
