//! CLI command implementations.

pub mod builds;
pub mod pipelines;

use anyhow::{Context, Result};
use switchyard_config::SystemConfig;
use switchyard_db::{Database, create_pool, run_migrations};
use switchyard_scheduler::Orchestrator;
use tracing::info;

/// Connect to PostgreSQL, migrating first unless disabled in the config.
pub async fn connect(database_url: &str, config: &SystemConfig) -> Result<Orchestrator> {
    let pool = create_pool(database_url, config.database.max_connections)
        .await
        .context("Failed to connect to database")?;
    if config.database.migrate {
        run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;
    }

    let db = Database::postgres(pool).with_event_batch_size(config.events.batch_size);
    Ok(Orchestrator::new(db))
}

pub async fn migrate(database_url: &str, config: &SystemConfig) -> Result<()> {
    let pool = create_pool(database_url, config.database.max_connections)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Migrations applied");
    Ok(())
}
