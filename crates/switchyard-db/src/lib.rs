//! Database layer for the Switchyard build scheduler.
//!
//! Provides repository traits with PostgreSQL and in-memory
//! implementations, plus the machinery for following build event logs.

pub mod cursor;
pub mod error;
pub mod hub;
pub mod listener;
pub mod memory;
pub mod repo;

pub use cursor::EventCursor;
pub use error::{DbError, DbResult};
pub use hub::{EventHub, Subscription};
pub use memory::MemoryStore;
pub use repo::*;

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use switchyard_core::BuildId;

/// Events fetched per round trip when no batch size is configured.
pub const DEFAULT_EVENT_BATCH_SIZE: usize = 100;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// The repositories of one backing store, plus the hub that wakes event
/// subscribers.
#[derive(Clone)]
pub struct Database {
    pub builds: Arc<dyn BuildRepo>,
    pub events: Arc<dyn EventRepo>,
    pub algorithm: Arc<dyn AlgorithmRepo>,
    pub pipelines: Arc<dyn PipelineRepo>,
    pub hub: EventHub,
    event_batch_size: usize,
}

impl Database {
    /// PostgreSQL-backed repositories. Spawns the notification listener, so
    /// this must be called from within a Tokio runtime.
    pub fn postgres(pool: PgPool) -> Self {
        let hub = EventHub::new();
        listener::spawn_event_listener(pool.clone(), hub.clone());

        Self {
            builds: Arc::new(PgBuildRepo::new(pool.clone())),
            events: Arc::new(PgEventRepo::new(pool.clone())),
            algorithm: Arc::new(PgAlgorithmRepo::new(pool.clone())),
            pipelines: Arc::new(PgPipelineRepo::new(pool)),
            hub,
            event_batch_size: DEFAULT_EVENT_BATCH_SIZE,
        }
    }

    pub fn in_memory() -> Self {
        let hub = EventHub::new();
        let store = Arc::new(MemoryStore::new(hub.clone()));

        Self {
            builds: store.clone(),
            events: store.clone(),
            algorithm: store.clone(),
            pipelines: store,
            hub,
            event_batch_size: DEFAULT_EVENT_BATCH_SIZE,
        }
    }

    pub fn with_event_batch_size(mut self, batch_size: usize) -> Self {
        self.event_batch_size = batch_size.max(1);
        self
    }

    /// A cursor over a build's events starting at event id `from`.
    pub fn events(&self, build_id: BuildId, from: u64) -> EventCursor {
        EventCursor::new(
            build_id,
            from,
            self.events.clone(),
            self.hub.clone(),
            self.event_batch_size,
        )
    }
}
