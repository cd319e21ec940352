//! Build event repository.
//!
//! Events are appended under the build row lock: the row's `next_event_id`
//! counter hands out gapless ids, and the same transaction publishes a
//! notification on [`EVENTS_CHANNEL`] with the build id as payload.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use switchyard_core::{BuildEvent, BuildId, Envelope, Event};
use uuid::Uuid;

use crate::DbResult;

/// Postgres notification channel carrying the id of a build with new events.
pub const EVENTS_CHANNEL: &str = "build_events";

/// A slice of a build's event log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPage {
    pub events: Vec<BuildEvent>,
    /// Whether the build was completed before `events` was read. A completed
    /// build with an empty page has nothing more to say.
    pub completed: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct EventRow {
    event_id: i64,
    event_type: String,
    version: String,
    payload: serde_json::Value,
}

impl EventRow {
    fn into_build_event(self, build_id: BuildId) -> DbResult<BuildEvent> {
        Ok(BuildEvent {
            build_id,
            event_id: self.event_id as u64,
            envelope: Envelope {
                event: self.event_type.parse()?,
                version: self.version,
                data: self.payload,
            },
        })
    }
}

#[async_trait]
pub trait EventRepo: Send + Sync {
    /// Append an event and return its id. `None` when the build is gone.
    async fn append(&self, build_id: BuildId, event: &Event) -> DbResult<Option<u64>>;

    /// Read up to `limit` events with ids from `from` onwards. `None` when
    /// the build is gone.
    async fn fetch(&self, build_id: BuildId, from: u64, limit: usize)
    -> DbResult<Option<EventPage>>;
}

/// Append an event inside the caller's transaction.
pub(crate) async fn append_event(
    conn: &mut PgConnection,
    build_id: BuildId,
    envelope: &Envelope,
) -> DbResult<Option<u64>> {
    let event_id: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE builds SET next_event_id = next_event_id + 1
        WHERE id = $1
        RETURNING next_event_id - 1
        "#,
    )
    .bind(build_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(event_id) = event_id else {
        return Ok(None);
    };

    sqlx::query(
        r#"
        INSERT INTO build_events (build_id, event_id, type, version, payload)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(build_id.as_uuid())
    .bind(event_id)
    .bind(envelope.event.as_str())
    .bind(&envelope.version)
    .bind(&envelope.data)
    .execute(&mut *conn)
    .await?;

    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(EVENTS_CHANNEL)
        .bind(build_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(Some(event_id as u64))
}

/// PostgreSQL implementation of EventRepo.
pub struct PgEventRepo {
    pool: PgPool,
}

impl PgEventRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepo for PgEventRepo {
    async fn append(&self, build_id: BuildId, event: &Event) -> DbResult<Option<u64>> {
        let envelope = event.envelope()?;
        let mut tx = self.pool.begin().await?;
        let event_id = append_event(&mut tx, build_id, &envelope).await?;
        tx.commit().await?;
        Ok(event_id)
    }

    async fn fetch(
        &self,
        build_id: BuildId,
        from: u64,
        limit: usize,
    ) -> DbResult<Option<EventPage>> {
        // Read the flag first: the final status event commits together with
        // it, so a completed build's page always includes that event.
        let completed: Option<bool> =
            sqlx::query_scalar("SELECT completed FROM builds WHERE id = $1")
                .bind(build_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        let Some(completed) = completed else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT event_id, type AS event_type, version, payload
            FROM build_events
            WHERE build_id = $1 AND event_id >= $2
            ORDER BY event_id
            LIMIT $3
            "#,
        )
        .bind(build_id.as_uuid())
        .bind(from as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let events = rows
            .into_iter()
            .map(|row| row.into_build_event(build_id))
            .collect::<DbResult<Vec<_>>>()?;

        Ok(Some(EventPage { events, completed }))
    }
}

/// Wake the subscribers of every build of a pipeline about to be deleted.
pub(crate) async fn notify_pipeline_builds(
    conn: &mut PgConnection,
    pipeline_id: Uuid,
) -> DbResult<()> {
    sqlx::query("SELECT pg_notify($1, id::text) FROM builds WHERE pipeline_id = $2")
        .bind(EVENTS_CHANNEL)
        .bind(pipeline_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
