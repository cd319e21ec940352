//! Build repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use switchyard_core::{BuildId, BuildStatus, Event, JobId, PipelineId, Plan};
use uuid::Uuid;

use super::event::append_event;
use crate::{DbError, DbResult};

/// The durable state of one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: BuildId,
    pub name: String,
    pub job_id: Option<JobId>,
    pub pipeline_id: Option<PipelineId>,
    pub status: BuildStatus,
    /// Full plan; empty once the build completes.
    pub private_plan: Plan,
    /// Plan with sources, params and task configs redacted.
    pub public_plan: serde_json::Value,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub create_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub end_time: Option<DateTime<Utc>>,
    pub aborted: bool,
    pub drained: bool,
    pub scheduled: bool,
    pub completed: bool,
}

impl BuildRecord {
    pub fn is_one_off(&self) -> bool {
        self.job_id.is_none()
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }
}

/// Database row for builds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BuildRow {
    pub id: Uuid,
    pub name: String,
    pub job_id: Option<Uuid>,
    pub pipeline_id: Option<Uuid>,
    pub status: String,
    pub private_plan: Option<serde_json::Value>,
    pub public_plan: serde_json::Value,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub aborted: bool,
    pub drained: bool,
    pub scheduled: bool,
    pub completed: bool,
}

impl TryFrom<BuildRow> for BuildRecord {
    type Error = DbError;

    fn try_from(row: BuildRow) -> Result<Self, Self::Error> {
        let private_plan = match row.private_plan {
            Some(plan) => serde_json::from_value(plan)?,
            None => Plan::default(),
        };

        Ok(BuildRecord {
            id: BuildId::from_uuid(row.id),
            name: row.name,
            job_id: row.job_id.map(JobId::from_uuid),
            pipeline_id: row.pipeline_id.map(PipelineId::from_uuid),
            status: row.status.parse()?,
            private_plan,
            public_plan: row.public_plan,
            create_time: row.create_time,
            start_time: row.start_time,
            end_time: row.end_time,
            aborted: row.aborted,
            drained: row.drained,
            scheduled: row.scheduled,
            completed: row.completed,
        })
    }
}

#[async_trait]
pub trait BuildRepo: Send + Sync {
    /// Create a pending build with no job, named after its id.
    async fn create_one_off(&self) -> DbResult<BuildRecord>;

    /// Create a pending build of a job, named with the job's next build
    /// number. `None` when the job no longer exists.
    async fn create_for_job(&self, job_id: JobId) -> DbResult<Option<BuildRecord>>;

    async fn get(&self, id: BuildId) -> DbResult<Option<BuildRecord>>;

    /// Move a pending, non-aborted build to started. Returns false when the
    /// precondition does not hold.
    async fn start(&self, id: BuildId, plan: &Plan) -> DbResult<bool>;

    /// Complete a build with a terminal status. Returns false when the build
    /// is already completed or gone.
    async fn finish(&self, id: BuildId, status: BuildStatus) -> DbResult<bool>;

    async fn mark_as_aborted(&self, id: BuildId) -> DbResult<bool>;

    async fn set_drained(&self, id: BuildId, drained: bool) -> DbResult<bool>;
}

/// PostgreSQL implementation of BuildRepo.
pub struct PgBuildRepo {
    pool: PgPool,
}

impl PgBuildRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildRepo for PgBuildRepo {
    async fn create_one_off(&self) -> DbResult<BuildRecord> {
        let id = BuildId::new();
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            INSERT INTO builds (id, name, status, create_time)
            VALUES ($1, $2, 'pending', NOW())
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn create_for_job(&self, job_id: JobId) -> DbResult<Option<BuildRecord>> {
        let mut tx = self.pool.begin().await?;

        let job: Option<(i64, Uuid)> = sqlx::query_as(
            r#"
            UPDATE jobs SET build_number_seq = build_number_seq + 1
            WHERE id = $1
            RETURNING build_number_seq, pipeline_id
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((number, pipeline_id)) = job else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            INSERT INTO builds (id, name, job_id, pipeline_id, status, create_time)
            VALUES ($1, $2, $3, $4, 'pending', NOW())
            RETURNING *
            "#,
        )
        .bind(BuildId::new().as_uuid())
        .bind(number.to_string())
        .bind(job_id.as_uuid())
        .bind(pipeline_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row.try_into()?))
    }

    async fn get(&self, id: BuildId) -> DbResult<Option<BuildRecord>> {
        sqlx::query_as::<_, BuildRow>("SELECT * FROM builds WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(BuildRecord::try_from)
            .transpose()
    }

    async fn start(&self, id: BuildId, plan: &Plan) -> DbResult<bool> {
        let private_plan = serde_json::to_value(plan)?;
        let public_plan = plan.public();

        let mut tx = self.pool.begin().await?;

        let start_time: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE builds
            SET status = 'started', start_time = NOW(), private_plan = $2, public_plan = $3
            WHERE id = $1 AND status = 'pending' AND NOT aborted
            RETURNING start_time
            "#,
        )
        .bind(id.as_uuid())
        .bind(private_plan)
        .bind(public_plan)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(start_time) = start_time else {
            return Ok(false);
        };

        let event = Event::status(BuildStatus::Started, start_time.timestamp()).envelope()?;
        append_event(&mut tx, id, &event).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn finish(&self, id: BuildId, status: BuildStatus) -> DbResult<bool> {
        if !status.is_completed() {
            return Err(DbError::InvalidStatus(status));
        }

        let mut tx = self.pool.begin().await?;

        let finished: Option<(DateTime<Utc>, Option<Uuid>)> = sqlx::query_as(
            r#"
            UPDATE builds
            SET status = $2, end_time = NOW(), completed = TRUE, private_plan = NULL
            WHERE id = $1 AND NOT completed
            RETURNING end_time, job_id
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((end_time, job_id)) = finished else {
            return Ok(false);
        };

        let event = Event::status(status, end_time.timestamp()).envelope()?;
        append_event(&mut tx, id, &event).await?;

        if let (BuildStatus::Succeeded, Some(job_id)) = (status, job_id) {
            // Outputs go in first so they win over an input of the same name.
            sqlx::query(
                r#"
                INSERT INTO successful_build_outputs (build_id, job_id, resource_id, version_md5, name)
                SELECT build_id, $2, resource_id, version_md5, output_name
                FROM build_outputs WHERE build_id = $1
                ON CONFLICT (build_id, name) DO NOTHING
                "#,
            )
            .bind(id.as_uuid())
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO successful_build_outputs (build_id, job_id, resource_id, version_md5, name)
                SELECT build_id, $2, resource_id, version_md5, input_name
                FROM build_inputs WHERE build_id = $1
                ON CONFLICT (build_id, name) DO NOTHING
                "#,
            )
            .bind(id.as_uuid())
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn mark_as_aborted(&self, id: BuildId) -> DbResult<bool> {
        let result = sqlx::query("UPDATE builds SET aborted = TRUE WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_drained(&self, id: BuildId, drained: bool) -> DbResult<bool> {
        let result = sqlx::query("UPDATE builds SET drained = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(drained)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
