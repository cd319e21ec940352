//! Pipeline repository.
//!
//! Pipelines own jobs and resources. Saving a pipeline upserts both by name
//! so ids (and therefore build history) survive re-configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use switchyard_core::pipeline::{JobConfig, PipelineConfig, VersionedResourceType};
use switchyard_core::{BuildId, JobId, PipelineId, ResourceId};
use uuid::Uuid;

use super::event::notify_pipeline_builds;
use crate::{DbError, DbResult};

/// A pipeline record in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub id: PipelineId,
    pub name: String,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PipelineRow {
    pub id: Uuid,
    pub name: String,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
}

impl From<PipelineRow> for PipelineRecord {
    fn from(row: PipelineRow) -> Self {
        PipelineRecord {
            id: PipelineId::from_uuid(row.id),
            name: row.name,
            paused: row.paused,
            created_at: row.created_at,
        }
    }
}

/// A job record in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub pipeline_id: PipelineId,
    pub name: String,
    pub config: JobConfig,
    pub paused: bool,
    /// Whether the latest resolution pass resolved every input.
    pub inputs_determined: bool,
    /// Set by the last scheduling attempt that hit `max_in_flight`.
    pub max_in_flight_reached: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    pub config: serde_json::Value,
    pub paused: bool,
    pub inputs_determined: bool,
    pub max_in_flight_reached: bool,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = DbError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(JobRecord {
            id: JobId::from_uuid(row.id),
            pipeline_id: PipelineId::from_uuid(row.pipeline_id),
            name: row.name,
            config: serde_json::from_value(row.config)?,
            paused: row.paused,
            inputs_determined: row.inputs_determined,
            max_in_flight_reached: row.max_in_flight_reached,
        })
    }
}

/// A resource record in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub pipeline_id: PipelineId,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub source: serde_json::Value,
    /// Resource types of the last put against this resource.
    pub resource_types: Vec<VersionedResourceType>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResourceRow {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    #[sqlx(rename = "type")]
    pub resource_type: String,
    pub source: serde_json::Value,
    pub resource_types: serde_json::Value,
}

impl TryFrom<ResourceRow> for ResourceRecord {
    type Error = DbError;

    fn try_from(row: ResourceRow) -> Result<Self, Self::Error> {
        Ok(ResourceRecord {
            id: ResourceId::from_uuid(row.id),
            pipeline_id: PipelineId::from_uuid(row.pipeline_id),
            name: row.name,
            resource_type: row.resource_type,
            source: row.source,
            resource_types: serde_json::from_value(row.resource_types)?,
        })
    }
}

#[async_trait]
pub trait PipelineRepo: Send + Sync {
    /// Create or update a pipeline by name. The flag is true when the
    /// pipeline was created.
    async fn save_pipeline(
        &self,
        name: &str,
        config: &PipelineConfig,
    ) -> DbResult<(PipelineRecord, bool)>;
    async fn pipeline(&self, id: PipelineId) -> DbResult<Option<PipelineRecord>>;
    async fn pipeline_by_name(&self, name: &str) -> DbResult<Option<PipelineRecord>>;
    async fn set_pipeline_paused(&self, id: PipelineId, paused: bool) -> DbResult<bool>;
    /// Delete a pipeline with its jobs, resources, builds and events.
    async fn destroy_pipeline(&self, id: PipelineId) -> DbResult<bool>;

    async fn job(&self, id: JobId) -> DbResult<Option<JobRecord>>;
    async fn job_by_name(&self, pipeline_id: PipelineId, name: &str)
    -> DbResult<Option<JobRecord>>;
    async fn set_job_paused(&self, id: JobId, paused: bool) -> DbResult<bool>;

    async fn resource(&self, id: ResourceId) -> DbResult<Option<ResourceRecord>>;
    async fn resource_by_name(
        &self,
        pipeline_id: PipelineId,
        name: &str,
    ) -> DbResult<Option<ResourceRecord>>;

    /// Mark a pending build of the job as scheduled if nothing holds it
    /// back. Returns true when the build is (or already was) scheduled.
    async fn schedule_build(&self, job_id: JobId, build_id: BuildId) -> DbResult<bool>;
}

/// PostgreSQL implementation of PipelineRepo.
pub struct PgPipelineRepo {
    pool: PgPool,
}

impl PgPipelineRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SchedulingRow {
    job_paused: bool,
    pipeline_paused: bool,
    inputs_determined: bool,
    config: serde_json::Value,
}

#[async_trait]
impl PipelineRepo for PgPipelineRepo {
    async fn save_pipeline(
        &self,
        name: &str,
        config: &PipelineConfig,
    ) -> DbResult<(PipelineRecord, bool)> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, PipelineRow>(
            r#"
            INSERT INTO pipelines (id, name, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (name) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(PipelineId::new().as_uuid())
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        let (row, created) = match inserted {
            Some(row) => (row, true),
            None => {
                let row = sqlx::query_as::<_, PipelineRow>(
                    "SELECT * FROM pipelines WHERE name = $1 FOR UPDATE",
                )
                .bind(name)
                .fetch_one(&mut *tx)
                .await?;
                (row, false)
            }
        };

        for job in &config.jobs {
            sqlx::query(
                r#"
                INSERT INTO jobs (id, pipeline_id, name, config)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (pipeline_id, name) DO UPDATE SET config = EXCLUDED.config
                "#,
            )
            .bind(JobId::new().as_uuid())
            .bind(row.id)
            .bind(&job.name)
            .bind(serde_json::to_value(job)?)
            .execute(&mut *tx)
            .await?;
        }

        for resource in &config.resources {
            sqlx::query(
                r#"
                INSERT INTO resources (id, pipeline_id, name, type, source)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (pipeline_id, name) DO UPDATE
                SET type = EXCLUDED.type, source = EXCLUDED.source
                "#,
            )
            .bind(ResourceId::new().as_uuid())
            .bind(row.id)
            .bind(&resource.name)
            .bind(&resource.resource_type)
            .bind(&resource.source)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok((row.into(), created))
    }

    async fn pipeline(&self, id: PipelineId) -> DbResult<Option<PipelineRecord>> {
        let row = sqlx::query_as::<_, PipelineRow>("SELECT * FROM pipelines WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn pipeline_by_name(&self, name: &str) -> DbResult<Option<PipelineRecord>> {
        let row = sqlx::query_as::<_, PipelineRow>("SELECT * FROM pipelines WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn set_pipeline_paused(&self, id: PipelineId, paused: bool) -> DbResult<bool> {
        let result = sqlx::query("UPDATE pipelines SET paused = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(paused)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn destroy_pipeline(&self, id: PipelineId) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        notify_pipeline_builds(&mut tx, *id.as_uuid()).await?;
        let result = sqlx::query("DELETE FROM pipelines WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn job(&self, id: JobId) -> DbResult<Option<JobRecord>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(JobRecord::try_from)
            .transpose()
    }

    async fn job_by_name(
        &self,
        pipeline_id: PipelineId,
        name: &str,
    ) -> DbResult<Option<JobRecord>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE pipeline_id = $1 AND name = $2")
            .bind(pipeline_id.as_uuid())
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .map(JobRecord::try_from)
            .transpose()
    }

    async fn set_job_paused(&self, id: JobId, paused: bool) -> DbResult<bool> {
        let result = sqlx::query("UPDATE jobs SET paused = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(paused)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn resource(&self, id: ResourceId) -> DbResult<Option<ResourceRecord>> {
        sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(ResourceRecord::try_from)
            .transpose()
    }

    async fn resource_by_name(
        &self,
        pipeline_id: PipelineId,
        name: &str,
    ) -> DbResult<Option<ResourceRecord>> {
        sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources WHERE pipeline_id = $1 AND name = $2",
        )
        .bind(pipeline_id.as_uuid())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .map(ResourceRecord::try_from)
        .transpose()
    }

    async fn schedule_build(&self, job_id: JobId, build_id: BuildId) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, SchedulingRow>(
            r#"
            SELECT j.paused AS job_paused, p.paused AS pipeline_paused,
                   j.inputs_determined, j.config
            FROM jobs j
            JOIN pipelines p ON p.id = j.pipeline_id
            WHERE j.id = $1
            FOR UPDATE OF j
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(job) = job else {
            return Ok(false);
        };

        let scheduled: Option<bool> = sqlx::query_scalar(
            "SELECT scheduled FROM builds WHERE id = $1 AND job_id = $2 FOR UPDATE",
        )
        .bind(build_id.as_uuid())
        .bind(job_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        match scheduled {
            None => return Ok(false),
            Some(true) => return Ok(true),
            Some(false) => {}
        }

        if job.pipeline_paused || job.job_paused {
            return Ok(false);
        }

        let config: JobConfig = serde_json::from_value(job.config)?;
        let max_in_flight_reached = if config.max_in_flight > 0 {
            let (running, older_pending): (i64, bool) = sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM builds
                     WHERE job_id = $1 AND id <> $2 AND NOT completed
                       AND (scheduled OR status = 'started')),
                    EXISTS (SELECT 1 FROM builds
                            WHERE job_id = $1 AND id < $2 AND status = 'pending'
                              AND NOT scheduled AND NOT aborted)
                "#,
            )
            .bind(job_id.as_uuid())
            .bind(build_id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;

            running >= i64::from(config.max_in_flight) || older_pending
        } else {
            false
        };

        sqlx::query("UPDATE jobs SET max_in_flight_reached = $2 WHERE id = $1")
            .bind(job_id.as_uuid())
            .bind(max_in_flight_reached)
            .execute(&mut *tx)
            .await?;

        let scheduled = !max_in_flight_reached && job.inputs_determined;
        if scheduled {
            sqlx::query("UPDATE builds SET scheduled = TRUE WHERE id = $1")
                .bind(build_id.as_uuid())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(scheduled)
    }
}
