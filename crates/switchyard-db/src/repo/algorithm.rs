//! Version resolution store.
//!
//! Holds what the input resolver works from (resource versions, successful
//! build outputs, build pipes) and what it produces (a job's "next" input
//! mapping), and hands the latter over to a committed build.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use switchyard_core::pipeline::VersionedResourceType;
use switchyard_core::{
    AlgorithmInput, AlgorithmOutput, AlgorithmVersion, BuildId, BuildPipe, InputMapping, InputResult, JobId,
    MetadataField, ResourceId, ResourceVersion, Version,
};
use uuid::Uuid;

use crate::DbResult;

/// A version of a resource as recorded by checks and puts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceVersionRecord {
    pub resource_id: ResourceId,
    pub version: Version,
    pub fingerprint: ResourceVersion,
    pub metadata: Vec<MetadataField>,
    /// Higher is newer.
    pub check_order: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResourceVersionRow {
    pub resource_id: Uuid,
    pub version_md5: String,
    pub version: serde_json::Value,
    pub metadata: serde_json::Value,
    pub check_order: i64,
}

impl TryFrom<ResourceVersionRow> for ResourceVersionRecord {
    type Error = crate::DbError;

    fn try_from(row: ResourceVersionRow) -> Result<Self, Self::Error> {
        Ok(ResourceVersionRecord {
            resource_id: ResourceId::from_uuid(row.resource_id),
            version: serde_json::from_value(row.version)?,
            fingerprint: ResourceVersion::from_hex(row.version_md5),
            metadata: serde_json::from_value(row.metadata)?,
            check_order: row.check_order,
        })
    }
}

/// An input committed onto a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInput {
    pub name: String,
    pub resource_id: ResourceId,
    pub version: Version,
    pub first_occurrence: bool,
}

/// An explicit output recorded by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    pub name: String,
    pub resource_id: ResourceId,
    pub version: Version,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct BuildResourceRow {
    name: String,
    resource_id: Uuid,
    version: serde_json::Value,
    first_occurrence: Option<bool>,
}

impl BuildResourceRow {
    fn into_input(self) -> DbResult<BuildInput> {
        Ok(BuildInput {
            name: self.name,
            resource_id: ResourceId::from_uuid(self.resource_id),
            version: serde_json::from_value(self.version)?,
            first_occurrence: self.first_occurrence.unwrap_or(false),
        })
    }

    fn into_output(self) -> DbResult<BuildOutput> {
        Ok(BuildOutput {
            name: self.name,
            resource_id: ResourceId::from_uuid(self.resource_id),
            version: serde_json::from_value(self.version)?,
        })
    }
}

/// A version produced by a `put`, with the resource config it ran against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputVersion {
    pub resource_name: String,
    pub output_name: String,
    pub resource_type: String,
    pub source: serde_json::Value,
    pub resource_types: Vec<VersionedResourceType>,
    pub version: Version,
    pub metadata: Vec<MetadataField>,
}

/// A job's latest resolution pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NextInputs {
    pub mapping: InputMapping,
    /// Whether every configured input resolved.
    pub resolved: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct NextInputRow {
    input_name: String,
    resource_id: Option<Uuid>,
    version_md5: Option<String>,
    first_occurrence: Option<bool>,
    passed_build_ids: Vec<Uuid>,
    resolve_error: Option<String>,
    resolve_skipped: bool,
}

impl NextInputRow {
    fn into_result(self) -> (String, InputResult) {
        let result = match (self.resolve_skipped, self.resolve_error) {
            (true, _) => InputResult::ResolveSkipped,
            (false, Some(message)) => InputResult::error(message),
            (false, None) => match (self.resource_id, self.version_md5) {
                (Some(resource_id), Some(md5)) => InputResult::resolved(
                    AlgorithmInput {
                        version: AlgorithmVersion::new(
                            ResourceId::from_uuid(resource_id),
                            ResourceVersion::from_hex(md5),
                        ),
                        first_occurrence: self.first_occurrence.unwrap_or(false),
                    },
                    self.passed_build_ids
                        .into_iter()
                        .map(BuildId::from_uuid)
                        .collect(),
                ),
                _ => InputResult::ResolveSkipped,
            },
        };
        (self.input_name, result)
    }
}

#[async_trait]
pub trait AlgorithmRepo: Send + Sync {
    /// Record versions discovered by a check. Every saved version moves to
    /// the top of the check order, the last one highest. Returns false when
    /// the resource is gone.
    async fn save_versions(&self, resource_id: ResourceId, versions: &[Version])
    -> DbResult<bool>;

    async fn find_version(
        &self,
        resource_id: ResourceId,
        version: &Version,
    ) -> DbResult<Option<ResourceVersionRecord>>;

    /// Versions of a resource, newest first.
    async fn versions(&self, resource_id: ResourceId) -> DbResult<Vec<ResourceVersionRecord>>;

    /// Replace the job's next inputs and pipes. Returns false when the job
    /// is gone.
    async fn save_next_input_mapping(
        &self,
        job_id: JobId,
        mapping: &InputMapping,
        resolved: bool,
    ) -> DbResult<bool>;

    async fn next_input_mapping(&self, job_id: JobId) -> DbResult<Option<NextInputs>>;

    /// Commit the job's next inputs and pipes onto the build and clear them.
    /// `None` when the build has no job or the inputs are not determined.
    async fn adopt_inputs_and_pipes(&self, build_id: BuildId) -> DbResult<Option<Vec<BuildInput>>>;

    /// Record an explicit output. Returns false when the build has no
    /// pipeline or the resource is not part of it.
    async fn save_output(&self, build_id: BuildId, output: &OutputVersion) -> DbResult<bool>;

    async fn resources(&self, build_id: BuildId) -> DbResult<(Vec<BuildInput>, Vec<BuildOutput>)>;

    async fn successful_build_outputs(&self, build_id: BuildId)
    -> DbResult<Vec<AlgorithmOutput>>;

    /// Every upstream build committed as a pipe into `to_build_id`.
    async fn build_pipes(&self, to_build_id: BuildId) -> DbResult<Vec<BuildPipe>>;

    /// The latest upstream build of each passed job that fed `to_build_id`.
    async fn latest_build_pipes(
        &self,
        to_build_id: BuildId,
        passed_jobs: &[JobId],
    ) -> DbResult<HashMap<JobId, BuildId>>;
}

/// PostgreSQL implementation of AlgorithmRepo.
pub struct PgAlgorithmRepo {
    pool: PgPool,
}

impl PgAlgorithmRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn fetch_build_inputs(conn: &mut PgConnection, build_id: BuildId) -> DbResult<Vec<BuildInput>> {
    sqlx::query_as::<_, BuildResourceRow>(
        r#"
        SELECT bi.input_name AS name, bi.resource_id, rv.version, bi.first_occurrence
        FROM build_inputs bi
        JOIN resource_versions rv
          ON rv.resource_id = bi.resource_id AND rv.version_md5 = bi.version_md5
        WHERE bi.build_id = $1
        ORDER BY bi.input_name
        "#,
    )
    .bind(build_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(BuildResourceRow::into_input)
    .collect()
}

#[async_trait]
impl AlgorithmRepo for PgAlgorithmRepo {
    async fn save_versions(
        &self,
        resource_id: ResourceId,
        versions: &[Version],
    ) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM resources WHERE id = $1 FOR UPDATE")
                .bind(resource_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Ok(false);
        }

        let mut check_order: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(check_order), 0) FROM resource_versions WHERE resource_id = $1",
        )
        .bind(resource_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

        for version in versions {
            check_order += 1;
            sqlx::query(
                r#"
                INSERT INTO resource_versions (resource_id, version_md5, version, check_order)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (resource_id, version_md5) DO UPDATE SET check_order = EXCLUDED.check_order
                "#,
            )
            .bind(resource_id.as_uuid())
            .bind(version.fingerprint().as_str())
            .bind(serde_json::to_value(version)?)
            .bind(check_order)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn find_version(
        &self,
        resource_id: ResourceId,
        version: &Version,
    ) -> DbResult<Option<ResourceVersionRecord>> {
        sqlx::query_as::<_, ResourceVersionRow>(
            "SELECT * FROM resource_versions WHERE resource_id = $1 AND version_md5 = $2",
        )
        .bind(resource_id.as_uuid())
        .bind(version.fingerprint().as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(ResourceVersionRecord::try_from)
        .transpose()
    }

    async fn versions(&self, resource_id: ResourceId) -> DbResult<Vec<ResourceVersionRecord>> {
        sqlx::query_as::<_, ResourceVersionRow>(
            "SELECT * FROM resource_versions WHERE resource_id = $1 ORDER BY check_order DESC",
        )
        .bind(resource_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ResourceVersionRecord::try_from)
        .collect()
    }

    async fn save_next_input_mapping(
        &self,
        job_id: JobId,
        mapping: &InputMapping,
        resolved: bool,
    ) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE jobs SET inputs_determined = $2 WHERE id = $1")
            .bind(job_id.as_uuid())
            .bind(resolved)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM next_build_inputs WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM next_build_pipes WHERE to_job_id = $1")
            .bind(job_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        for (name, result) in mapping.iter() {
            let query = sqlx::query(
                r#"
                INSERT INTO next_build_inputs
                    (job_id, input_name, resource_id, version_md5, first_occurrence,
                     passed_build_ids, resolve_error, resolve_skipped)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(job_id.as_uuid())
            .bind(name);

            let query = match result {
                InputResult::Resolved {
                    input,
                    passed_build_ids,
                } => query
                    .bind(Some(*input.version.resource_id.as_uuid()))
                    .bind(Some(input.version.version.as_str()))
                    .bind(Some(input.first_occurrence))
                    .bind(
                        passed_build_ids
                            .iter()
                            .map(|id| *id.as_uuid())
                            .collect::<Vec<Uuid>>(),
                    )
                    .bind(None::<&str>)
                    .bind(false),
                InputResult::ResolveError { message } => query
                    .bind(None::<Uuid>)
                    .bind(None::<&str>)
                    .bind(None::<bool>)
                    .bind(Vec::<Uuid>::new())
                    .bind(Some(message.as_str()))
                    .bind(false),
                InputResult::ResolveSkipped => query
                    .bind(None::<Uuid>)
                    .bind(None::<&str>)
                    .bind(None::<bool>)
                    .bind(Vec::<Uuid>::new())
                    .bind(None::<&str>)
                    .bind(true),
            };
            query.execute(&mut *tx).await?;
        }

        for from_build_id in mapping.passed_build_ids() {
            sqlx::query(
                r#"
                INSERT INTO next_build_pipes (to_job_id, from_build_id)
                SELECT $1, id FROM builds WHERE id = $2
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(job_id.as_uuid())
            .bind(from_build_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn next_input_mapping(&self, job_id: JobId) -> DbResult<Option<NextInputs>> {
        let resolved: Option<bool> =
            sqlx::query_scalar("SELECT inputs_determined FROM jobs WHERE id = $1")
                .bind(job_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        let Some(resolved) = resolved else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, NextInputRow>(
            r#"
            SELECT input_name, resource_id, version_md5, first_occurrence,
                   passed_build_ids, resolve_error, resolve_skipped
            FROM next_build_inputs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(NextInputs {
            mapping: rows.into_iter().map(NextInputRow::into_result).collect(),
            resolved,
        }))
    }

    async fn adopt_inputs_and_pipes(&self, build_id: BuildId) -> DbResult<Option<Vec<BuildInput>>> {
        let mut tx = self.pool.begin().await?;

        let job_id: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT job_id FROM builds WHERE id = $1 FOR UPDATE")
                .bind(build_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let Some(Some(job_id)) = job_id else {
            return Ok(None);
        };

        // Locking the job serializes adoption against resolution passes and
        // against other builds of the same job.
        let determined: Option<bool> =
            sqlx::query_scalar("SELECT inputs_determined FROM jobs WHERE id = $1 FOR UPDATE")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await?;
        if determined != Some(true) {
            return Ok(None);
        }

        sqlx::query("DELETE FROM build_inputs WHERE build_id = $1")
            .bind(build_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM build_pipes WHERE to_build_id = $1")
            .bind(build_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO build_inputs (build_id, input_name, resource_id, version_md5, first_occurrence)
            SELECT $1, n.input_name, n.resource_id, n.version_md5,
                   COALESCE(n.first_occurrence, FALSE) AND NOT EXISTS (
                       SELECT 1
                       FROM build_inputs bi
                       JOIN builds b ON b.id = bi.build_id
                       WHERE b.job_id = $2
                         AND bi.input_name = n.input_name
                         AND bi.resource_id = n.resource_id
                         AND bi.version_md5 = n.version_md5
                   )
            FROM next_build_inputs n
            WHERE n.job_id = $2
              AND n.resource_id IS NOT NULL
              AND n.version_md5 IS NOT NULL
              AND NOT n.resolve_skipped
              AND n.resolve_error IS NULL
            "#,
        )
        .bind(build_id.as_uuid())
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO build_pipes (from_build_id, to_build_id)
            SELECT from_build_id, $1 FROM next_build_pipes WHERE to_job_id = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(build_id.as_uuid())
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM next_build_inputs WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM next_build_pipes WHERE to_job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE jobs SET inputs_determined = FALSE WHERE id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        let inputs = fetch_build_inputs(&mut tx, build_id).await?;

        tx.commit().await?;
        Ok(Some(inputs))
    }

    async fn save_output(&self, build_id: BuildId, output: &OutputVersion) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let pipeline_id: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT pipeline_id FROM builds WHERE id = $1")
                .bind(build_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let Some(Some(pipeline_id)) = pipeline_id else {
            return Ok(false);
        };

        let resource_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM resources WHERE pipeline_id = $1 AND name = $2 FOR UPDATE",
        )
        .bind(pipeline_id)
        .bind(&output.resource_name)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(resource_id) = resource_id else {
            return Ok(false);
        };

        sqlx::query("UPDATE resources SET type = $2, source = $3, resource_types = $4 WHERE id = $1")
            .bind(resource_id)
            .bind(&output.resource_type)
            .bind(&output.source)
            .bind(serde_json::to_value(&output.resource_types)?)
            .execute(&mut *tx)
            .await?;

        let fingerprint = output.version.fingerprint();

        // A known version keeps its place in the check order; only missing
        // metadata is filled in.
        sqlx::query(
            r#"
            INSERT INTO resource_versions (resource_id, version_md5, version, metadata, check_order)
            VALUES ($1, $2, $3, $4,
                    (SELECT COALESCE(MAX(check_order), 0) + 1 FROM resource_versions WHERE resource_id = $1))
            ON CONFLICT (resource_id, version_md5) DO UPDATE
            SET metadata = CASE
                WHEN jsonb_array_length(EXCLUDED.metadata) > 0 THEN EXCLUDED.metadata
                ELSE resource_versions.metadata
            END
            "#,
        )
        .bind(resource_id)
        .bind(fingerprint.as_str())
        .bind(serde_json::to_value(&output.version)?)
        .bind(serde_json::to_value(&output.metadata)?)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO build_outputs (build_id, output_name, resource_id, version_md5)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (build_id, output_name) DO UPDATE
            SET resource_id = EXCLUDED.resource_id, version_md5 = EXCLUDED.version_md5
            "#,
        )
        .bind(build_id.as_uuid())
        .bind(&output.output_name)
        .bind(resource_id)
        .bind(fingerprint.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn resources(&self, build_id: BuildId) -> DbResult<(Vec<BuildInput>, Vec<BuildOutput>)> {
        let mut conn = self.pool.acquire().await?;
        let inputs = fetch_build_inputs(&mut conn, build_id).await?;

        let outputs = sqlx::query_as::<_, BuildResourceRow>(
            r#"
            SELECT bo.output_name AS name, bo.resource_id, rv.version, NULL::BOOLEAN AS first_occurrence
            FROM build_outputs bo
            JOIN resource_versions rv
              ON rv.resource_id = bo.resource_id AND rv.version_md5 = bo.version_md5
            WHERE bo.build_id = $1
            ORDER BY bo.output_name
            "#,
        )
        .bind(build_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(BuildResourceRow::into_output)
        .collect::<DbResult<Vec<_>>>()?;

        Ok((inputs, outputs))
    }

    async fn successful_build_outputs(
        &self,
        build_id: BuildId,
    ) -> DbResult<Vec<AlgorithmOutput>> {
        let rows: Vec<(String, Uuid, String)> = sqlx::query_as(
            r#"
            SELECT name, resource_id, version_md5
            FROM successful_build_outputs
            WHERE build_id = $1
            ORDER BY name
            "#,
        )
        .bind(build_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, resource_id, md5)| AlgorithmOutput {
                version: AlgorithmVersion::new(
                    ResourceId::from_uuid(resource_id),
                    ResourceVersion::from_hex(md5),
                ),
                input_name: name,
            })
            .collect())
    }

    async fn build_pipes(&self, to_build_id: BuildId) -> DbResult<Vec<BuildPipe>> {
        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT p.from_build_id, b.job_id
            FROM build_pipes p
            JOIN builds b ON b.id = p.from_build_id
            WHERE p.to_build_id = $1 AND b.job_id IS NOT NULL
            ORDER BY p.from_build_id
            "#,
        )
        .bind(to_build_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(from_build_id, job_id)| BuildPipe {
                from_build_id: BuildId::from_uuid(from_build_id),
                from_job_id: JobId::from_uuid(job_id),
                to_build_id,
            })
            .collect())
    }

    async fn latest_build_pipes(
        &self,
        to_build_id: BuildId,
        passed_jobs: &[JobId],
    ) -> DbResult<HashMap<JobId, BuildId>> {
        let job_ids: Vec<Uuid> = passed_jobs.iter().map(|id| *id.as_uuid()).collect();

        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (b.job_id) b.job_id, p.from_build_id
            FROM build_pipes p
            JOIN builds b ON b.id = p.from_build_id
            WHERE p.to_build_id = $1 AND b.job_id = ANY($2)
            ORDER BY b.job_id, p.from_build_id DESC
            "#,
        )
        .bind(to_build_id.as_uuid())
        .bind(job_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(job_id, build_id)| (JobId::from_uuid(job_id), BuildId::from_uuid(build_id)))
            .collect())
    }
}
