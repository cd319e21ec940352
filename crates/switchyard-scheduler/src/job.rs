use switchyard_core::pipeline::JobConfig;
use switchyard_core::{InputMapping, JobId, PipelineId};
use switchyard_db::{Database, DbResult, JobRecord, NextInputs};
use tracing::{debug, info};

use crate::build::Build;

/// A job of a pipeline. Like [`Build`], a snapshot until reloaded.
#[derive(Clone)]
pub struct Job {
    db: Database,
    record: JobRecord,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("record", &self.record).finish()
    }
}

impl Job {
    pub(crate) fn new(db: Database, record: JobRecord) -> Self {
        Self { db, record }
    }

    pub fn id(&self) -> JobId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn pipeline_id(&self) -> PipelineId {
        self.record.pipeline_id
    }

    pub fn config(&self) -> &JobConfig {
        &self.record.config
    }

    pub fn is_paused(&self) -> bool {
        self.record.paused
    }

    pub fn inputs_determined(&self) -> bool {
        self.record.inputs_determined
    }

    /// Whether the last scheduling attempt hit the in-flight limit.
    pub fn max_in_flight_reached(&self) -> bool {
        self.record.max_in_flight_reached
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub async fn reload(&mut self) -> DbResult<bool> {
        match self.db.pipelines.job(self.record.id).await? {
            Some(record) => {
                self.record = record;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Create the job's next pending build. `None` when the job is gone.
    pub async fn create_build(&self) -> DbResult<Option<Build>> {
        let Some(record) = self.db.builds.create_for_job(self.id()).await? else {
            return Ok(None);
        };
        info!(job = %self.name(), build_id = %record.id, name = %record.name, "Created build");
        Ok(Some(Build::new(self.db.clone(), record)))
    }

    /// Store the outcome of a resolution pass. `resolved` marks the job's
    /// inputs as determined.
    pub async fn save_next_input_mapping(
        &self,
        mapping: &InputMapping,
        resolved: bool,
    ) -> DbResult<bool> {
        let saved = self
            .db
            .algorithm
            .save_next_input_mapping(self.id(), mapping, resolved)
            .await?;
        debug!(job = %self.name(), inputs = mapping.len(), resolved, "Saved next input mapping");
        Ok(saved)
    }

    pub async fn next_input_mapping(&self) -> DbResult<Option<NextInputs>> {
        self.db.algorithm.next_input_mapping(self.id()).await
    }

    /// Try to schedule a pending build of this job. Returns true when the
    /// build is (or already was) scheduled.
    pub async fn schedule_build(&self, build: &Build) -> DbResult<bool> {
        let scheduled = self
            .db
            .pipelines
            .schedule_build(self.id(), build.id())
            .await?;
        if scheduled {
            info!(job = %self.name(), build_id = %build.id(), "Build scheduled");
        } else {
            debug!(job = %self.name(), build_id = %build.id(), "Build not schedulable yet");
        }
        Ok(scheduled)
    }

    pub async fn pause(&self) -> DbResult<bool> {
        info!(job = %self.name(), "Pausing job");
        self.db.pipelines.set_job_paused(self.id(), true).await
    }

    pub async fn unpause(&self) -> DbResult<bool> {
        info!(job = %self.name(), "Unpausing job");
        self.db.pipelines.set_job_paused(self.id(), false).await
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{fixture, resolve};
    use switchyard_core::{BuildStatus, Plan, Version};

    #[tokio::test]
    async fn test_schedule_requires_determined_inputs() {
        let fixture = fixture().await;
        let build = fixture.unit.create_build().await.unwrap().unwrap();
        assert!(!fixture.unit.schedule_build(&build).await.unwrap());

        let a = Version::from([("ref", "v1")]);
        let b = Version::from([("ref", "v1")]);
        resolve(&fixture, &fixture.unit, &[("repo-a", &a), ("repo-b", &b)]).await;
        assert!(fixture.unit.schedule_build(&build).await.unwrap());

        let mut build = build;
        build.reload().await.unwrap();
        assert!(build.is_scheduled());

        // Already scheduled builds stay scheduled.
        assert!(fixture.unit.schedule_build(&build).await.unwrap());
    }

    #[tokio::test]
    async fn test_paused_job_is_not_scheduled() {
        let fixture = fixture().await;
        let a = Version::from([("ref", "v1")]);
        let b = Version::from([("ref", "v1")]);
        resolve(&fixture, &fixture.unit, &[("repo-a", &a), ("repo-b", &b)]).await;

        let build = fixture.unit.create_build().await.unwrap().unwrap();
        assert!(fixture.unit.pause().await.unwrap());
        assert!(!fixture.unit.schedule_build(&build).await.unwrap());

        let mut job = fixture.unit.clone();
        job.reload().await.unwrap();
        assert!(job.is_paused());

        assert!(fixture.unit.unpause().await.unwrap());
        assert!(fixture.unit.schedule_build(&build).await.unwrap());
    }

    #[tokio::test]
    async fn test_max_in_flight_blocks_second_build() {
        let fixture = fixture().await;
        let a = Version::from([("ref", "v1")]);
        resolve(&fixture, &fixture.deploy, &[("repo-a", &a)]).await;

        let first = fixture.deploy.create_build().await.unwrap().unwrap();
        assert!(fixture.deploy.schedule_build(&first).await.unwrap());
        assert!(first.start(&Plan::default()).await.unwrap());

        let second = fixture.deploy.create_build().await.unwrap().unwrap();
        assert!(!fixture.deploy.schedule_build(&second).await.unwrap());

        let mut deploy = fixture.deploy.clone();
        deploy.reload().await.unwrap();
        assert!(deploy.max_in_flight_reached());

        let preparation = second.preparation().await.unwrap().unwrap();
        assert_eq!(
            preparation.max_running_builds,
            switchyard_core::BuildPreparationStatus::Blocking
        );

        assert!(first.finish(BuildStatus::Succeeded).await.unwrap());
        assert!(fixture.deploy.schedule_build(&second).await.unwrap());
        deploy.reload().await.unwrap();
        assert!(!deploy.max_in_flight_reached());
    }

    #[tokio::test]
    async fn test_unlimited_job_schedules_concurrently() {
        let fixture = fixture().await;
        let a = Version::from([("ref", "v1")]);
        let b = Version::from([("ref", "v1")]);
        resolve(&fixture, &fixture.unit, &[("repo-a", &a), ("repo-b", &b)]).await;

        let first = fixture.unit.create_build().await.unwrap().unwrap();
        let second = fixture.unit.create_build().await.unwrap().unwrap();
        assert!(fixture.unit.schedule_build(&first).await.unwrap());
        assert!(fixture.unit.schedule_build(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_next_input_mapping_on_missing_job() {
        let fixture = fixture().await;
        let job = fixture.unit.clone();
        assert!(fixture.pipeline.destroy().await.unwrap());

        let mapping = switchyard_core::InputMapping::new();
        assert!(!job.save_next_input_mapping(&mapping, true).await.unwrap());
        assert!(job.next_input_mapping().await.unwrap().is_none());
        assert!(job.create_build().await.unwrap().is_none());
    }
}
