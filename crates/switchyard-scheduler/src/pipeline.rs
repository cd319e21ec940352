use chrono::{DateTime, Utc};
use switchyard_core::PipelineId;
use switchyard_db::{Database, DbResult, PipelineRecord, ResourceRecord};
use tracing::info;

use crate::job::Job;
use crate::versions::VersionsDb;

#[derive(Clone)]
pub struct Pipeline {
    db: Database,
    record: PipelineRecord,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("record", &self.record).finish()
    }
}

impl Pipeline {
    pub(crate) fn new(db: Database, record: PipelineRecord) -> Self {
        Self { db, record }
    }

    pub fn id(&self) -> PipelineId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn is_paused(&self) -> bool {
        self.record.paused
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    pub async fn reload(&mut self) -> DbResult<bool> {
        match self.db.pipelines.pipeline(self.record.id).await? {
            Some(record) => {
                self.record = record;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn job(&self, name: &str) -> DbResult<Option<Job>> {
        let record = self.db.pipelines.job_by_name(self.id(), name).await?;
        Ok(record.map(|record| Job::new(self.db.clone(), record)))
    }

    pub async fn resource(&self, name: &str) -> DbResult<Option<ResourceRecord>> {
        self.db.pipelines.resource_by_name(self.id(), name).await
    }

    pub async fn pause(&self) -> DbResult<bool> {
        info!(pipeline = %self.name(), "Pausing pipeline");
        self.db.pipelines.set_pipeline_paused(self.id(), true).await
    }

    pub async fn unpause(&self) -> DbResult<bool> {
        info!(pipeline = %self.name(), "Unpausing pipeline");
        self.db.pipelines.set_pipeline_paused(self.id(), false).await
    }

    /// The resolver's view of versions and build history.
    pub fn versions_db(&self) -> VersionsDb {
        VersionsDb::new(self.db.clone())
    }

    /// Delete the pipeline with its jobs, resources and builds. Cursors
    /// following its builds end.
    pub async fn destroy(&self) -> DbResult<bool> {
        let destroyed = self.db.pipelines.destroy_pipeline(self.id()).await?;
        if destroyed {
            info!(pipeline = %self.name(), pipeline_id = %self.id(), "Destroyed pipeline");
        }
        Ok(destroyed)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{fixture, resolve_all};
    use switchyard_core::{BuildPreparationStatus, Version};

    #[tokio::test]
    async fn test_lookup_by_name() {
        let fixture = fixture().await;
        assert_eq!(fixture.unit.name(), "unit");
        assert_eq!(fixture.unit.pipeline_id(), fixture.pipeline.id());
        assert_eq!(fixture.deploy.config().max_in_flight, 1);
        assert!(fixture.pipeline.job("missing").await.unwrap().is_none());

        let image = fixture.resource("image").await;
        assert_eq!(image.resource_type, "registry-image");
        assert!(fixture.pipeline.resource("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_paused_pipeline_blocks_scheduling() {
        let fixture = fixture().await;
        let v1 = Version::from([("ref", "v1")]);
        resolve_all(&fixture, &[("repo-a", &v1), ("repo-b", &v1)]).await;
        let build = fixture.unit.create_build().await.unwrap().unwrap();

        assert!(fixture.pipeline.pause().await.unwrap());
        let mut pipeline = fixture.pipeline.clone();
        pipeline.reload().await.unwrap();
        assert!(pipeline.is_paused());

        assert!(!fixture.unit.schedule_build(&build).await.unwrap());
        let preparation = build.preparation().await.unwrap().unwrap();
        assert_eq!(preparation.paused_pipeline, BuildPreparationStatus::Blocking);

        assert!(fixture.pipeline.unpause().await.unwrap());
        assert!(fixture.unit.schedule_build(&build).await.unwrap());
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let fixture = fixture().await;
        let mut pipeline = fixture.pipeline.clone();

        assert!(pipeline.destroy().await.unwrap());
        assert!(!pipeline.reload().await.unwrap());
        assert!(fixture.orchestrator.pipeline("main").await.unwrap().is_none());
        assert!(pipeline.job("unit").await.unwrap().is_none());
        assert!(!pipeline.destroy().await.unwrap());
    }
}
