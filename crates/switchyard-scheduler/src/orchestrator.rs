//! Entry point into the scheduling core.

use switchyard_core::BuildId;
use switchyard_core::pipeline::PipelineConfig;
use switchyard_db::{Database, DbResult};
use tracing::info;

use crate::build::Build;
use crate::pipeline::Pipeline;
use crate::preparation::PreparationAggregator;
use crate::versions::VersionsDb;

/// Hands out build and pipeline handles over one database.
#[derive(Clone)]
pub struct Orchestrator {
    db: Database,
}

impl Orchestrator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Create a pending build that belongs to no job.
    pub async fn create_one_off_build(&self) -> DbResult<Build> {
        let record = self.db.builds.create_one_off().await?;
        info!(build_id = %record.id, "Created one-off build");
        Ok(Build::new(self.db.clone(), record))
    }

    pub async fn build(&self, id: BuildId) -> DbResult<Option<Build>> {
        let record = self.db.builds.get(id).await?;
        Ok(record.map(|record| Build::new(self.db.clone(), record)))
    }

    /// Create or update a pipeline by name. The flag is true when the
    /// pipeline did not exist before.
    pub async fn save_pipeline(
        &self,
        name: &str,
        config: &PipelineConfig,
    ) -> DbResult<(Pipeline, bool)> {
        let (record, created) = self.db.pipelines.save_pipeline(name, config).await?;
        info!(
            pipeline = %name,
            pipeline_id = %record.id,
            jobs = config.jobs.len(),
            resources = config.resources.len(),
            created,
            "Saved pipeline"
        );
        Ok((Pipeline::new(self.db.clone(), record), created))
    }

    pub async fn pipeline(&self, name: &str) -> DbResult<Option<Pipeline>> {
        let record = self.db.pipelines.pipeline_by_name(name).await?;
        Ok(record.map(|record| Pipeline::new(self.db.clone(), record)))
    }

    pub fn preparations(&self) -> PreparationAggregator {
        PreparationAggregator::new(self.db.clone())
    }

    pub fn versions_db(&self) -> VersionsDb {
        VersionsDb::new(self.db.clone())
    }
}
