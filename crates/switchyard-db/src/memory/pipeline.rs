use async_trait::async_trait;
use chrono::Utc;
use switchyard_core::pipeline::PipelineConfig;
use switchyard_core::{BuildId, BuildStatus, JobId, PipelineId, ResourceId};

use super::{JobState, MemoryStore};
use crate::DbResult;
use crate::repo::{JobRecord, PipelineRecord, PipelineRepo, ResourceRecord};

#[async_trait]
impl PipelineRepo for MemoryStore {
    async fn save_pipeline(
        &self,
        name: &str,
        config: &PipelineConfig,
    ) -> DbResult<(PipelineRecord, bool)> {
        let mut state = self.state.lock().await;

        let existing = state.pipelines.values().find(|p| p.name == name).cloned();
        let created = existing.is_none();
        let pipeline = existing.unwrap_or_else(|| PipelineRecord {
            id: PipelineId::new(),
            name: name.to_string(),
            paused: false,
            created_at: Utc::now(),
        });
        state.pipelines.insert(pipeline.id, pipeline.clone());

        for job in &config.jobs {
            let existing = state
                .jobs
                .values_mut()
                .find(|j| j.record.pipeline_id == pipeline.id && j.record.name == job.name);
            match existing {
                Some(existing) => existing.record.config = job.clone(),
                None => {
                    let id = JobId::new();
                    state.jobs.insert(
                        id,
                        JobState {
                            record: JobRecord {
                                id,
                                pipeline_id: pipeline.id,
                                name: job.name.clone(),
                                config: job.clone(),
                                paused: false,
                                inputs_determined: false,
                                max_in_flight_reached: false,
                            },
                            build_number: 0,
                        },
                    );
                }
            }
        }

        for resource in &config.resources {
            let existing = state
                .resources
                .values_mut()
                .find(|r| r.pipeline_id == pipeline.id && r.name == resource.name);
            match existing {
                Some(existing) => {
                    existing.resource_type = resource.resource_type.clone();
                    existing.source = resource.source.clone();
                }
                None => {
                    let id = ResourceId::new();
                    state.resources.insert(
                        id,
                        ResourceRecord {
                            id,
                            pipeline_id: pipeline.id,
                            name: resource.name.clone(),
                            resource_type: resource.resource_type.clone(),
                            source: resource.source.clone(),
                            resource_types: Vec::new(),
                        },
                    );
                }
            }
        }

        Ok((pipeline, created))
    }

    async fn pipeline(&self, id: PipelineId) -> DbResult<Option<PipelineRecord>> {
        let state = self.state.lock().await;
        Ok(state.pipelines.get(&id).cloned())
    }

    async fn pipeline_by_name(&self, name: &str) -> DbResult<Option<PipelineRecord>> {
        let state = self.state.lock().await;
        Ok(state.pipelines.values().find(|p| p.name == name).cloned())
    }

    async fn set_pipeline_paused(&self, id: PipelineId, paused: bool) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        let Some(pipeline) = state.pipelines.get_mut(&id) else {
            return Ok(false);
        };
        pipeline.paused = paused;
        Ok(true)
    }

    async fn destroy_pipeline(&self, id: PipelineId) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        if state.pipelines.remove(&id).is_none() {
            return Ok(false);
        }

        let builds: Vec<BuildId> = state
            .builds
            .values()
            .filter(|b| b.record.pipeline_id == Some(id))
            .map(|b| b.record.id)
            .collect();
        for build_id in &builds {
            state.remove_build(*build_id);
        }

        let jobs: Vec<JobId> = state
            .jobs
            .values()
            .filter(|j| j.record.pipeline_id == id)
            .map(|j| j.record.id)
            .collect();
        for job_id in jobs {
            state.remove_job(job_id);
        }

        let resources: Vec<ResourceId> = state
            .resources
            .values()
            .filter(|r| r.pipeline_id == id)
            .map(|r| r.id)
            .collect();
        for resource_id in resources {
            state.resources.remove(&resource_id);
            state.versions.remove(&resource_id);
        }

        for build_id in builds {
            self.hub.notify(build_id);
        }
        Ok(true)
    }

    async fn job(&self, id: JobId) -> DbResult<Option<JobRecord>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).map(|j| j.record.clone()))
    }

    async fn job_by_name(
        &self,
        pipeline_id: PipelineId,
        name: &str,
    ) -> DbResult<Option<JobRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .find(|j| j.record.pipeline_id == pipeline_id && j.record.name == name)
            .map(|j| j.record.clone()))
    }

    async fn set_job_paused(&self, id: JobId, paused: bool) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        job.record.paused = paused;
        Ok(true)
    }

    async fn resource(&self, id: ResourceId) -> DbResult<Option<ResourceRecord>> {
        let state = self.state.lock().await;
        Ok(state.resources.get(&id).cloned())
    }

    async fn resource_by_name(
        &self,
        pipeline_id: PipelineId,
        name: &str,
    ) -> DbResult<Option<ResourceRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .resources
            .values()
            .find(|r| r.pipeline_id == pipeline_id && r.name == name)
            .cloned())
    }

    async fn schedule_build(&self, job_id: JobId, build_id: BuildId) -> DbResult<bool> {
        let mut state = self.state.lock().await;

        let Some(job) = state.jobs.get(&job_id).map(|j| j.record.clone()) else {
            return Ok(false);
        };
        let pipeline_paused = state
            .pipelines
            .get(&job.pipeline_id)
            .is_none_or(|p| p.paused);

        let Some(build) = state
            .builds
            .get(&build_id)
            .filter(|b| b.record.job_id == Some(job_id))
            .map(|b| b.record.clone())
        else {
            return Ok(false);
        };
        if build.scheduled {
            return Ok(true);
        }
        if pipeline_paused || job.paused {
            return Ok(false);
        }

        let max_in_flight = job.config.max_in_flight;
        let max_in_flight_reached = max_in_flight > 0 && {
            let job_builds = state
                .builds
                .values()
                .map(|b| &b.record)
                .filter(|b| b.job_id == Some(job_id) && b.id != build_id);
            let running = job_builds
                .clone()
                .filter(|b| !b.completed && (b.scheduled || b.status == BuildStatus::Started))
                .count();
            let older_pending = job_builds.clone().any(|b| {
                b.id < build_id && b.status == BuildStatus::Pending && !b.scheduled && !b.aborted
            });
            running >= max_in_flight as usize || older_pending
        };

        let scheduled = !max_in_flight_reached && job.inputs_determined;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.record.max_in_flight_reached = max_in_flight_reached;
        }
        if scheduled {
            if let Some(build) = state.builds.get_mut(&build_id) {
                build.record.scheduled = true;
            }
        }
        Ok(scheduled)
    }
}
