//! Explains why a pending build has not started.
//!
//! Reads the build, its job and pipeline, and the job's latest resolution
//! pass, and reports each condition as blocking or not. One-off builds and
//! builds that already left `pending` never block. Once a build has adopted
//! its inputs, those are reported instead of the job's next mapping.

use switchyard_core::{BuildId, BuildPreparation, BuildPreparationStatus, BuildStatus, InputResult};
use switchyard_db::{Database, DbResult};

#[derive(Clone)]
pub struct PreparationAggregator {
    db: Database,
}

impl PreparationAggregator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// `None` when the build, or the job or pipeline it belongs to, is gone.
    pub async fn preparation(&self, build_id: BuildId) -> DbResult<Option<BuildPreparation>> {
        let Some(build) = self.db.builds.get(build_id).await? else {
            return Ok(None);
        };

        let mut preparation = BuildPreparation::ready(build_id);
        if build.status != BuildStatus::Pending {
            return Ok(Some(preparation));
        }
        preparation.aborted = BuildPreparationStatus::blocking_if(build.aborted);

        let Some(job_id) = build.job_id else {
            return Ok(Some(preparation));
        };
        let Some(job) = self.db.pipelines.job(job_id).await? else {
            return Ok(None);
        };
        let Some(pipeline) = self.db.pipelines.pipeline(job.pipeline_id).await? else {
            return Ok(None);
        };

        preparation.paused_pipeline = BuildPreparationStatus::blocking_if(pipeline.paused);
        preparation.paused_job = BuildPreparationStatus::blocking_if(job.paused);
        preparation.max_running_builds =
            BuildPreparationStatus::blocking_if(job.max_in_flight_reached);

        // Adopting consumes the job's next mapping, so a build that already
        // committed its inputs reports those instead.
        let (committed, _) = self.db.algorithm.resources(build_id).await?;
        if !committed.is_empty() {
            for input in committed {
                preparation
                    .inputs
                    .insert(input.name, BuildPreparationStatus::NotBlocking);
            }
            return Ok(Some(preparation));
        }

        let next = self
            .db
            .algorithm
            .next_input_mapping(job_id)
            .await?
            .unwrap_or_default();

        if next.resolved || build.scheduled {
            for (name, _) in next.mapping.iter() {
                preparation
                    .inputs
                    .insert(name.to_string(), BuildPreparationStatus::NotBlocking);
            }
            return Ok(Some(preparation));
        }

        preparation.inputs_satisfied = BuildPreparationStatus::Blocking;
        for input in &job.config.inputs {
            let status = match next.mapping.get(&input.name) {
                Some(InputResult::Resolved { .. }) => BuildPreparationStatus::NotBlocking,
                Some(InputResult::ResolveSkipped) => BuildPreparationStatus::Skipped,
                Some(InputResult::ResolveError { message }) => {
                    preparation
                        .missing_input_reasons
                        .insert(input.name.clone(), message.clone());
                    BuildPreparationStatus::Blocking
                }
                None => {
                    preparation.register_missing_input(input.name.clone());
                    BuildPreparationStatus::Blocking
                }
            };
            preparation.inputs.insert(input.name.clone(), status);
        }

        Ok(Some(preparation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Orchestrator;
    use crate::testing::{fixture, resolve_all};
    use std::collections::BTreeMap;
    use switchyard_core::pipeline::{JobConfig, JobInputConfig, PipelineConfig, ResourceConfig};
    use switchyard_core::preparation::MISSING_BUILD_INPUT;
    use switchyard_core::{AlgorithmInput, AlgorithmVersion, InputMapping, Plan, Version};

    use switchyard_core::BuildPreparationStatus::{Blocking, NotBlocking, Skipped};

    #[tokio::test]
    async fn test_one_off_build_is_ready() {
        let orchestrator = Orchestrator::new(Database::in_memory());
        let build = orchestrator.create_one_off_build().await.unwrap();

        let preparation = build.preparation().await.unwrap().unwrap();
        assert_eq!(preparation, BuildPreparation::ready(build.id()));
        assert!(!preparation.is_blocked());
    }

    #[tokio::test]
    async fn test_aborted_pending_build() {
        let orchestrator = Orchestrator::new(Database::in_memory());
        let build = orchestrator.create_one_off_build().await.unwrap();
        build.mark_as_aborted().await.unwrap();

        let preparation = build.preparation().await.unwrap().unwrap();
        assert_eq!(preparation.aborted, Blocking);
        assert!(preparation.is_blocked());
    }

    #[tokio::test]
    async fn test_started_build_reports_nothing_blocking() {
        let fixture = fixture().await;
        fixture.pipeline.pause().await.unwrap();
        let build = fixture.unit.create_build().await.unwrap().unwrap();
        build.start(&Plan::default()).await.unwrap();

        let preparation = build.preparation().await.unwrap().unwrap();
        assert_eq!(preparation.paused_pipeline, NotBlocking);
        assert_eq!(preparation.inputs_satisfied, NotBlocking);
        assert!(preparation.inputs.is_empty());
    }

    #[tokio::test]
    async fn test_resolved_inputs_do_not_block() {
        let fixture = fixture().await;
        let v1 = Version::from([("ref", "v1")]);
        resolve_all(&fixture, &[("repo-a", &v1), ("repo-b", &v1)]).await;
        let build = fixture.unit.create_build().await.unwrap().unwrap();

        let preparation = build.preparation().await.unwrap().unwrap();
        assert_eq!(
            preparation.inputs,
            BTreeMap::from([
                ("repo-a".to_string(), NotBlocking),
                ("repo-b".to_string(), NotBlocking),
            ])
        );
        assert_eq!(preparation.inputs_satisfied, NotBlocking);
        assert!(preparation.missing_input_reasons.is_empty());
        assert!(!preparation.is_blocked());
    }

    #[tokio::test]
    async fn test_adopted_inputs_do_not_block() {
        let fixture = fixture().await;
        let v1 = Version::from([("ref", "v1")]);
        resolve_all(&fixture, &[("repo-a", &v1), ("repo-b", &v1)]).await;
        let build = fixture.unit.create_build().await.unwrap().unwrap();

        assert!(fixture.unit.schedule_build(&build).await.unwrap());
        build.adopt_inputs_and_pipes().await.unwrap().unwrap();
        let next = fixture.unit.next_input_mapping().await.unwrap().unwrap();
        assert!(!next.resolved);

        let preparation = build.preparation().await.unwrap().unwrap();
        assert_eq!(
            preparation.inputs,
            BTreeMap::from([
                ("repo-a".to_string(), NotBlocking),
                ("repo-b".to_string(), NotBlocking),
            ])
        );
        assert_eq!(preparation.inputs_satisfied, NotBlocking);
        assert!(preparation.missing_input_reasons.is_empty());
        assert!(!preparation.is_blocked());
    }

    #[tokio::test]
    async fn test_scheduled_build_is_not_missing_inputs() {
        let fixture = fixture().await;
        let v1 = Version::from([("ref", "v1")]);
        resolve_all(&fixture, &[("repo-a", &v1), ("repo-b", &v1)]).await;
        let build = fixture.unit.create_build().await.unwrap().unwrap();
        assert!(fixture.unit.schedule_build(&build).await.unwrap());

        // A later pass that found nothing must not unschedule the build.
        fixture
            .unit
            .save_next_input_mapping(&InputMapping::new(), false)
            .await
            .unwrap();

        let preparation = build.preparation().await.unwrap().unwrap();
        assert_eq!(preparation.inputs_satisfied, NotBlocking);
        assert!(preparation.missing_input_reasons.is_empty());
    }

    #[tokio::test]
    async fn test_paused_job_blocks() {
        let fixture = fixture().await;
        fixture.unit.pause().await.unwrap();
        let build = fixture.unit.create_build().await.unwrap().unwrap();

        let preparation = build.preparation().await.unwrap().unwrap();
        assert_eq!(preparation.paused_job, Blocking);
        assert_eq!(preparation.paused_pipeline, NotBlocking);
    }

    #[tokio::test]
    async fn test_no_resolution_yet_marks_every_input_missing() {
        let fixture = fixture().await;
        let build = fixture.unit.create_build().await.unwrap().unwrap();

        let preparation = build.preparation().await.unwrap().unwrap();
        assert_eq!(preparation.inputs_satisfied, Blocking);
        assert_eq!(preparation.inputs.len(), 2);
        assert!(preparation.inputs.values().all(|s| *s == Blocking));
        assert_eq!(
            preparation.missing_input_reasons.get("repo-a").map(String::as_str),
            Some(MISSING_BUILD_INPUT)
        );
    }

    #[tokio::test]
    async fn test_unresolved_mapping_reports_each_input() {
        let orchestrator = Orchestrator::new(Database::in_memory());
        let config = PipelineConfig {
            jobs: vec![
                JobConfig::new("job")
                    .with_input(JobInputConfig::get("input1"))
                    .with_input(JobInputConfig::get("input2"))
                    .with_input(JobInputConfig::get("input3"))
                    .with_input(JobInputConfig::get("input4")),
            ],
            resources: (1..=4)
                .map(|i| ResourceConfig::new(format!("input{i}"), "git", serde_json::Value::Null))
                .collect(),
        };
        let (pipeline, _) = orchestrator.save_pipeline("main", &config).await.unwrap();
        let job = pipeline.job("job").await.unwrap().unwrap();
        let resource = pipeline.resource("input1").await.unwrap().unwrap();

        let version = Version::from([("ref", "v1")]);
        let mut mapping = InputMapping::new();
        mapping.insert(
            "input1",
            InputResult::resolved(
                AlgorithmInput {
                    version: AlgorithmVersion::new(resource.id, version.fingerprint()),
                    first_occurrence: true,
                },
                Vec::new(),
            ),
        );
        mapping.insert("input2", InputResult::error("resolve error"));
        mapping.insert("input3", InputResult::ResolveSkipped);
        job.save_next_input_mapping(&mapping, false).await.unwrap();

        let build = job.create_build().await.unwrap().unwrap();
        let preparation = build.preparation().await.unwrap().unwrap();

        assert_eq!(preparation.inputs_satisfied, Blocking);
        assert_eq!(
            preparation.inputs,
            BTreeMap::from([
                ("input1".to_string(), NotBlocking),
                ("input2".to_string(), Blocking),
                ("input3".to_string(), Skipped),
                ("input4".to_string(), Blocking),
            ])
        );
        assert_eq!(
            preparation.missing_input_reasons,
            BTreeMap::from([
                ("input2".to_string(), "resolve error".to_string()),
                ("input4".to_string(), MISSING_BUILD_INPUT.to_string()),
            ])
        );
    }

    #[tokio::test]
    async fn test_build_of_destroyed_pipeline() {
        let fixture = fixture().await;
        let build = fixture.unit.create_build().await.unwrap().unwrap();
        fixture.pipeline.destroy().await.unwrap();

        assert!(build.preparation().await.unwrap().is_none());
    }
}
