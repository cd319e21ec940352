//! Build handles and the build lifecycle.
//!
//! A [`Build`] is a snapshot of a build row plus the database it came from.
//! Transitions (`start`, `finish`, `mark_as_aborted`) are applied to the
//! row only; call [`Build::reload`] to observe them on the handle.

use chrono::{DateTime, Utc};
use switchyard_core::{BuildId, BuildPreparation, BuildStatus, Event, JobId, PipelineId, Plan};
use switchyard_db::{
    BuildInput, BuildOutput, BuildRecord, Database, DbResult, EventCursor, OutputVersion,
};
use tracing::{debug, info};

use crate::job::Job;
use crate::pipeline::Pipeline;
use crate::preparation::PreparationAggregator;

#[derive(Clone)]
pub struct Build {
    db: Database,
    record: BuildRecord,
}

impl std::fmt::Debug for Build {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Build").field("record", &self.record).finish()
    }
}

impl Build {
    pub(crate) fn new(db: Database, record: BuildRecord) -> Self {
        Self { db, record }
    }

    pub fn id(&self) -> BuildId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.record.job_id
    }

    pub fn pipeline_id(&self) -> Option<PipelineId> {
        self.record.pipeline_id
    }

    pub fn status(&self) -> BuildStatus {
        self.record.status
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.record.create_time
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.record.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.record.end_time
    }

    pub fn private_plan(&self) -> &Plan {
        &self.record.private_plan
    }

    pub fn public_plan(&self) -> &serde_json::Value {
        &self.record.public_plan
    }

    pub fn is_aborted(&self) -> bool {
        self.record.aborted
    }

    pub fn is_drained(&self) -> bool {
        self.record.drained
    }

    pub fn is_scheduled(&self) -> bool {
        self.record.scheduled
    }

    pub fn is_completed(&self) -> bool {
        self.record.completed
    }

    pub fn is_running(&self) -> bool {
        self.record.is_running()
    }

    pub fn is_one_off(&self) -> bool {
        self.record.is_one_off()
    }

    pub fn record(&self) -> &BuildRecord {
        &self.record
    }

    /// Re-read the build. Returns false when it no longer exists.
    pub async fn reload(&mut self) -> DbResult<bool> {
        match self.db.builds.get(self.record.id).await? {
            Some(record) => {
                self.record = record;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Start the build with `plan`. Returns false when the build is not
    /// pending or was aborted.
    pub async fn start(&self, plan: &Plan) -> DbResult<bool> {
        let started = self.db.builds.start(self.id(), plan).await?;
        if started {
            info!(build_id = %self.id(), name = %self.name(), "Build started");
        } else {
            debug!(build_id = %self.id(), "Build not started: not pending or aborted");
        }
        Ok(started)
    }

    /// Complete the build. `status` must be terminal. Returns false when the
    /// build was already completed.
    pub async fn finish(&self, status: BuildStatus) -> DbResult<bool> {
        let finished = self.db.builds.finish(self.id(), status).await?;
        if finished {
            info!(build_id = %self.id(), %status, "Build finished");
        } else {
            debug!(build_id = %self.id(), %status, "Build already completed");
        }
        Ok(finished)
    }

    pub async fn mark_as_aborted(&self) -> DbResult<bool> {
        let found = self.db.builds.mark_as_aborted(self.id()).await?;
        if found {
            info!(build_id = %self.id(), "Build marked as aborted");
        }
        Ok(found)
    }

    /// Record whether the end-of-build notification went out. Unlike the
    /// transitions this also updates the handle.
    pub async fn set_drained(&mut self, drained: bool) -> DbResult<bool> {
        let found = self.db.builds.set_drained(self.id(), drained).await?;
        if found {
            self.record.drained = drained;
        }
        Ok(found)
    }

    /// Follow the build's events starting at event id `from`.
    pub fn events(&self, from: u64) -> EventCursor {
        self.db.events(self.id(), from)
    }

    /// Append an event, e.g. a log line from the step running the build.
    pub async fn save_event(&self, event: &Event) -> DbResult<bool> {
        Ok(self.db.events.append(self.id(), event).await?.is_some())
    }

    /// Commit the job's resolved inputs onto this build. `None` when this is
    /// a one-off build or the job's inputs are not determined.
    pub async fn adopt_inputs_and_pipes(&self) -> DbResult<Option<Vec<BuildInput>>> {
        let inputs = self.db.algorithm.adopt_inputs_and_pipes(self.id()).await?;
        match &inputs {
            Some(inputs) => {
                info!(build_id = %self.id(), inputs = inputs.len(), "Adopted inputs and pipes")
            }
            None => debug!(build_id = %self.id(), "No determined inputs to adopt"),
        }
        Ok(inputs)
    }

    pub async fn save_output(&self, output: &OutputVersion) -> DbResult<bool> {
        let saved = self.db.algorithm.save_output(self.id(), output).await?;
        if saved {
            info!(
                build_id = %self.id(),
                resource = %output.resource_name,
                output = %output.output_name,
                "Saved build output"
            );
        } else {
            debug!(
                build_id = %self.id(),
                resource = %output.resource_name,
                "Output not saved: resource not in the build's pipeline"
            );
        }
        Ok(saved)
    }

    pub async fn resources(&self) -> DbResult<(Vec<BuildInput>, Vec<BuildOutput>)> {
        self.db.algorithm.resources(self.id()).await
    }

    pub async fn preparation(&self) -> DbResult<Option<BuildPreparation>> {
        PreparationAggregator::new(self.db.clone())
            .preparation(self.id())
            .await
    }

    /// The pipeline this build belongs to. `None` for one-off builds.
    pub async fn pipeline(&self) -> DbResult<Option<Pipeline>> {
        let Some(pipeline_id) = self.pipeline_id() else {
            return Ok(None);
        };
        let pipeline = self.db.pipelines.pipeline(pipeline_id).await?;
        Ok(pipeline.map(|record| Pipeline::new(self.db.clone(), record)))
    }

    pub async fn job(&self) -> DbResult<Option<Job>> {
        let Some(job_id) = self.job_id() else {
            return Ok(None);
        };
        let job = self.db.pipelines.job(job_id).await?;
        Ok(job.map(|record| Job::new(self.db.clone(), record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Orchestrator;
    use crate::testing::{fixture, output, resolve_all};
    use std::sync::Arc;
    use switchyard_core::plan::{GetPlan, Step};
    use switchyard_core::{EventType, Version};
    use switchyard_db::DbError;

    fn get_plan() -> Plan {
        Plan::new(
            "1",
            Step::Get(GetPlan {
                name: "repo".to_string(),
                resource: "repo".to_string(),
                resource_type: "git".to_string(),
                source: serde_json::json!({"private_key": "secret"}),
                params: serde_json::Value::Null,
                version: None,
                tags: Vec::new(),
            }),
        )
    }

    fn status_of(envelope: &switchyard_core::Envelope) -> (BuildStatus, i64) {
        assert_eq!(envelope.event, EventType::Status);
        match envelope.decode().unwrap() {
            Event::Status(status) => (status.status, status.time),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_one_off_build_lifecycle_and_events() {
        let orchestrator = Orchestrator::new(Database::in_memory());
        let mut build = orchestrator.create_one_off_build().await.unwrap();
        assert!(build.is_one_off());
        assert_eq!(build.status(), BuildStatus::Pending);

        let events = build.events(0);

        assert!(build.start(&get_plan()).await.unwrap());
        // Handles are snapshots until reloaded.
        assert_eq!(build.status(), BuildStatus::Pending);
        assert!(build.reload().await.unwrap());
        assert_eq!(build.status(), BuildStatus::Started);
        assert!(build.is_running());
        assert_eq!(build.private_plan(), &get_plan());
        assert_eq!(build.public_plan()["get"]["source"], serde_json::Value::Null);

        let (status, time) = status_of(&events.next().await.unwrap());
        assert_eq!(status, BuildStatus::Started);
        assert_eq!(Some(time), build.start_time().map(|t| t.timestamp()));

        assert!(build.finish(BuildStatus::Succeeded).await.unwrap());
        assert!(build.reload().await.unwrap());
        assert!(build.is_completed());
        assert!(build.private_plan().is_empty());

        let (status, time) = status_of(&events.next().await.unwrap());
        assert_eq!(status, BuildStatus::Succeeded);
        assert_eq!(Some(time), build.end_time().map(|t| t.timestamp()));

        assert!(matches!(events.next().await, Err(DbError::EndOfStream)));

        // A fresh cursor still observes the whole log, then the end.
        let replay = build.events(1);
        let (status, _) = status_of(&replay.next().await.unwrap());
        assert_eq!(status, BuildStatus::Succeeded);
        assert!(matches!(replay.next().await, Err(DbError::EndOfStream)));
    }

    #[tokio::test]
    async fn test_concurrent_start_succeeds_once() {
        let orchestrator = Orchestrator::new(Database::in_memory());
        let build = Arc::new(orchestrator.create_one_off_build().await.unwrap());

        let attempts = (0..16).map(|_| {
            let build = build.clone();
            tokio::spawn(async move { build.start(&Plan::default()).await.unwrap() })
        });
        let results = futures::future::join_all(attempts).await;
        let started = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(started, 1);

        let (first, _) = status_of(&build.events(0).next().await.unwrap());
        assert_eq!(first, BuildStatus::Started);
    }

    #[tokio::test]
    async fn test_finish_applies_once() {
        let orchestrator = Orchestrator::new(Database::in_memory());
        let mut build = orchestrator.create_one_off_build().await.unwrap();
        assert!(build.start(&get_plan()).await.unwrap());

        assert!(build.finish(BuildStatus::Failed).await.unwrap());
        build.reload().await.unwrap();
        let end_time = build.end_time();
        assert!(end_time.is_some());

        assert!(!build.finish(BuildStatus::Succeeded).await.unwrap());
        build.reload().await.unwrap();
        assert_eq!(build.status(), BuildStatus::Failed);
        assert_eq!(build.end_time(), end_time);
        assert!(build.private_plan().is_empty());

        let cursor = build.events(0);
        cursor.next().await.unwrap();
        cursor.next().await.unwrap();
        assert!(matches!(cursor.next().await, Err(DbError::EndOfStream)));
    }

    #[tokio::test]
    async fn test_finish_rejects_non_terminal_status() {
        let orchestrator = Orchestrator::new(Database::in_memory());
        let build = orchestrator.create_one_off_build().await.unwrap();
        let result = build.finish(BuildStatus::Pending).await;
        assert!(matches!(result, Err(DbError::InvalidStatus(_))));
    }

    #[tokio::test]
    async fn test_aborted_pending_build_never_starts() {
        let orchestrator = Orchestrator::new(Database::in_memory());
        let mut build = orchestrator.create_one_off_build().await.unwrap();

        assert!(build.mark_as_aborted().await.unwrap());
        assert!(!build.start(&get_plan()).await.unwrap());

        assert!(build.reload().await.unwrap());
        assert_eq!(build.status(), BuildStatus::Pending);
        assert!(build.is_aborted());
        assert!(build.private_plan().is_empty());
    }

    #[tokio::test]
    async fn test_set_drained_updates_handle() {
        let orchestrator = Orchestrator::new(Database::in_memory());
        let mut build = orchestrator.create_one_off_build().await.unwrap();
        assert!(!build.is_drained());

        assert!(build.set_drained(true).await.unwrap());
        assert!(build.is_drained());

        let reloaded = orchestrator.build(build.id()).await.unwrap().unwrap();
        assert!(reloaded.is_drained());
        assert_eq!(reloaded.status(), BuildStatus::Pending);
    }

    #[tokio::test]
    async fn test_cursors_observe_identical_order() {
        let orchestrator = Orchestrator::new(Database::in_memory());
        let build = orchestrator.create_one_off_build().await.unwrap();
        let first = build.events(0);
        let second = build.events(0);

        build.start(&Plan::default()).await.unwrap();
        for i in 0..5 {
            build.save_event(&Event::log(format!("line {i}"))).await.unwrap();
        }
        build.finish(BuildStatus::Succeeded).await.unwrap();

        let mut seen_first = Vec::new();
        while let Ok(envelope) = first.next().await {
            seen_first.push(envelope);
        }
        let mut seen_second = Vec::new();
        while let Ok(envelope) = second.next().await {
            seen_second.push(envelope);
        }

        assert_eq!(seen_first.len(), 7);
        assert_eq!(seen_first, seen_second);
        assert_eq!(first.offset(), 7);

        let resumed = build.events(3);
        let mut tail = Vec::new();
        while let Ok(envelope) = resumed.next().await {
            tail.push(envelope);
        }
        assert_eq!(tail, seen_first[3..].to_vec());
    }

    #[tokio::test]
    async fn test_blocked_next_wakes_on_append() {
        let orchestrator = Orchestrator::new(Database::in_memory());
        let build = orchestrator.create_one_off_build().await.unwrap();
        let cursor = Arc::new(build.events(0));

        let waiting = tokio::spawn({
            let cursor = cursor.clone();
            async move { cursor.next().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        build.save_event(&Event::log("hello")).await.unwrap();
        let envelope = tokio::time::timeout(std::time::Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(envelope.event, EventType::Log);
        assert_eq!(envelope.data["payload"], "hello");

        cursor.close();
        assert!(matches!(cursor.next().await, Err(DbError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_finished_builds_leave_no_subscriptions_behind() {
        let orchestrator = Orchestrator::new(Database::in_memory());

        for _ in 0..20 {
            let build = orchestrator.create_one_off_build().await.unwrap();
            build.start(&Plan::default()).await.unwrap();
            build.save_event(&Event::log("hello")).await.unwrap();
            build.finish(BuildStatus::Succeeded).await.unwrap();

            let cursor = build.events(0);
            let mut seen = 0;
            loop {
                match cursor.next().await {
                    Ok(_) => seen += 1,
                    Err(DbError::EndOfStream) => break,
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
            assert_eq!(seen, 3);
        }

        assert!(orchestrator.database().hub.is_empty());
    }

    #[tokio::test]
    async fn test_job_build_adopts_inputs() {
        let fixture = fixture().await;
        let a = Version::from([("ref", "v1")]);
        let b = Version::from([("ref", "v2")]);
        resolve_all(&fixture, &[("repo-a", &a), ("repo-b", &b)]).await;

        let build = fixture.unit.create_build().await.unwrap().unwrap();
        let (inputs, outputs) = build.resources().await.unwrap();
        assert!(inputs.is_empty());
        assert!(outputs.is_empty());

        let adopted = build.adopt_inputs_and_pipes().await.unwrap().unwrap();
        assert_eq!(adopted.len(), 2);

        let (inputs, outputs) = build.resources().await.unwrap();
        assert_eq!(inputs, adopted);
        assert_eq!(inputs[0].name, "repo-a");
        assert_eq!(inputs[0].version, a);
        assert_eq!(inputs[0].resource_id, fixture.resource("repo-a").await.id);
        assert!(inputs[0].first_occurrence);
        assert_eq!(inputs[1].name, "repo-b");
        assert_eq!(inputs[1].version, b);
        assert!(outputs.is_empty());

        // The mapping was consumed.
        assert!(build.adopt_inputs_and_pipes().await.unwrap().is_none());

        let image = Version::from([("digest", "sha256:abc")]);
        assert!(build.save_output(&output("image", "image", &image)).await.unwrap());
        let (_, outputs) = build.resources().await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].name, "image");
        assert_eq!(outputs[0].version, image);
    }

    #[tokio::test]
    async fn test_readopting_replaces_inputs_and_pipes() {
        use switchyard_core::pipeline::{JobConfig, JobInputConfig, PipelineConfig, ResourceConfig};
        use switchyard_core::{AlgorithmInput, AlgorithmVersion, BuildPipe, InputMapping, InputResult};

        let orchestrator = Orchestrator::new(Database::in_memory());
        let downstream_config = (0..4).fold(JobConfig::new("downstream"), |job, i| {
            let input = JobInputConfig::get(format!("input-{i}"));
            job.with_input(if i == 1 { input.passed("upstream") } else { input })
        });
        let config = PipelineConfig {
            jobs: vec![JobConfig::new("upstream"), downstream_config],
            resources: (0..4)
                .map(|i| ResourceConfig::new(format!("input-{i}"), "git", serde_json::Value::Null))
                .collect(),
        };
        let (pipeline, _) = orchestrator.save_pipeline("main", &config).await.unwrap();
        let upstream = pipeline.job("upstream").await.unwrap().unwrap();
        let downstream = pipeline.job("downstream").await.unwrap().unwrap();
        let versions_db = pipeline.versions_db();

        let mut upstream_builds = Vec::new();
        for _ in 0..2 {
            let build = upstream.create_build().await.unwrap().unwrap();
            build.finish(BuildStatus::Succeeded).await.unwrap();
            upstream_builds.push(build.id());
        }

        /// Resolve every input at `v1`, with the given upstream builds as pipes.
        async fn resolved(pipeline: &Pipeline, inputs: &[(&str, Option<BuildId>)]) -> InputMapping {
            let versions_db = pipeline.versions_db();
            let v1 = Version::from([("ref", "v1")]);
            let mut mapping = InputMapping::new();
            for (name, passed) in inputs {
                let resource = pipeline.resource(name).await.unwrap().unwrap();
                versions_db.save_versions(resource.id, std::slice::from_ref(&v1)).await.unwrap();
                mapping.insert(
                    *name,
                    InputResult::resolved(
                        AlgorithmInput {
                            version: AlgorithmVersion::new(resource.id, v1.fingerprint()),
                            first_occurrence: true,
                        },
                        passed.iter().copied().collect(),
                    ),
                );
            }
            mapping
        }

        let first = resolved(&pipeline, &[("input-0", Some(upstream_builds[0]))]).await;
        downstream.save_next_input_mapping(&first, true).await.unwrap();
        let build = downstream.create_build().await.unwrap().unwrap();
        build.adopt_inputs_and_pipes().await.unwrap().unwrap();
        assert_eq!(
            versions_db.build_pipes(build.id()).await.unwrap(),
            vec![BuildPipe {
                from_build_id: upstream_builds[0],
                from_job_id: upstream.id(),
                to_build_id: build.id(),
            }]
        );

        let second = resolved(
            &pipeline,
            &[("input-1", Some(upstream_builds[1])), ("input-2", None), ("input-3", None)],
        )
        .await;
        downstream.save_next_input_mapping(&second, true).await.unwrap();
        let adopted = build.adopt_inputs_and_pipes().await.unwrap().unwrap();

        let (inputs, _) = build.resources().await.unwrap();
        assert_eq!(inputs, adopted);
        let names: Vec<&str> = inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["input-1", "input-2", "input-3"]);

        let latest = versions_db
            .latest_build_pipes(build.id(), &[upstream.id()])
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest.get(&upstream.id()), Some(&upstream_builds[1]));
        assert_eq!(
            versions_db.build_pipes(build.id()).await.unwrap(),
            vec![BuildPipe {
                from_build_id: upstream_builds[1],
                from_job_id: upstream.id(),
                to_build_id: build.id(),
            }]
        );
    }

    #[tokio::test]
    async fn test_first_occurrence_is_recorded_once_per_job() {
        let fixture = fixture().await;
        let a = Version::from([("ref", "v1")]);
        let b = Version::from([("ref", "v2")]);

        resolve_all(&fixture, &[("repo-a", &a), ("repo-b", &b)]).await;
        let first = fixture.unit.create_build().await.unwrap().unwrap();
        let inputs = first.adopt_inputs_and_pipes().await.unwrap().unwrap();
        assert!(inputs.iter().all(|i| i.first_occurrence));

        resolve_all(&fixture, &[("repo-a", &a), ("repo-b", &b)]).await;
        let second = fixture.unit.create_build().await.unwrap().unwrap();
        let inputs = second.adopt_inputs_and_pipes().await.unwrap().unwrap();
        assert!(inputs.iter().all(|i| !i.first_occurrence));
    }

    #[tokio::test]
    async fn test_one_off_build_has_no_resources_or_pipeline() {
        let orchestrator = Orchestrator::new(Database::in_memory());
        let build = orchestrator.create_one_off_build().await.unwrap();

        assert!(build.adopt_inputs_and_pipes().await.unwrap().is_none());
        let (inputs, outputs) = build.resources().await.unwrap();
        assert!(inputs.is_empty() && outputs.is_empty());
        assert!(build.pipeline().await.unwrap().is_none());
        assert!(build.job().await.unwrap().is_none());

        let version = Version::from([("ref", "x")]);
        assert!(!build.save_output(&output("repo", "repo", &version)).await.unwrap());
    }

    #[tokio::test]
    async fn test_reload_after_pipeline_destroyed() {
        let fixture = fixture().await;
        let mut build = fixture.unit.create_build().await.unwrap().unwrap();
        assert_eq!(build.pipeline().await.unwrap().unwrap().id(), fixture.pipeline.id());

        let cursor = build.events(0);
        assert!(fixture.pipeline.destroy().await.unwrap());

        assert!(!build.reload().await.unwrap());
        assert!(!build.start(&Plan::default()).await.unwrap());
        assert!(matches!(cursor.next().await, Err(DbError::EndOfStream)));
    }
}
