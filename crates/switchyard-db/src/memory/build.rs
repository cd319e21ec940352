use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use switchyard_core::{BuildId, BuildStatus, Event, JobId, Plan};

use super::{BuildState, MemoryStore};
use crate::repo::{BuildRecord, BuildRepo};
use crate::{DbError, DbResult};

/// Timestamps are kept at second precision, like the serialized form.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn pending(id: BuildId, name: String) -> BuildRecord {
    BuildRecord {
        id,
        name,
        job_id: None,
        pipeline_id: None,
        status: BuildStatus::Pending,
        private_plan: Plan::default(),
        public_plan: serde_json::Value::Null,
        create_time: now(),
        start_time: None,
        end_time: None,
        aborted: false,
        drained: false,
        scheduled: false,
        completed: false,
    }
}

#[async_trait]
impl BuildRepo for MemoryStore {
    async fn create_one_off(&self) -> DbResult<BuildRecord> {
        let id = BuildId::new();
        let record = pending(id, id.to_string());

        let mut state = self.state.lock().await;
        state.builds.insert(
            id,
            BuildState {
                record: record.clone(),
                events: Vec::new(),
            },
        );
        Ok(record)
    }

    async fn create_for_job(&self, job_id: JobId) -> DbResult<Option<BuildRecord>> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        job.build_number += 1;

        let mut record = pending(BuildId::new(), job.build_number.to_string());
        record.job_id = Some(job_id);
        record.pipeline_id = Some(job.record.pipeline_id);

        state.builds.insert(
            record.id,
            BuildState {
                record: record.clone(),
                events: Vec::new(),
            },
        );
        Ok(Some(record))
    }

    async fn get(&self, id: BuildId) -> DbResult<Option<BuildRecord>> {
        let state = self.state.lock().await;
        Ok(state.builds.get(&id).map(|build| build.record.clone()))
    }

    async fn start(&self, id: BuildId, plan: &Plan) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        let Some(build) = state.builds.get_mut(&id) else {
            return Ok(false);
        };
        if build.record.status != BuildStatus::Pending || build.record.aborted {
            return Ok(false);
        }

        let start_time = now();
        let event = Event::status(BuildStatus::Started, start_time.timestamp()).envelope()?;

        build.record.status = BuildStatus::Started;
        build.record.start_time = Some(start_time);
        build.record.private_plan = plan.clone();
        build.record.public_plan = plan.public();

        state.append(id, event);
        self.hub.notify(id);
        Ok(true)
    }

    async fn finish(&self, id: BuildId, status: BuildStatus) -> DbResult<bool> {
        if !status.is_completed() {
            return Err(DbError::InvalidStatus(status));
        }

        let mut state = self.state.lock().await;
        let Some(build) = state.builds.get_mut(&id) else {
            return Ok(false);
        };
        if build.record.completed {
            return Ok(false);
        }

        let end_time = now();
        let event = Event::status(status, end_time.timestamp()).envelope()?;

        build.record.status = status;
        build.record.end_time = Some(end_time);
        build.record.completed = true;
        build.record.private_plan = Plan::default();
        let job_id = build.record.job_id;

        state.append(id, event);

        if status == BuildStatus::Succeeded && job_id.is_some() {
            let mut ledger = state.build_outputs.get(&id).cloned().unwrap_or_default();
            if let Some(inputs) = state.build_inputs.get(&id) {
                for (name, input) in inputs {
                    ledger
                        .entry(name.clone())
                        .or_insert_with(|| input.version.clone());
                }
            }
            state.successful_outputs.insert(id, ledger);
        }

        self.hub.notify(id);
        Ok(true)
    }

    async fn mark_as_aborted(&self, id: BuildId) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        let Some(build) = state.builds.get_mut(&id) else {
            return Ok(false);
        };
        build.record.aborted = true;
        Ok(true)
    }

    async fn set_drained(&self, id: BuildId, drained: bool) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        let Some(build) = state.builds.get_mut(&id) else {
            return Ok(false);
        };
        build.record.drained = drained;
        Ok(true)
    }
}
