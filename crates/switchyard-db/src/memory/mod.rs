//! In-memory implementation of every repository.
//!
//! One mutex guards all state, so each operation is trivially atomic. It
//! follows the PostgreSQL implementations row for row and backs the tests
//! and single-process embedding.

mod algorithm;
mod build;
mod event;
mod pipeline;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use switchyard_core::{
    AlgorithmInput, AlgorithmVersion, BuildId, Envelope, InputMapping, JobId, PipelineId,
    ResourceId, ResourceVersion,
};
use tokio::sync::Mutex;

use crate::hub::EventHub;
use crate::repo::{BuildRecord, JobRecord, PipelineRecord, ResourceRecord, ResourceVersionRecord};

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    hub: EventHub,
}

impl MemoryStore {
    /// A store that wakes subscribers through `hub`.
    pub fn new(hub: EventHub) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            hub,
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }
}

#[derive(Default)]
struct State {
    pipelines: HashMap<PipelineId, PipelineRecord>,
    jobs: HashMap<JobId, JobState>,
    resources: HashMap<ResourceId, ResourceRecord>,
    versions: HashMap<ResourceId, HashMap<ResourceVersion, ResourceVersionRecord>>,
    builds: BTreeMap<BuildId, BuildState>,
    next_inputs: HashMap<JobId, InputMapping>,
    next_pipes: HashMap<JobId, BTreeSet<BuildId>>,
    build_inputs: HashMap<BuildId, BTreeMap<String, AlgorithmInput>>,
    build_outputs: HashMap<BuildId, BTreeMap<String, AlgorithmVersion>>,
    /// (to build, from build)
    build_pipes: BTreeSet<(BuildId, BuildId)>,
    successful_outputs: HashMap<BuildId, BTreeMap<String, AlgorithmVersion>>,
}

struct JobState {
    record: JobRecord,
    build_number: u64,
}

struct BuildState {
    record: BuildRecord,
    events: Vec<Envelope>,
}

impl State {
    fn append(&mut self, build_id: BuildId, envelope: Envelope) -> Option<u64> {
        let build = self.builds.get_mut(&build_id)?;
        build.events.push(envelope);
        Some(build.events.len() as u64 - 1)
    }

    fn resource_version(&self, version: &AlgorithmVersion) -> Option<&ResourceVersionRecord> {
        self.versions.get(&version.resource_id)?.get(&version.version)
    }

    fn next_check_order(&self, resource_id: ResourceId) -> i64 {
        self.versions
            .get(&resource_id)
            .and_then(|versions| versions.values().map(|v| v.check_order).max())
            .unwrap_or(0)
            + 1
    }

    /// Remove a build and everything hanging off it.
    fn remove_build(&mut self, build_id: BuildId) {
        self.builds.remove(&build_id);
        self.build_inputs.remove(&build_id);
        self.build_outputs.remove(&build_id);
        self.successful_outputs.remove(&build_id);
        self.build_pipes
            .retain(|(to, from)| *to != build_id && *from != build_id);
        for pipes in self.next_pipes.values_mut() {
            pipes.remove(&build_id);
        }
    }

    fn remove_job(&mut self, job_id: JobId) {
        self.jobs.remove(&job_id);
        self.next_inputs.remove(&job_id);
        self.next_pipes.remove(&job_id);
    }
}
