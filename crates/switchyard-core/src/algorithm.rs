//! Types exchanged between the input resolver and the versions store.
//!
//! A resolution pass produces an [`InputMapping`] for a job: one
//! [`InputResult`] per declared input. The mapping is saved as the job's
//! "next" inputs and later adopted onto a concrete build.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::version::ResourceVersion;
use crate::{BuildId, JobId, ResourceId};

/// "This version of that resource", independent of check history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlgorithmVersion {
    pub resource_id: ResourceId,
    pub version: ResourceVersion,
}

impl AlgorithmVersion {
    pub fn new(resource_id: ResourceId, version: ResourceVersion) -> Self {
        Self {
            resource_id,
            version,
        }
    }
}

/// A version chosen for an input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmInput {
    #[serde(flatten)]
    pub version: AlgorithmVersion,
    /// True if the job has never consumed this version under this input name.
    pub first_occurrence: bool,
}

/// A version a successful build produced (or re-asserted) under a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlgorithmOutput {
    #[serde(flatten)]
    pub version: AlgorithmVersion,
    pub input_name: String,
}

/// Outcome of resolving one named input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum InputResult {
    Resolved {
        input: AlgorithmInput,
        /// Upstream builds (one per job named in `passed`) whose outputs
        /// satisfied this input.
        passed_build_ids: Vec<BuildId>,
    },
    ResolveError {
        message: String,
    },
    ResolveSkipped,
}

impl InputResult {
    pub fn resolved(input: AlgorithmInput, passed_build_ids: Vec<BuildId>) -> Self {
        InputResult::Resolved {
            input,
            passed_build_ids,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        InputResult::ResolveError {
            message: message.into(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, InputResult::Resolved { .. })
    }
}

/// Input name to resolution outcome. Replaced wholesale on every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputMapping(BTreeMap<String, InputResult>);

impl InputMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, result: InputResult) {
        self.0.insert(name.into(), result);
    }

    pub fn get(&self, name: &str) -> Option<&InputResult> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InputResult)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries that resolved to a version.
    pub fn resolved_inputs(&self) -> impl Iterator<Item = (&str, &AlgorithmInput, &[BuildId])> {
        self.0.iter().filter_map(|(name, result)| match result {
            InputResult::Resolved {
                input,
                passed_build_ids,
            } => Some((name.as_str(), input, passed_build_ids.as_slice())),
            _ => None,
        })
    }

    /// Upstream builds this mapping is pinned to, deduplicated and sorted.
    pub fn passed_build_ids(&self) -> Vec<BuildId> {
        let mut ids: Vec<BuildId> = self
            .resolved_inputs()
            .flat_map(|(_, _, passed)| passed.iter().copied())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

impl<K: Into<String>> FromIterator<(K, InputResult)> for InputMapping {
    fn from_iter<I: IntoIterator<Item = (K, InputResult)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Committed link from a build to the upstream build that satisfied one of
/// its `passed` constraints.
///
/// Only the two build ids are stored; `from_job_id` is the upstream build's
/// job, read back when the pipe is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildPipe {
    pub from_build_id: BuildId,
    pub from_job_id: JobId,
    pub to_build_id: BuildId,
}
