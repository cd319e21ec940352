//! Why a pending build has (or has not) started.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::BuildId;

/// Reason recorded for a configured input the resolver produced nothing for.
pub const MISSING_BUILD_INPUT: &str = "input is not included in resolved candidates";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildPreparationStatus {
    NotBlocking,
    Blocking,
    Skipped,
}

impl BuildPreparationStatus {
    pub fn blocking_if(condition: bool) -> Self {
        if condition {
            BuildPreparationStatus::Blocking
        } else {
            BuildPreparationStatus::NotBlocking
        }
    }
}

pub type MissingInputReasons = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPreparation {
    pub build_id: BuildId,
    pub paused_pipeline: BuildPreparationStatus,
    pub paused_job: BuildPreparationStatus,
    pub max_running_builds: BuildPreparationStatus,
    pub inputs: BTreeMap<String, BuildPreparationStatus>,
    pub inputs_satisfied: BuildPreparationStatus,
    pub missing_input_reasons: MissingInputReasons,
    /// Blocking when the build was aborted before it started.
    pub aborted: BuildPreparationStatus,
}

impl BuildPreparation {
    /// A preparation with nothing blocking.
    pub fn ready(build_id: BuildId) -> Self {
        Self {
            build_id,
            paused_pipeline: BuildPreparationStatus::NotBlocking,
            paused_job: BuildPreparationStatus::NotBlocking,
            max_running_builds: BuildPreparationStatus::NotBlocking,
            inputs: BTreeMap::new(),
            inputs_satisfied: BuildPreparationStatus::NotBlocking,
            missing_input_reasons: MissingInputReasons::new(),
            aborted: BuildPreparationStatus::NotBlocking,
        }
    }

    pub fn register_missing_input(&mut self, name: impl Into<String>) {
        self.missing_input_reasons
            .insert(name.into(), MISSING_BUILD_INPUT.to_string());
    }

    /// True when any scalar flag or input blocks the build.
    pub fn is_blocked(&self) -> bool {
        [
            self.paused_pipeline,
            self.paused_job,
            self.max_running_builds,
            self.inputs_satisfied,
            self.aborted,
        ]
        .contains(&BuildPreparationStatus::Blocking)
    }
}
