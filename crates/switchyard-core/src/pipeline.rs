//! Pipeline, job and resource configuration.
//!
//! Only the parts the scheduling core reads are modelled: job inputs and
//! their constraints, the in-flight limit, and resource identity.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::version::Version;

/// A pipeline definition as handed over by the config layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    /// Maximum builds of this job running at once; 0 means unlimited.
    #[serde(default)]
    pub max_in_flight: u32,
    #[serde(default)]
    pub inputs: Vec<JobInputConfig>,
}

impl JobConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: u32) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_input(mut self, input: JobInputConfig) -> Self {
        self.inputs.push(input);
        self
    }
}

/// A `get` the job declares as an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInputConfig {
    pub name: String,
    pub resource: String,
    /// Upstream jobs the chosen version must have passed through.
    #[serde(default)]
    pub passed: Vec<String>,
    #[serde(default)]
    pub version: VersionConfig,
}

impl JobInputConfig {
    /// An input named after the resource it reads.
    pub fn get(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self {
            name: resource.clone(),
            resource,
            passed: Vec::new(),
            version: VersionConfig::Latest,
        }
    }

    pub fn passed(mut self, job: impl Into<String>) -> Self {
        self.passed.push(job.into());
        self
    }

    pub fn pinned(mut self, version: Version) -> Self {
        self.version = VersionConfig::Pinned(version);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionConfig {
    #[default]
    Latest,
    Every,
    Pinned(Version),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub source: Value,
}

impl ResourceConfig {
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>, source: Value) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            source,
        }
    }
}

/// A resource type at the version a check or put ran against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedResourceType {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub privileged: bool,
    pub version: Version,
}
