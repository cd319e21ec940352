//! Build plans.
//!
//! The full ("private") plan carries resource sources, params and task
//! configs, which may contain credentials. The public plan keeps only the
//! shape of the plan so it can be shown to anyone who can see the build.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::version::Version;

/// A node in a build plan. The default value is the empty plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Get(GetPlan),
    Put(PutPlan),
    Task(TaskPlan),
    Do(Vec<Plan>),
    InParallel(Vec<Plan>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPlan {
    pub name: String,
    pub resource: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutPlan {
    pub name: String,
    pub resource: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub name: String,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Plan {
    pub fn new(id: impl Into<String>, step: Step) -> Self {
        Self {
            id: id.into(),
            step: Some(step),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.step.is_none()
    }

    /// Redacted form of the plan: names and structure only.
    pub fn public(&self) -> Value {
        let step = match &self.step {
            None => return json!({ "id": self.id }),
            Some(step) => step,
        };

        let public_step = match step {
            Step::Get(get) => json!({
                "get": {
                    "type": get.resource_type,
                    "name": get.name,
                    "resource": get.resource,
                    "version": get.version,
                }
            }),
            Step::Put(put) => json!({
                "put": {
                    "type": put.resource_type,
                    "name": put.name,
                    "resource": put.resource,
                }
            }),
            Step::Task(task) => json!({
                "task": {
                    "name": task.name,
                    "privileged": task.privileged,
                }
            }),
            Step::Do(plans) => {
                json!({ "do": plans.iter().map(Plan::public).collect::<Vec<_>>() })
            }
            Step::InParallel(plans) => {
                json!({ "in_parallel": plans.iter().map(Plan::public).collect::<Vec<_>>() })
            }
        };

        let mut public = json!({ "id": self.id });
        if let (Value::Object(target), Value::Object(fields)) = (&mut public, public_step) {
            target.extend(fields);
        }
        public
    }
}
