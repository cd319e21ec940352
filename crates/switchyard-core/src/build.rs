//! Build status.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle status of a build.
///
/// `pending -> started -> {succeeded, failed, errored}`. Aborting is a
/// separate flag on the build; `Aborted` is only recorded when an aborted
/// build is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Started,
    Aborted,
    Succeeded,
    Failed,
    Errored,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Started => "started",
            BuildStatus::Aborted => "aborted",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::Errored => "errored",
        }
    }

    /// True for statuses a build can finish with.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            BuildStatus::Aborted
                | BuildStatus::Succeeded
                | BuildStatus::Failed
                | BuildStatus::Errored
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, BuildStatus::Started)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "started" => Ok(BuildStatus::Started),
            "aborted" => Ok(BuildStatus::Aborted),
            "succeeded" => Ok(BuildStatus::Succeeded),
            "failed" => Ok(BuildStatus::Failed),
            "errored" => Ok(BuildStatus::Errored),
            other => Err(Error::InvalidInput(format!("unknown build status: {other}"))),
        }
    }
}
