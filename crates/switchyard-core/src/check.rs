//! Interface to the resource checker.
//!
//! Checking runs outside the scheduling core. The core only defines what it
//! asks for and what it gets back; discovered versions come back through the
//! versions store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::VersionedResourceType;
use crate::version::Version;
use crate::{ResourceId, Result};

/// What to check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSubject {
    pub resource_id: ResourceId,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub source: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Started,
    Succeeded,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: uuid::Uuid,
    pub resource_id: ResourceId,
    pub status: CheckStatus,
    pub from_version: Option<Version>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub create_time: DateTime<Utc>,
}

#[async_trait]
pub trait Checker: Send + Sync {
    /// Request a check. `created` is false when an equivalent check was
    /// already queued and its record is returned instead.
    async fn check(
        &self,
        subject: &CheckSubject,
        resource_types: &[VersionedResourceType],
        from_version: Option<&Version>,
    ) -> Result<(CheckRecord, bool)>;
}
