//! Core domain types for the Switchyard build scheduler.
//!
//! This crate contains:
//! - Identifiers for builds, jobs, pipelines and resources
//! - Resource versions and their fingerprints
//! - Input resolution types (algorithm inputs/outputs, input mappings)
//! - Build status, plans and events
//! - Build preparation reporting types
//! - Pipeline/job configuration and the checker interface

pub mod algorithm;
pub mod build;
pub mod check;
pub mod error;
pub mod event;
pub mod id;
pub mod pipeline;
pub mod plan;
pub mod preparation;
pub mod version;

pub use algorithm::{
    AlgorithmInput, AlgorithmOutput, AlgorithmVersion, BuildPipe, InputMapping, InputResult,
};
pub use build::BuildStatus;
pub use error::{Error, Result};
pub use event::{BuildEvent, Envelope, Event, EventType};
pub use id::{BuildId, JobId, PipelineId, ResourceId};
pub use plan::Plan;
pub use preparation::{BuildPreparation, BuildPreparationStatus, MissingInputReasons};
pub use version::{MetadataField, ResourceVersion, Version};
