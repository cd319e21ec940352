//! Repository traits and PostgreSQL implementations.

pub mod algorithm;
pub mod build;
pub mod event;
pub mod pipeline;

pub use algorithm::{
    AlgorithmRepo, BuildInput, BuildOutput, NextInputs, OutputVersion, PgAlgorithmRepo,
    ResourceVersionRecord,
};
pub use build::{BuildRecord, BuildRepo, PgBuildRepo};
pub use event::{EVENTS_CHANNEL, EventPage, EventRepo, PgEventRepo};
pub use pipeline::{JobRecord, PgPipelineRepo, PipelineRecord, PipelineRepo, ResourceRecord};
