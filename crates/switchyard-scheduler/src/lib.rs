//! Build lifecycle, scheduling and preparation for Switchyard.
//!
//! Wraps the repositories of a [`Database`](switchyard_db::Database) in
//! handles (`Build`, `Job`, `Pipeline`) that the scheduler and the API work
//! with, and aggregates why a pending build has not started yet.

pub mod build;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod preparation;
pub mod versions;

pub use build::Build;
pub use job::Job;
pub use orchestrator::Orchestrator;
pub use pipeline::Pipeline;
pub use preparation::PreparationAggregator;
pub use versions::VersionsDb;
