//! Pipeline commands.

use anyhow::{Context, Result};
use switchyard_core::pipeline::PipelineConfig;
use switchyard_scheduler::Orchestrator;

pub async fn set(orchestrator: &Orchestrator, name: &str, path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline config: {}", path))?;
    let config: PipelineConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse pipeline config: {}", path))?;

    let (pipeline, created) = orchestrator.save_pipeline(name, &config).await?;
    let action = if created { "created" } else { "updated" };
    println!("Pipeline {} {} ({})", pipeline.name(), action, pipeline.id());
    Ok(())
}
