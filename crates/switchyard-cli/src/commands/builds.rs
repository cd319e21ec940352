//! Build commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use switchyard_core::BuildId;
use switchyard_db::DbError;
use switchyard_scheduler::{Build, Orchestrator};

async fn find(orchestrator: &Orchestrator, id: BuildId) -> Result<Build> {
    orchestrator
        .build(id)
        .await?
        .with_context(|| format!("Build not found: {}", id))
}

/// Print events until the build completes. Ctrl-C closes the cursor.
pub async fn events(orchestrator: &Orchestrator, id: BuildId, from: u64) -> Result<()> {
    let build = find(orchestrator, id).await?;
    let cursor = Arc::new(build.events(from));

    let closer = cursor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            closer.close();
        }
    });

    loop {
        match cursor.next().await {
            Ok(envelope) => println!("{}", serde_json::to_string(&envelope)?),
            Err(DbError::EndOfStream | DbError::StreamClosed) => break,
            Err(e) => return Err(e).context("Failed to read build events"),
        }
    }
    Ok(())
}

pub async fn preparation(orchestrator: &Orchestrator, id: BuildId) -> Result<()> {
    let preparation = orchestrator
        .preparations()
        .preparation(id)
        .await?
        .with_context(|| format!("Build not found: {}", id))?;
    println!("{}", serde_json::to_string_pretty(&preparation)?);
    Ok(())
}

pub async fn resources(orchestrator: &Orchestrator, id: BuildId) -> Result<()> {
    let build = find(orchestrator, id).await?;
    let (inputs, outputs) = build.resources().await?;
    let resources = serde_json::json!({ "inputs": inputs, "outputs": outputs });
    println!("{}", serde_json::to_string_pretty(&resources)?);
    Ok(())
}

pub async fn abort(orchestrator: &Orchestrator, id: BuildId) -> Result<()> {
    let build = find(orchestrator, id).await?;
    build.mark_as_aborted().await?;
    if build.is_running() {
        println!("Build {} marked as aborted; it stops once its steps notice", build.name());
    } else {
        println!("Build {} aborted", build.name());
    }
    Ok(())
}
