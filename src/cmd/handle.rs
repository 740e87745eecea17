//! Pipeline entry point: `remedy handle`.

use anyhow::{Context, Result};
use remedy::config::AgentConfig;
use remedy::models::Incident;
use remedy::{FixStatus, Orchestrator};
use std::io::Read;
use std::path::Path;

fn read_incident(path: &Path) -> Result<Incident> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read incident from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read incident file: {}", path.display()))?
    };
    serde_json::from_str(&content).context("Failed to parse incident JSON")
}

/// Run the pipeline once and print the `FixResult` as JSON on stdout.
pub async fn cmd_handle(project_dir: &Path, incident_path: &Path, auto_apply: bool) -> Result<FixStatus> {
    let incident = read_incident(incident_path)?;

    let mut config = AgentConfig::load_for_project(project_dir)?;
    if auto_apply {
        config.agent.auto_apply = true;
    }
    for warning in config.warnings() {
        tracing::warn!("config: {}", warning);
    }

    let orchestrator = Orchestrator::for_project(project_dir, &config);
    let result = orchestrator.handle_incident(&incident).await;

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize result")?
    );

    let styled = match result.status {
        FixStatus::Applied | FixStatus::PrCreated => console::style(result.status.as_str()).green(),
        FixStatus::TestsFailed => console::style(result.status.as_str()).yellow(),
        FixStatus::Rejected => console::style(result.status.as_str()).red(),
    };
    eprintln!("{} {}", styled.bold(), result.message);

    Ok(result.status)
}
