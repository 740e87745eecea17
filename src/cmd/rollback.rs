//! Manual branch cleanup: `remedy rollback`.

use anyhow::Result;
use remedy::audit::{AuditEntry, AuditEvent, AuditLogger};
use remedy::config::AgentConfig;
use remedy::executor::{ChangeExecutor, Executor};
use std::path::Path;

pub async fn cmd_rollback(project_dir: &Path, branch: &str) -> Result<()> {
    let config = AgentConfig::load_for_project(project_dir)?;
    let executor = Executor::for_repo(project_dir, &config);
    let audit = AuditLogger::new(config.audit_path(project_dir));

    let outcome = executor.rollback(branch).await;
    audit
        .record(AuditEntry::new(AuditEvent::RollbackLogged {
            branch: branch.to_string(),
            success: outcome.is_ok(),
            error: outcome.as_ref().err().map(|e| e.to_string()),
        }))
        .await;

    outcome?;
    println!(
        "Rolled back {} and returned to {}",
        console::style(branch).cyan(),
        config.repository.trunk
    );
    Ok(())
}
