//! Audit trail view: `remedy history`.

use anyhow::{Context, Result};
use console::style;
use remedy::audit::{AuditEntry, AuditEvent, AuditLogger};
use remedy::config::AgentConfig;
use std::path::Path;

fn describe(event: &AuditEvent) -> String {
    match event {
        AuditEvent::IncidentReceived {
            kind, failing_tests, ..
        } => format!("{} ({} failing tests)", kind, failing_tests.len()),
        AuditEvent::DiagnosisCollected { providers, .. } => {
            format!("{} responses [{}]", providers.len(), providers.join(", "))
        }
        AuditEvent::FusionLogged {
            confidence,
            risk_score,
            candidate_patches,
            ..
        } => format!(
            "confidence {:.2}, risk {:.2}, {} candidate patches",
            confidence, risk_score, candidate_patches
        ),
        AuditEvent::PlanLogged {
            title, patch_sha256, ..
        } => format!("{} (patch {})", title, short_digest(patch_sha256)),
        AuditEvent::TestResultLogged { result } => format!(
            "{} ({}/{} failed, {}ms)",
            if result.passed { "passed" } else { "failed" },
            result.failed,
            result.total,
            result.duration_ms
        ),
        AuditEvent::DecisionLogged {
            decision,
            auto_apply,
            ..
        } => format!("{:?} (auto_apply={})", decision, auto_apply),
        AuditEvent::ApplyLogged { result } => match &result.error {
            None => format!("branch {} merged={}", result.branch, result.merged),
            Some(e) => format!("branch {} failed: {}", result.branch, e),
        },
        AuditEvent::PrLogged { result } => match &result.error {
            None => format!("branch {} pushed", result.branch),
            Some(e) => format!("branch {} failed: {}", result.branch, e),
        },
        AuditEvent::RollbackLogged {
            branch,
            success,
            error,
        } => match error {
            Some(e) => format!("{} failed: {}", branch, e),
            None => format!("{} success={}", branch, success),
        },
        AuditEvent::OutcomeLogged { status, message } => format!("{}: {}", status, message),
        AuditEvent::PipelineFailed { stage, error } => format!("at {}: {}", stage, error),
        AuditEvent::Note { message } => message.clone(),
    }
}

fn short_digest(digest: &str) -> String {
    digest.chars().take(12).collect()
}

fn print_entry(entry: &AuditEntry) {
    let timestamp = entry
        .timestamp
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    let run = entry
        .run_id
        .map(|id| id.simple().to_string().chars().take(8).collect::<String>())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{} {} {} {:<20} {}",
        style(timestamp).dim(),
        style(entry.incident_id.as_deref().unwrap_or("-")).cyan(),
        style(run).dim(),
        style(entry.action()).bold(),
        describe(&entry.event)
    );
}

pub fn cmd_history(project_dir: &Path, incident: Option<&str>, json: bool) -> Result<()> {
    let config = AgentConfig::load_for_project(project_dir)?;
    let logger = AuditLogger::new(config.audit_path(project_dir));
    let entries = logger.history(incident)?;

    if json {
        for entry in &entries {
            println!(
                "{}",
                serde_json::to_string(entry).context("Failed to serialize audit entry")?
            );
        }
        return Ok(());
    }

    if entries.is_empty() {
        println!("No audit entries found.");
        return Ok(());
    }
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_digest_handles_multibyte_text() {
        assert_eq!(short_digest("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_digest("abc"), "abc");
        assert_eq!(short_digest("ééééééééééééé"), "éééééééééééé");
    }

    #[test]
    fn test_describe_plan_with_hand_edited_digest() {
        let event = AuditEvent::PlanLogged {
            title: "fix(test_fail): calc".into(),
            risk_score: 0.1,
            test_commands: vec![],
            patch_sha256: "ü".repeat(20),
            patch: String::new(),
        };
        assert_eq!(
            describe(&event),
            format!("fix(test_fail): calc (patch {})", "ü".repeat(12))
        );
    }
}
