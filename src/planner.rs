use crate::config::PlannerSection;
use crate::models::{FusionResult, Incident};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const MAX_TITLE_CHARS: usize = 72;

/// Executable remediation plan built once per pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    /// Unified diff; empty when no provider proposed a patch
    pub patch: String,
    pub test_commands: Vec<String>,
    pub risk_score: f64,
    pub title: String,
    pub description: String,
}

impl Plan {
    /// A plan with no patch has nothing to test or apply.
    pub fn is_actionable(&self) -> bool {
        !self.patch.trim().is_empty()
    }
}

pub struct Planner {
    test_command: String,
    targeted_test_command: String,
}

impl Planner {
    pub fn new(config: &PlannerSection) -> Self {
        Self {
            test_command: config.test_command.clone(),
            targeted_test_command: config.targeted_test_command.clone(),
        }
    }

    pub fn create_plan(&self, fusion: &FusionResult, incident: &Incident) -> Plan {
        let candidates = candidate_patches(fusion);
        if candidates.len() > 1 {
            tracing::debug!(
                candidates = candidates.len(),
                "merging candidate patches by line union"
            );
        }
        let patch = merge_patches(&candidates);

        let mut test_commands = vec![self.test_command.clone()];
        test_commands.extend(
            incident
                .failing_tests
                .iter()
                .map(|test| self.targeted_test_command.replace("{test}", &shell_quote(test))),
        );

        Plan {
            patch,
            test_commands,
            risk_score: fusion.risk_score,
            title: plan_title(fusion, incident),
            description: plan_description(fusion, incident),
        }
    }
}

/// Distinct non-blank patches carried by the fusion result.
fn candidate_patches(fusion: &FusionResult) -> Vec<&str> {
    let mut seen = HashSet::new();
    let mut candidates: Vec<&str> = fusion
        .candidate_patches
        .iter()
        .map(String::as_str)
        .filter(|p| !p.trim().is_empty())
        .filter(|p| seen.insert(*p))
        .collect();

    if candidates.is_empty()
        && let Some(patch) = fusion.patch.as_deref()
        && !patch.trim().is_empty()
    {
        candidates.push(patch);
    }
    candidates
}

/// Combine candidate patches.
///
/// A single candidate is returned verbatim. Several are merged by line-level
/// set union in order of first appearance; this does not understand diff
/// structure and will not detect conflicting edits.
pub fn merge_patches(candidates: &[&str]) -> String {
    match candidates {
        [] => String::new(),
        [only] => only.to_string(),
        many => {
            let mut seen = HashSet::new();
            let mut merged: Vec<&str> = Vec::new();
            for line in many.iter().flat_map(|p| p.lines()) {
                if seen.insert(line) {
                    merged.push(line);
                }
            }
            let mut out = merged.join("\n");
            out.push('\n');
            out
        }
    }
}

/// Quote a value for safe interpolation into an `sh -c` command line.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn plan_title(fusion: &FusionResult, incident: &Incident) -> String {
    let subject = fusion
        .consensus_response
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(&incident.id);
    let title = format!("fix({}): {}", incident.kind, subject);
    if title.chars().count() > MAX_TITLE_CHARS {
        let mut cut: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        cut.push_str("...");
        cut
    } else {
        title
    }
}

fn plan_description(fusion: &FusionResult, incident: &Incident) -> String {
    let providers = if fusion.providers.is_empty() {
        "none".to_string()
    } else {
        fusion.providers.join(", ")
    };
    let diagnosis = if fusion.consensus_response.trim().is_empty() {
        "No diagnosis was returned."
    } else {
        fusion.consensus_response.trim()
    };
    format!(
        "Automated remediation for incident {} ({}).\n\n\
         ## Diagnosis\n{}\n\n\
         ## Scores\n- confidence: {:.2}\n- risk: {:.2}\n- providers: {}\n",
        incident.id, incident.kind, diagnosis, fusion.confidence, fusion.risk_score, providers
    )
}
