//! Agent configuration, read from `.remedy/remedy.toml`.
//!
//! Layering is file → environment → CLI. A missing file yields defaults.
//!
//! ```toml
//! [agent]
//! auto_apply = false
//! temperature = 0.2
//! max_risk = 0.4
//! min_confidence = 0.7
//!
//! [identity]
//! name = "remedy-bot"
//! email = "remedy-bot@localhost"
//!
//! [repository]
//! trunk = "main"
//! remote = "origin"
//! branch_prefix = "agent/fix-"
//! rollback_on_failure = true
//!
//! [sandbox]
//! timeout_secs = 30
//! max_output_bytes = 10485760
//!
//! [planner]
//! test_command = "cargo test"
//! targeted_test_command = "cargo test {test}"
//!
//! [audit]
//! path = ".remedy/audit.jsonl"
//!
//! [[providers]]
//! name = "claude"
//! command = "claude --print"
//! timeout_secs = 120
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".remedy";
pub const CONFIG_FILE: &str = "remedy.toml";

/// Decision and diagnosis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Allow unattended merges to trunk
    #[serde(default)]
    pub auto_apply: bool,
    /// Sampling temperature forwarded to providers
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Auto-apply requires risk strictly below this
    #[serde(default = "default_max_risk")]
    pub max_risk: f64,
    /// Auto-apply requires confidence strictly above this
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_risk() -> f64 {
    0.4
}

fn default_min_confidence() -> f64 {
    0.7
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            auto_apply: false,
            temperature: default_temperature(),
            max_risk: default_max_risk(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// Commit author used for automated commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    #[serde(default = "default_bot_name")]
    pub name: String,
    #[serde(default = "default_bot_email")]
    pub email: String,
}

fn default_bot_name() -> String {
    "remedy-bot".to_string()
}

fn default_bot_email() -> String {
    "remedy-bot@localhost".to_string()
}

impl Default for BotIdentity {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            email: default_bot_email(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySection {
    #[serde(default = "default_trunk")]
    pub trunk: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// Undo partial VCS state when apply/PR fails after branching
    #[serde(default = "default_rollback_on_failure")]
    pub rollback_on_failure: bool,
}

fn default_trunk() -> String {
    "main".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch_prefix() -> String {
    "agent/fix-".to_string()
}

fn default_rollback_on_failure() -> bool {
    true
}

impl Default for RepositorySection {
    fn default() -> Self {
        Self {
            trunk: default_trunk(),
            remote: default_remote(),
            branch_prefix: default_branch_prefix(),
            rollback_on_failure: default_rollback_on_failure(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_sandbox_timeout() -> u64 {
    30
}

fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_sandbox_timeout(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerSection {
    /// Full test-suite command, always run first
    #[serde(default = "default_test_command")]
    pub test_command: String,
    /// Per-test command; `{test}` is replaced by the shell-quoted test name
    #[serde(default = "default_targeted_test_command")]
    pub targeted_test_command: String,
}

fn default_test_command() -> String {
    "cargo test".to_string()
}

fn default_targeted_test_command() -> String {
    "cargo test {test}".to_string()
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            test_command: default_test_command(),
            targeted_test_command: default_targeted_test_command(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSection {
    /// Relative paths are resolved against the project directory
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("audit.jsonl")
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
        }
    }
}

/// One AI backend, driven through a shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Receives the prompt on stdin, answers on stdout
    pub command: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_timeout() -> u64 {
    120
}

/// The complete remedy.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub identity: BotIdentity,
    #[serde(default)]
    pub repository: RepositorySection,
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub audit: AuditSection,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl AgentConfig {
    pub fn config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse remedy.toml")
    }

    /// Load `.remedy/remedy.toml` from the project directory, then apply
    /// environment overrides. Returns defaults if the file doesn't exist.
    pub fn load_for_project(project_dir: &Path) -> Result<Self> {
        let config_path = Self::config_path(project_dir);
        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay `REMEDY_*` variables using the given lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("REMEDY_AUTO_APPLY") {
            self.agent.auto_apply = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("REMEDY_BOT_NAME") {
            self.identity.name = v;
        }
        if let Some(v) = lookup("REMEDY_BOT_EMAIL") {
            self.identity.email = v;
        }
        if let Some(v) = lookup("REMEDY_TRUNK") {
            self.repository.trunk = v;
        }
    }

    pub fn audit_path(&self, project_dir: &Path) -> PathBuf {
        if self.audit.path.is_absolute() {
            self.audit.path.clone()
        } else {
            project_dir.join(&self.audit.path)
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize remedy.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Human-readable problems that don't prevent loading.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !(0.0..=1.0).contains(&self.agent.max_risk) {
            warnings.push(format!("agent.max_risk {} is outside [0, 1]", self.agent.max_risk));
        }
        if !(0.0..=1.0).contains(&self.agent.min_confidence) {
            warnings.push(format!(
                "agent.min_confidence {} is outside [0, 1]",
                self.agent.min_confidence
            ));
        }
        if self.providers.is_empty() {
            warnings.push("no [[providers]] configured; every plan will be empty".to_string());
        }
        if !self.planner.targeted_test_command.contains("{test}") {
            warnings.push("planner.targeted_test_command has no {test} placeholder".to_string());
        }
        if self.sandbox.timeout_secs == 0 {
            warnings.push("sandbox.timeout_secs is 0; every test run will time out".to_string());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert!(!config.agent.auto_apply);
        assert_eq!(config.agent.max_risk, 0.4);
        assert_eq!(config.agent.min_confidence, 0.7);
        assert_eq!(config.repository.trunk, "main");
        assert_eq!(config.repository.branch_prefix, "agent/fix-");
        assert!(config.repository.rollback_on_failure);
        assert_eq!(config.sandbox.timeout_secs, 30);
        assert_eq!(config.sandbox.max_output_bytes, 10 * 1024 * 1024);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_for_project(dir.path()).unwrap();
        assert_eq!(config.identity, BotIdentity::default());
    }

    #[test]
    fn test_load_full() {
        let dir = tempfile::tempdir().unwrap();
        let remedy_dir = dir.path().join(CONFIG_DIR);
        fs::create_dir_all(&remedy_dir).unwrap();
        fs::write(
            remedy_dir.join(CONFIG_FILE),
            r#"
[agent]
auto_apply = true
temperature = 0.0

[identity]
name = "fixer"
email = "fixer@example.com"

[repository]
trunk = "master"
rollback_on_failure = false

[sandbox]
timeout_secs = 5

[planner]
test_command = "npm test"
targeted_test_command = "npm test -- -t {test}"

[[providers]]
name = "a"
command = "cat"

[[providers]]
name = "b"
command = "echo hi"
timeout_secs = 3
"#,
        )
        .unwrap();

        let config = AgentConfig::load(&AgentConfig::config_path(dir.path())).unwrap();
        assert!(config.agent.auto_apply);
        assert_eq!(config.identity.name, "fixer");
        assert_eq!(config.repository.trunk, "master");
        assert_eq!(config.repository.remote, "origin");
        assert!(!config.repository.rollback_on_failure);
        assert_eq!(config.sandbox.timeout_secs, 5);
        assert_eq!(config.sandbox.max_output_bytes, 10 * 1024 * 1024);
        assert_eq!(config.planner.test_command, "npm test");
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].timeout_secs, 120);
        assert_eq!(config.providers[1].timeout_secs, 3);
    }

    #[test]
    fn test_load_invalid_toml() {
        assert!(AgentConfig::parse("not valid toml {{{{").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REMEDY_AUTO_APPLY", "true"),
            ("REMEDY_BOT_NAME", "ci-bot"),
            ("REMEDY_BOT_EMAIL", "ci@example.com"),
            ("REMEDY_TRUNK", "develop"),
        ]
        .into_iter()
        .collect();

        let mut config = AgentConfig::default();
        config.apply_env_with(|k| env.get(k).map(|v| v.to_string()));
        assert!(config.agent.auto_apply);
        assert_eq!(config.identity.name, "ci-bot");
        assert_eq!(config.identity.email, "ci@example.com");
        assert_eq!(config.repository.trunk, "develop");
    }

    #[test]
    fn test_env_auto_apply_false_values() {
        let mut config = AgentConfig::default();
        config.agent.auto_apply = true;
        config.apply_env_with(|k| (k == "REMEDY_AUTO_APPLY").then(|| "no".to_string()));
        assert!(!config.agent.auto_apply);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = AgentConfig::config_path(dir.path());
        let mut config = AgentConfig::default();
        config.providers.push(ProviderConfig {
            name: "local".into(),
            command: "cat".into(),
            timeout_secs: 10,
        });
        config.save(&path).unwrap();

        let loaded = AgentConfig::load(&path).unwrap();
        assert_eq!(loaded.providers, config.providers);
    }

    #[test]
    fn test_audit_path_resolution() {
        let config = AgentConfig::default();
        let resolved = config.audit_path(Path::new("/srv/app"));
        assert_eq!(resolved, PathBuf::from("/srv/app/.remedy/audit.jsonl"));
    }

    #[test]
    fn test_warnings() {
        let mut config = AgentConfig::default();
        assert!(config.warnings().iter().any(|w| w.contains("providers")));
        config.agent.max_risk = 1.5;
        config.planner.targeted_test_command = "cargo test".into();
        let warnings = config.warnings();
        assert!(warnings.iter().any(|w| w.contains("max_risk")));
        assert!(warnings.iter().any(|w| w.contains("{test}")));
    }
}
