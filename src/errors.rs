//! Typed error hierarchy for the remediation agent.
//!
//! One enum per collaborator boundary:
//! - `ProviderError`: a single AI provider failed (tolerated by the fan-out)
//! - `SandboxError`: the test subprocess could not produce a verdict
//! - `VcsError`: a version-control primitive failed
//! - `RemediationError`: orchestrator-internal failures, converted into a
//!   rejected `FixResult` at the pipeline boundary

use thiserror::Error;

/// Errors from a single AI provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider {provider} failed to start: {source}")]
    Spawn {
        provider: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Provider {provider} timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("Provider {provider} exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        provider: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Provider {provider} returned an empty response")]
    EmptyResponse { provider: String },
}

/// Errors from the sandboxed test subprocess.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Test command timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Test output exceeded the {limit} byte limit")]
    OutputLimitExceeded { limit: usize },

    #[error("Failed to spawn test command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No test commands to run")]
    NoCommands,
}

/// Errors from version-control primitives.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Working tree has uncommitted changes")]
    DirtyTree,

    #[error("git {op} failed: {stderr}")]
    CommandFailed { op: String, stderr: String },

    #[error("Failed to run git {op}: {source}")]
    Spawn {
        op: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write patch file: {0}")]
    PatchFile(#[source] std::io::Error),

    #[error("Patch is empty")]
    EmptyPatch,

    #[error("Repository error: {0}")]
    Git(#[from] git2::Error),
}

/// Errors raised inside one pipeline run.
#[derive(Debug, Error)]
pub enum RemediationError {
    #[error("Pipeline panicked during {stage}: {message}")]
    Panicked { stage: String, message: String },

    #[error("Invalid incident: {0}")]
    InvalidIncident(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
