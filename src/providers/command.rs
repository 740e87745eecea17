use super::QueryOptions;
use crate::config::ProviderConfig;
use crate::errors::ProviderError;
use crate::models::ProviderResponse;
use crate::util::extract_json_object;
use regex::Regex;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Confidence assigned to free-text answers that carry no score of their own.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

static DIFF_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:diff|patch)[^\n]*\n(.*?)```").expect("valid regex")
});

/// The JSON object providers are asked to answer with.
#[derive(Debug, Deserialize)]
struct StructuredReply {
    #[serde(default, alias = "analysis")]
    diagnosis: Option<String>,
    #[serde(default)]
    patch: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "risk_score")]
    risk: Option<f64>,
}

/// An AI backend driven through a shell command: the prompt goes to stdin
/// and the answer is read from stdout.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    name: String,
    command: String,
    timeout: Duration,
}

impl CommandProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn query(
        &self,
        prompt: &str,
        opts: &QueryOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("REMEDY_PROVIDER", &self.name)
            .env("REMEDY_TEMPERATURE", opts.temperature.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProviderError::Spawn {
                provider: self.name.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let exchange = async {
            if let Some(mut stdin) = stdin {
                // Commands that ignore stdin may exit before reading it.
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    tracing::debug!(provider = %self.name, "prompt not fully written: {}", e);
                }
                drop(stdin);
            }
            child.wait_with_output().await
        };

        let output = match timeout(self.timeout, exchange).await {
            Ok(result) => result.map_err(|source| ProviderError::Spawn {
                provider: self.name.clone(),
                source,
            })?,
            Err(_) => {
                return Err(ProviderError::Timeout {
                    provider: self.name.clone(),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(ProviderError::NonZeroExit {
                provider: self.name.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(ProviderError::EmptyResponse {
                provider: self.name.clone(),
            });
        }
        Ok(parse_response(&self.name, &stdout))
    }
}

/// Interpret a provider's stdout.
///
/// A JSON object with `diagnosis` and/or `patch` is taken as a structured
/// answer; anything else is free text whose first ```` ```diff ```` fence, if
/// any, becomes the patch.
pub fn parse_response(provider: &str, text: &str) -> ProviderResponse {
    let text = text.trim();

    let structured = extract_json_object(text)
        .and_then(|json| serde_json::from_str::<StructuredReply>(json).ok())
        .filter(|reply| reply.diagnosis.is_some() || reply.patch.is_some());

    if let Some(reply) = structured {
        return ProviderResponse {
            provider: provider.to_string(),
            content: reply.diagnosis.unwrap_or_default(),
            confidence: clamp_unit(reply.confidence.unwrap_or(DEFAULT_CONFIDENCE)),
            patch: reply.patch.filter(|p| !p.trim().is_empty()),
            risk_score: reply.risk.map(clamp_unit),
        };
    }

    ProviderResponse {
        provider: provider.to_string(),
        content: text.to_string(),
        confidence: DEFAULT_CONFIDENCE,
        patch: extract_diff_fence(text),
        risk_score: None,
    }
}

fn extract_diff_fence(text: &str) -> Option<String> {
    DIFF_FENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|p| !p.trim().is_empty())
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
