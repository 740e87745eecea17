//! Diagnosis collaborators: the multi-provider query adapter and response fusion.

pub mod command;
pub mod fusion;

pub use command::CommandProvider;
pub use fusion::ConsensusFusion;

use crate::config::ProviderConfig;
use crate::models::{FusionResult, ProviderResponse};
use async_trait::async_trait;
use futures::future::join_all;

#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    pub temperature: f64,
}

/// Queries every configured AI backend with the same prompt.
#[async_trait]
pub trait AiProviderAdapter: Send + Sync {
    /// Responses from the providers that answered; failures are dropped.
    async fn call_all(&self, prompt: &str, opts: QueryOptions) -> Vec<ProviderResponse>;
}

/// Collapses provider responses into one scored judgment.
pub trait ResponseFusion: Send + Sync {
    /// Must return a result even for an empty slice.
    fn fuse(&self, responses: &[ProviderResponse]) -> FusionResult;
}

/// Fans a prompt out to several [`CommandProvider`]s concurrently.
#[derive(Debug, Default)]
pub struct MultiProviderAdapter {
    providers: Vec<CommandProvider>,
}

impl MultiProviderAdapter {
    pub fn new(providers: Vec<CommandProvider>) -> Self {
        Self { providers }
    }

    pub fn from_config(configs: &[ProviderConfig]) -> Self {
        Self::new(configs.iter().map(CommandProvider::new).collect())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl AiProviderAdapter for MultiProviderAdapter {
    async fn call_all(&self, prompt: &str, opts: QueryOptions) -> Vec<ProviderResponse> {
        let calls = self.providers.iter().map(|p| p.query(prompt, &opts));
        let results = join_all(calls).await;

        results
            .into_iter()
            .filter_map(|result| match result {
                Ok(response) => Some(response),
                Err(e) => {
                    tracing::warn!("dropping provider response: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn config(name: &str, command: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            command: command.into(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_failures_are_dropped() {
        let adapter = MultiProviderAdapter::from_config(&[
            config("good", r#"cat >/dev/null; echo '{"diagnosis":"ok","confidence":0.9}'"#),
            config("broken", "exit 1"),
            config("silent", "cat >/dev/null"),
        ]);
        let responses = adapter
            .call_all("prompt", QueryOptions { temperature: 0.2 })
            .await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].provider, "good");
    }

    #[tokio::test]
    async fn test_providers_run_concurrently() {
        let adapter = MultiProviderAdapter::from_config(&[
            config("a", "cat >/dev/null; sleep 0.5; echo a"),
            config("b", "cat >/dev/null; sleep 0.5; echo b"),
            config("c", "cat >/dev/null; sleep 0.5; echo c"),
        ]);
        let started = Instant::now();
        let responses = adapter
            .call_all("p", QueryOptions { temperature: 0.0 })
            .await;
        assert_eq!(responses.len(), 3);
        assert!(started.elapsed() < Duration::from_millis(1400));
        let names: Vec<_> = responses.iter().map(|r| r.provider.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_no_providers() {
        let adapter = MultiProviderAdapter::default();
        assert!(adapter.is_empty());
        let responses = adapter
            .call_all("p", QueryOptions { temperature: 0.2 })
            .await;
        assert!(responses.is_empty());
    }
}
