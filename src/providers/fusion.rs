use super::ResponseFusion;
use crate::models::{FusionResult, ProviderResponse};

/// Risk assumed for responses that do not score themselves.
pub const DEFAULT_RISK: f64 = 0.5;

/// Mean-score consensus over provider responses.
///
/// Confidence and risk are arithmetic means; the consensus text and the
/// preferred patch come from the most confident response. Every distinct
/// patch is kept as a candidate for the planner.
#[derive(Debug, Default, Clone)]
pub struct ConsensusFusion;

impl ConsensusFusion {
    pub fn new() -> Self {
        Self
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

impl ResponseFusion for ConsensusFusion {
    fn fuse(&self, responses: &[ProviderResponse]) -> FusionResult {
        // First response wins ties.
        let Some(leader) = responses
            .iter()
            .reduce(|best, r| if r.confidence > best.confidence { r } else { best })
        else {
            return FusionResult::degenerate();
        };

        let confidence = mean(responses.iter().map(|r| r.confidence)).unwrap_or(0.0);
        let risk_score = mean(
            responses
                .iter()
                .map(|r| r.risk_score.unwrap_or(DEFAULT_RISK)),
        )
        .unwrap_or(DEFAULT_RISK);

        let mut candidate_patches: Vec<String> = Vec::new();
        for patch in responses.iter().filter_map(|r| r.patch.as_deref()) {
            if !patch.trim().is_empty() && !candidate_patches.iter().any(|p| p == patch) {
                candidate_patches.push(patch.to_string());
            }
        }

        let patch = leader
            .patch
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| candidate_patches.first().cloned());

        FusionResult {
            confidence: confidence.clamp(0.0, 1.0),
            risk_score: risk_score.clamp(0.0, 1.0),
            consensus_response: leader.content.clone(),
            providers: responses.iter().map(|r| r.provider.clone()).collect(),
            patch,
            candidate_patches,
        }
    }
}
