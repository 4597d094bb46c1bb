//! Model selection
//!
//! Pure routing logic, no I/O. Filters by privacy compatibility,
//! context window, and capability bits, then orders candidates by the
//! requested strategy.

use crate::catalog::{ModelSpec, PrivacyLevel, RoutingStrategy};
use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Caller-specified constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequirements {
    pub privacy: PrivacyLevel,
    pub strategy: RoutingStrategy,
    pub max_input_tokens: u32,
    pub require_json_mode: bool,
    pub require_streaming: bool,
}

impl Default for ModelRequirements {
    fn default() -> Self {
        Self {
            privacy: PrivacyLevel::Standard,
            strategy: RoutingStrategy::HighestQuality,
            max_input_tokens: 4096,
            require_json_mode: false,
            require_streaming: true,
        }
    }
}

/// Routing over a fixed catalogue.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    catalog: Vec<ModelSpec>,
}

impl ModelRouter {
    #[must_use]
    pub fn new(catalog: Vec<ModelSpec>) -> Self {
        Self { catalog }
    }

    fn qualifies(spec: &ModelSpec, requirements: &ModelRequirements) -> bool {
        spec.supports_privacy(requirements.privacy)
            && spec.context_window >= requirements.max_input_tokens
            && (!requirements.require_json_mode || spec.supports_json_mode)
            && (!requirements.require_streaming || spec.supports_streaming)
    }

    /// Select the best model for the constraints.
    ///
    /// # Errors
    /// [`GatewayError::NoEligibleModel`] when nothing qualifies.
    pub fn select(&self, requirements: &ModelRequirements) -> Result<ModelSpec, GatewayError> {
        let mut candidates: Vec<&ModelSpec> = self
            .catalog
            .iter()
            .filter(|spec| Self::qualifies(spec, requirements))
            .collect();

        if candidates.is_empty() {
            return Err(GatewayError::NoEligibleModel {
                detail: format!(
                    "privacy={:?} tokens={} json={} streaming={}",
                    requirements.privacy,
                    requirements.max_input_tokens,
                    requirements.require_json_mode,
                    requirements.require_streaming
                ),
            });
        }

        match requirements.strategy {
            RoutingStrategy::LowestCost => candidates.sort_by(|a, b| {
                (a.cost_input_per_1k, a.cost_output_per_1k)
                    .partial_cmp(&(b.cost_input_per_1k, b.cost_output_per_1k))
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            RoutingStrategy::LowestLatency => {
                candidates.sort_by_key(|spec| spec.p50_latency_ms);
            }
            RoutingStrategy::HighestQuality => candidates.sort_by(|a, b| {
                b.quality_score
                    .partial_cmp(&a.quality_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }

        let selected = candidates[0].clone();
        info!(
            model_id = %selected.model_id,
            provider = %selected.provider,
            strategy = ?requirements.strategy,
            privacy = ?requirements.privacy,
            "model selected"
        );
        Ok(selected)
    }

    /// Ordered fallback chain: the selected primary first, then every
    /// other qualifying model by quality descending.
    ///
    /// # Errors
    /// [`GatewayError::NoEligibleModel`] when nothing qualifies.
    pub fn fallback_chain(
        &self,
        requirements: &ModelRequirements,
    ) -> Result<Vec<ModelSpec>, GatewayError> {
        let primary = self.select(requirements)?;

        let mut others: Vec<ModelSpec> = self
            .catalog
            .iter()
            .filter(|spec| {
                (spec.model_id != primary.model_id || spec.provider != primary.provider)
                    && Self::qualifies(spec, requirements)
            })
            .cloned()
            .collect();
        others.sort_by(|a, b| {
            b.quality_score
                .partial_cmp(&a.quality_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut chain = vec![primary];
        chain.extend(others);
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;

    fn router() -> ModelRouter {
        ModelRouter::new(default_catalog())
    }

    #[test]
    fn highest_quality_picks_the_top_score() {
        let spec = router().select(&ModelRequirements::default()).unwrap();
        assert_eq!(spec.model_id, "gpt-4o");
    }

    #[test]
    fn lowest_cost_picks_the_cheapest() {
        let spec = router()
            .select(&ModelRequirements {
                strategy: RoutingStrategy::LowestCost,
                ..Default::default()
            })
            .unwrap();
        // Local inference is free and beats the mini model.
        assert_eq!(spec.provider, "ollama");
    }

    #[test]
    fn lowest_latency_picks_the_fastest() {
        let spec = router()
            .select(&ModelRequirements {
                strategy: RoutingStrategy::LowestLatency,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(spec.model_id, "gpt-4o-mini");
    }

    #[test]
    fn private_requests_route_to_local_only() {
        let spec = router()
            .select(&ModelRequirements {
                privacy: PrivacyLevel::Private,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(spec.provider, "ollama");
    }

    #[test]
    fn oversized_context_disqualifies_small_windows() {
        let spec = router()
            .select(&ModelRequirements {
                max_input_tokens: 150_000,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(spec.provider, "aws_bedrock");
    }

    #[test]
    fn json_mode_requirement_filters_capability_bits() {
        let err = router()
            .select(&ModelRequirements {
                privacy: PrivacyLevel::Private,
                require_json_mode: true,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoEligibleModel { .. }));
    }

    #[test]
    fn fallback_chain_enforces_capability_bits() {
        // Only one sensitive model supports JSON mode; models that
        // cannot honor it must not appear as fallbacks either.
        let chain = router()
            .fallback_chain(&ModelRequirements {
                privacy: PrivacyLevel::Sensitive,
                require_json_mode: true,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].provider, "azure_openai");
        assert!(chain.iter().all(|s| s.supports_json_mode));
    }

    #[test]
    fn fallback_chain_is_primary_then_quality_order() {
        let chain = router()
            .fallback_chain(&ModelRequirements {
                privacy: PrivacyLevel::Sensitive,
                ..Default::default()
            })
            .unwrap();

        let labels: Vec<String> = chain
            .iter()
            .map(|s| format!("{}/{}", s.provider, s.model_id))
            .collect();
        assert_eq!(
            labels,
            vec![
                "azure_openai/gpt-4o",
                "aws_bedrock/anthropic.claude-3-5-sonnet-20241022-v2:0",
                "ollama/llama3.1:8b",
            ]
        );
    }
}
