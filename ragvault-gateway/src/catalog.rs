//! Model catalogue
//!
//! Static metadata per registered model/provider pair. Adding a spec to
//! the catalogue makes it immediately eligible for routing.

use serde::{Deserialize, Serialize};

/// Data privacy requirement for a request, most restrictive first
/// constraint applied during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyLevel {
    /// Any provider.
    #[default]
    Standard,
    /// GDPR-compliant providers only.
    Sensitive,
    /// Local inference only.
    Private,
}

/// Model selection optimisation objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    LowestCost,
    LowestLatency,
    #[default]
    HighestQuality,
}

/// Static metadata for one model/provider combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_id: String,
    /// Provider label; must match a registered adapter.
    pub provider: String,
    /// Maximum total tokens (input plus output).
    pub context_window: u32,
    /// USD per 1,000 input tokens; zero for local inference.
    pub cost_input_per_1k: f64,
    pub cost_output_per_1k: f64,
    /// Approximate median time-to-first-token.
    pub p50_latency_ms: u32,
    /// Subjective 0–10 ranking for quality-first routing.
    pub quality_score: f64,
    pub privacy_levels: Vec<PrivacyLevel>,
    pub supports_streaming: bool,
    pub supports_json_mode: bool,
}

impl ModelSpec {
    #[must_use]
    pub fn supports_privacy(&self, level: PrivacyLevel) -> bool {
        self.privacy_levels.contains(&level)
    }

    /// USD cost of one call at this model's list prices.
    #[must_use]
    pub fn cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        {
            input_tokens as f64 / 1000.0 * self.cost_input_per_1k
                + output_tokens as f64 / 1000.0 * self.cost_output_per_1k
        }
    }
}

/// Default registered models, mirroring public list prices.
#[must_use]
pub fn default_catalog() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            model_id: "gpt-4o".to_string(),
            provider: "openai".to_string(),
            context_window: 128_000,
            cost_input_per_1k: 0.005,
            cost_output_per_1k: 0.015,
            p50_latency_ms: 900,
            quality_score: 9.5,
            privacy_levels: vec![PrivacyLevel::Standard],
            supports_streaming: true,
            supports_json_mode: true,
        },
        ModelSpec {
            model_id: "gpt-4o-mini".to_string(),
            provider: "openai".to_string(),
            context_window: 128_000,
            cost_input_per_1k: 0.000_15,
            cost_output_per_1k: 0.000_6,
            p50_latency_ms: 400,
            quality_score: 8.0,
            privacy_levels: vec![PrivacyLevel::Standard],
            supports_streaming: true,
            supports_json_mode: true,
        },
        // Same deployment behind an EU endpoint, so it also satisfies
        // the sensitive tier.
        ModelSpec {
            model_id: "gpt-4o".to_string(),
            provider: "azure_openai".to_string(),
            context_window: 128_000,
            cost_input_per_1k: 0.005,
            cost_output_per_1k: 0.015,
            p50_latency_ms: 1_100,
            quality_score: 9.5,
            privacy_levels: vec![PrivacyLevel::Standard, PrivacyLevel::Sensitive],
            supports_streaming: true,
            supports_json_mode: true,
        },
        ModelSpec {
            model_id: "anthropic.claude-3-5-sonnet-20241022-v2:0".to_string(),
            provider: "aws_bedrock".to_string(),
            context_window: 200_000,
            cost_input_per_1k: 0.003,
            cost_output_per_1k: 0.015,
            p50_latency_ms: 1_200,
            quality_score: 9.3,
            privacy_levels: vec![PrivacyLevel::Standard, PrivacyLevel::Sensitive],
            supports_streaming: true,
            supports_json_mode: false,
        },
        ModelSpec {
            model_id: "llama3.1:8b".to_string(),
            provider: "ollama".to_string(),
            context_window: 128_000,
            cost_input_per_1k: 0.0,
            cost_output_per_1k: 0.0,
            p50_latency_ms: 2_000,
            quality_score: 7.0,
            privacy_levels: vec![
                PrivacyLevel::Standard,
                PrivacyLevel::Sensitive,
                PrivacyLevel::Private,
            ],
            supports_streaming: true,
            supports_json_mode: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_uses_both_price_axes() {
        let spec = &default_catalog()[0];
        let cost = spec.cost_usd(2000, 1000);
        assert!((cost - (0.01 + 0.015)).abs() < 1e-9);
    }

    #[test]
    fn only_local_models_satisfy_private() {
        let catalog = default_catalog();
        let private: Vec<&ModelSpec> = catalog
            .iter()
            .filter(|s| s.supports_privacy(PrivacyLevel::Private))
            .collect();
        assert_eq!(private.len(), 1);
        assert_eq!(private[0].provider, "ollama");
    }
}
