use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Model-provider configuration.
///
/// One streaming endpoint per deployment; there is no provider router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Hard timeout on a single provider call, including stream consumption.
    #[serde(default = "d_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Per-model pricing for cost accounting (key = model id).
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
    /// Blended dollars per 1M total tokens, applied when a model has no
    /// `pricing` entry. `None` prices unlisted models at zero (and warns).
    #[serde(default)]
    pub fallback_per_1m: Option<f64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            request_timeout_ms: d_request_timeout_ms(),
            pricing: HashMap::new(),
            fallback_per_1m: None,
        }
    }
}

/// Connection settings for the streaming model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub default_model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".into(),
            api_key_env: "CREWDESK_MODEL_API_KEY".into(),
            default_model: "claude-sonnet-4-20250514".into(),
        }
    }
}

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Dollars per 1 million input tokens.
    pub input_per_1m: f64,
    /// Dollars per 1 million output tokens.
    pub output_per_1m: f64,
}

impl ModelPricing {
    /// Estimated cost in USD for the given token counts.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_1m + output_tokens as f64 * self.output_per_1m)
            / 1_000_000.0
    }
}

fn d_request_timeout_ms() -> u64 {
    120_000
}
