//! Configuration layer for the assistant subsystem.
//!
//! Deserialized from the `[assistant]` section of the host application's
//! TOML config. Every field carries a serde default so a missing section
//! yields a usable (uncapped, provider-less) configuration.

use serde::{Deserialize, Serialize};

mod llm;
mod quota;
mod tools;

pub use llm::{LlmConfig, ModelPricing, ProviderConfig};
pub use quota::{QuotaConfig, TenantQuota};
pub use tools::ToolsConfig;

/// Root configuration for the assistant orchestration layer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AssistantConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// Bounds on a single orchestration run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum tool-call round trips per run. A model that keeps asking
    /// for tools past this bound ends the run with `tool_loop_exceeded`.
    #[serde(default = "d_max_tool_rounds")]
    pub max_tool_rounds: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { max_tool_rounds: d_max_tool_rounds() }
    }
}

fn d_max_tool_rounds() -> u32 {
    10
}
