use serde::{Deserialize, Serialize};

/// Tool execution settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Deadline for a single tool handler invocation. A handler that does
    /// not return within this window produces an `execution_timeout` tool
    /// failure instead of blocking the run.
    #[serde(default = "d_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { handler_timeout_ms: d_handler_timeout_ms() }
    }
}

fn d_handler_timeout_ms() -> u64 {
    30_000
}
