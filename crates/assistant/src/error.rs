//! Fatal run errors.
//!
//! Tool failures are deliberately absent: they are tool-result payloads
//! fed back to the model, never run-ending errors. Everything here ends
//! the run through the orchestrator's single finalize path.

use std::time::Duration;

use cd_domain::error::Error;

use crate::quota::QuotaScope;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Admission denied. Recoverable at the next window boundary.
    #[error("quota exceeded: {}", scope.as_str())]
    QuotaExceeded { scope: QuotaScope, retry_after: Duration },

    /// Transport failure, malformed stream, or a provider-side error.
    /// No automatic retry here; retry policy belongs to the caller.
    #[error("provider transport: {0}")]
    Provider(#[from] Error),

    /// The model kept requesting tools past the configured round bound.
    #[error("tool loop exceeded after {rounds} rounds")]
    ToolLoopExceeded { rounds: u32 },
}

impl RunError {
    /// Stable machine-readable reason for the caller-facing error event.
    pub fn reason(&self) -> &'static str {
        match self {
            RunError::QuotaExceeded { scope, .. } => scope.as_str(),
            RunError::Provider(_) => "provider_transport",
            RunError::ToolLoopExceeded { .. } => "tool_loop_exceeded",
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RunError::QuotaExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}
