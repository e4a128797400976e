//! The Crewdesk assistant orchestration layer.
//!
//! Drives the request/stream/tool-call/resume loop against the model
//! provider, dispatches tool invocations through the registry, and meters
//! every billable call against per-tenant quotas with an append-only usage
//! ledger behind them.

pub mod cancel;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod quota;
pub mod run;

// Re-exports for convenience.
pub use cancel::CancelToken;
pub use dispatch::{ToolDispatcher, ToolOutcome, ToolResult};
pub use error::RunError;
pub use ledger::{JsonlLedger, MemoryLedger, UsageLedger, UsageLedgerEntry};
pub use quota::{Admission, QuotaDenied, QuotaManager, QuotaScope, TenantQuotaStatus};
pub use run::{Assistant, AssistantEvent, RunHandle, RunInput};
