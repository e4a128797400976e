//! Model-provider streaming transport.
//!
//! One streaming call shape: a message list plus tool definitions in, an
//! ordered event sequence out. The orchestrator depends only on
//! [`ModelProvider`]; the single concrete adapter speaks the Anthropic
//! Messages wire format.

pub mod anthropic;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

// Re-exports for convenience.
pub use anthropic::AnthropicProvider;
pub use traits::{ChatRequest, ModelProvider};
