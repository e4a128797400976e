//! Shared types for the Crewdesk assistant subsystem.
//!
//! Everything the other crates agree on lives here: the provider-agnostic
//! conversation model, the streaming event vocabulary, the shared error
//! type, and the config layer.

pub mod config;
pub mod error;
pub mod message;
pub mod stream;

// Re-exports for convenience.
pub use error::{Error, Result};
pub use message::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
pub use stream::{EventStream, StreamEvent, Usage};
