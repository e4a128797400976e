//! Tools the Crewdesk assistant can invoke mid-conversation.
//!
//! A tool is a named, schema-described capability: the typed parameter
//! schema lives in [`spec`], the name→handler table in [`registry`], and
//! the built-in field-operations tools (customers, jobs, schedule) in
//! [`ops`].

pub mod ops;
pub mod registry;
pub mod spec;

pub use registry::{ToolContext, ToolHandler, ToolRegistry};
pub use spec::{ArgumentError, ParamKind, ParamSpec, ToolSpec};
