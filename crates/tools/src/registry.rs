//! The process-wide name→handler table.
//!
//! Tools are registered once at startup, then the registry is frozen
//! behind an `Arc` and shared read-only with every orchestration run.
//! Registration after that point requires external synchronization by
//! construction: [`ToolRegistry::register`] takes `&mut self`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use cd_domain::error::Result;
use cd_domain::message::ToolDefinition;

use crate::spec::ToolSpec;

/// Caller scope threaded into every handler invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tenant_id: String,
    pub actor_id: String,
}

/// An executable tool capability.
///
/// Handlers may mutate external state (create records, update schedules);
/// idempotency is the handler's responsibility; the dispatcher executes
/// each invocation id at most once and never retries.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with validated arguments. The returned value must be
    /// JSON-serializable tool-result content.
    async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<Value>;
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

/// Static lookup table from tool name to spec + handler.
///
/// Pure lookup only. Argument validation happens in the dispatcher.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a tool. Last registration wins for a duplicate name.
    pub fn register(&mut self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(spec.name.clone(), RegisteredTool { spec, handler });
    }

    /// Look up a tool's spec and handler by name.
    pub fn lookup(&self, name: &str) -> Option<(&ToolSpec, Arc<dyn ToolHandler>)> {
        self.tools
            .get(name)
            .map(|t| (&t.spec, Arc::clone(&t.handler)))
    }

    /// Provider-facing definitions for every registered tool, sorted by
    /// name so request bodies are deterministic.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.spec.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ParamKind, ParamSpec};

    struct EchoTool;

    #[async_trait::async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, arguments: Value, _ctx: &ToolContext) -> Result<Value> {
            Ok(arguments)
        }
    }

    fn echo_spec(name: &str) -> ToolSpec {
        ToolSpec::new(name, "Echo the arguments back")
            .param(ParamSpec::required("text", ParamKind::String, "Text to echo"))
    }

    #[test]
    fn lookup_finds_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_spec("echo"), Arc::new(EchoTool));

        let (spec, _handler) = registry.lookup("echo").unwrap();
        assert_eq!(spec.name, "echo");
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn definitions_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_spec("zulu"), Arc::new(EchoTool));
        registry.register(echo_spec("alpha"), Arc::new(EchoTool));

        let defs = registry.definitions();
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "zulu");
    }

    #[test]
    fn duplicate_registration_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_spec("echo"), Arc::new(EchoTool));
        registry.register(
            ToolSpec::new("echo", "Replacement description"),
            Arc::new(EchoTool),
        );
        assert_eq!(registry.len(), 1);
        let (spec, _) = registry.lookup("echo").unwrap();
        assert_eq!(spec.description, "Replacement description");
    }
}
