//! Tool dispatch: look up, validate, execute under a deadline, normalize.
//!
//! Every outcome, including every failure kind, becomes a
//! [`ToolResult`] that goes back into the conversation, so the model can
//! see what happened and adapt. Nothing here ends a run.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use cd_domain::message::ToolCall;
use cd_tools::registry::{ToolContext, ToolRegistry};

/// Outcome of one tool invocation.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Success(Value),
    Failure(String),
}

/// Normalized result for one invocation id, executed at most once.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    fn success(call: &ToolCall, payload: Value) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            outcome: ToolOutcome::Success(payload),
        }
    }

    fn failure(call: &ToolCall, reason: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            outcome: ToolOutcome::Failure(reason.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Failure(_))
    }

    /// The string content placed in the tool-role message.
    pub fn content(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success(payload) => payload.to_string(),
            ToolOutcome::Failure(reason) => reason.clone(),
        }
    }
}

/// Executes tool invocations requested by the model.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    handler_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, handler_timeout: Duration) -> Self {
        Self { registry, handler_timeout }
    }

    /// Execute one invocation. Never retries; idempotency is the
    /// handler's responsibility.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let Some((spec, handler)) = self.registry.lookup(&call.tool_name) else {
            tracing::debug!(tool = %call.tool_name, "model requested an unregistered tool");
            return ToolResult::failure(call, "unknown_tool");
        };

        if let Err(err) = spec.validate_args(&call.arguments) {
            tracing::debug!(tool = %call.tool_name, %err, "tool arguments rejected");
            return ToolResult::failure(call, format!("invalid_arguments: {}", err.field()));
        }

        let fut = handler.call(call.arguments.clone(), ctx);
        match tokio::time::timeout(self.handler_timeout, fut).await {
            Err(_) => {
                tracing::warn!(
                    tool = %call.tool_name,
                    timeout_ms = self.handler_timeout.as_millis() as u64,
                    "tool handler hit its deadline"
                );
                ToolResult::failure(call, "execution_timeout")
            }
            Ok(Err(e)) => ToolResult::failure(
                call,
                format!("execution_error: {}", sanitize_error(&e.to_string())),
            ),
            Ok(Ok(payload)) => ToolResult::success(call, payload),
        }
    }
}

const MAX_ERROR_CHARS: usize = 200;

/// Reduce a handler error to something safe to show the model (and
/// potentially the end user): first line only, length-capped. Stack
/// traces and anything below the first newline never make it through.
fn sanitize_error(raw: &str) -> String {
    let first_line = raw.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() <= MAX_ERROR_CHARS {
        first_line.to_string()
    } else {
        let mut capped: String = first_line.chars().take(MAX_ERROR_CHARS).collect();
        capped.push_str("...");
        capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use cd_domain::error::{Error, Result};
    use cd_tools::registry::ToolHandler;
    use cd_tools::spec::{ParamKind, ParamSpec, ToolSpec};

    struct EchoTool;

    #[async_trait::async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, arguments: Value, _ctx: &ToolContext) -> Result<Value> {
            Ok(serde_json::json!({ "echoed": arguments }))
        }
    }

    struct FailingTool;

    #[async_trait::async_trait]
    impl ToolHandler for FailingTool {
        async fn call(&self, _arguments: Value, _ctx: &ToolContext) -> Result<Value> {
            Err(Error::Store(
                "db write failed: unique violation\n  at repo.rs:42\n  at handler.rs:7".into(),
            ))
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl ToolHandler for SlowTool {
        async fn call(&self, _arguments: Value, _ctx: &ToolContext) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolSpec::new("echo", "Echo")
                .param(ParamSpec::required("text", ParamKind::String, "Text")),
            Arc::new(EchoTool),
        );
        registry.register(ToolSpec::new("fail", "Always fails"), Arc::new(FailingTool));
        registry.register(ToolSpec::new("slow", "Sleeps past any deadline"), Arc::new(SlowTool));
        Arc::new(registry)
    }

    fn dispatcher(timeout: Duration) -> ToolDispatcher {
        ToolDispatcher::new(registry(), timeout)
    }

    fn ctx() -> ToolContext {
        ToolContext { tenant_id: "acme".into(), actor_id: "user-1".into() }
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall { call_id: "call_1".into(), tool_name: name.into(), arguments }
    }

    #[tokio::test]
    async fn success_payload_round_trips() {
        let result = dispatcher(Duration::from_secs(5))
            .execute(&call("echo", serde_json::json!({"text": "hi"})), &ctx())
            .await;
        assert!(!result.is_error());
        let parsed: Value = serde_json::from_str(&result.content()).unwrap();
        assert_eq!(parsed["echoed"]["text"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_recoverable_failure() {
        let result = dispatcher(Duration::from_secs(5))
            .execute(&call("no.such.tool", serde_json::json!({})), &ctx())
            .await;
        assert!(result.is_error());
        assert_eq!(result.content(), "unknown_tool");
        assert_eq!(result.call_id, "call_1");
    }

    #[tokio::test]
    async fn invalid_arguments_name_the_field() {
        let result = dispatcher(Duration::from_secs(5))
            .execute(&call("echo", serde_json::json!({})), &ctx())
            .await;
        assert!(result.is_error());
        assert_eq!(result.content(), "invalid_arguments: text");
    }

    #[tokio::test]
    async fn handler_errors_are_sanitized() {
        let result = dispatcher(Duration::from_secs(5))
            .execute(&call("fail", serde_json::json!({})), &ctx())
            .await;
        assert!(result.is_error());
        let content = result.content();
        assert!(content.starts_with("execution_error: "));
        assert!(content.contains("unique violation"));
        // The pseudo stack frames below the first line are gone.
        assert!(!content.contains("repo.rs"));
        assert!(!content.contains('\n'));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let result = dispatcher(Duration::from_millis(50))
            .execute(&call("slow", serde_json::json!({})), &ctx())
            .await;
        assert!(result.is_error());
        assert_eq!(result.content(), "execution_timeout");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "x".repeat(500);
        let out = sanitize_error(&long);
        assert_eq!(out.chars().count(), MAX_ERROR_CHARS + 3);
        assert!(out.ends_with("..."));
    }
}
