//! The conversation run loop, the orchestrator at the center of the
//! assistant.
//!
//! One run: admit → stream the provider response → dispatch any tool
//! calls → resume with the results → repeat, until the model stops
//! asking for tools or a bound is hit. Every exit (completion,
//! cancellation, any fatal error) funnels through a single finalize
//! section that records consumed usage and emits exactly one terminal
//! event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use cd_domain::config::AssistantConfig;
use cd_domain::error::Error;
use cd_domain::message::{Message, ToolCall, ToolDefinition};
use cd_domain::stream::{StreamEvent, Usage};
use cd_providers::{ChatRequest, ModelProvider};
use cd_tools::registry::{ToolContext, ToolRegistry};

use crate::cancel::CancelToken;
use crate::dispatch::ToolDispatcher;
use crate::error::RunError;
use crate::quota::QuotaManager;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events and handles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalized events delivered to the caller (UI/API layer). Raw
/// provider event shapes never cross this boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum AssistantEvent {
    /// Incremental assistant text.
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    /// The model requested a tool (invocation structurally complete).
    #[serde(rename = "tool_call_requested")]
    ToolCallRequested {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },

    /// A tool invocation finished (success or recoverable failure).
    #[serde(rename = "tool_call_resolved")]
    ToolCallResolved {
        call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },

    /// Token usage reported for one completed provider call.
    #[serde(rename = "usage_update")]
    UsageUpdate {
        input_tokens: u64,
        output_tokens: u64,
        total_tokens: u64,
    },

    /// The run completed naturally. Carries aggregate usage across every
    /// provider call in the run.
    #[serde(rename = "done")]
    Done { usage: Usage },

    /// The run was cancelled by the caller. Partial text already
    /// streamed is echoed for convenience; consumed usage was recorded.
    #[serde(rename = "cancelled")]
    Cancelled { partial: String },

    /// The run ended in a fatal error. `reason` is machine-readable:
    /// `request-rate` / `daily-token` / `monthly-token`,
    /// `provider_transport`, or `tool_loop_exceeded`.
    #[serde(rename = "error")]
    Error {
        reason: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
}

/// Input to one orchestration run. The message list is owned by the run
/// for its duration; the caller keeps its own copy.
#[derive(Debug, Clone)]
pub struct RunInput {
    pub tenant_id: String,
    pub actor_id: String,
    pub messages: Vec<Message>,
    /// Model override; `None` = the provider's default model.
    pub model: Option<String>,
}

/// Handle to a running orchestration: the event stream plus cancellation.
pub struct RunHandle {
    pub run_id: Uuid,
    pub events: mpsc::Receiver<AssistantEvent>,
    cancel: CancelToken,
}

impl RunHandle {
    /// Request cancellation. The run closes its provider stream promptly
    /// and still records whatever usage completed calls consumed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

/// Internal terminal outcome of the run loop, before finalize.
enum RunEnd {
    Cancelled { partial: String },
    Failed(RunError),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assistant
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The orchestrator. One instance per process; runs are independent
/// tokio tasks and may overlap freely, including for the same tenant.
/// Only the quota manager's per-tenant sections serialize.
#[derive(Clone)]
pub struct Assistant {
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    dispatcher: ToolDispatcher,
    quotas: Arc<QuotaManager>,
    max_tool_rounds: u32,
}

impl Assistant {
    pub fn new(
        config: &AssistantConfig,
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        quotas: Arc<QuotaManager>,
    ) -> Self {
        let dispatcher = ToolDispatcher::new(
            Arc::clone(&registry),
            Duration::from_millis(config.tools.handler_timeout_ms),
        );
        Self {
            provider,
            registry,
            dispatcher,
            quotas,
            max_tool_rounds: config.run.max_tool_rounds,
        }
    }

    /// Start a run. Events arrive on the returned handle as they happen;
    /// the last event is always exactly one of `Done` / `Cancelled` /
    /// `Error`.
    pub fn start_run(&self, input: RunInput) -> RunHandle {
        let (tx, rx) = mpsc::channel::<AssistantEvent>(64);
        let cancel = CancelToken::new();
        let run_id = Uuid::new_v4();

        let span = tracing::info_span!(
            "assistant_run",
            %run_id,
            tenant_id = %input.tenant_id,
            actor_id = %input.actor_id,
        );

        let this = self.clone();
        let token = cancel.clone();
        tokio::spawn(
            async move {
                this.drive(input, tx, token).await;
            }
            .instrument(span),
        );

        RunHandle { run_id, events: rx, cancel }
    }

    /// Run the loop, then finalize. This is the only exit path: usage
    /// recording and the terminal event are identical for every outcome.
    async fn drive(
        &self,
        input: RunInput,
        tx: mpsc::Sender<AssistantEvent>,
        cancel: CancelToken,
    ) {
        let mut totals = Usage::default();
        let outcome = self.run_loop(&input, &tx, &cancel, &mut totals).await;

        // Tokens consumed by completed provider calls are billable on
        // every path, including cancellation and errors.
        if !totals.is_zero() {
            let model_id = input
                .model
                .clone()
                .unwrap_or_else(|| self.provider.default_model().to_string());
            self.quotas.record(
                &input.tenant_id,
                &input.actor_id,
                &model_id,
                totals.input_tokens,
                totals.output_tokens,
            );
        }

        let terminal = match outcome {
            Ok(()) => AssistantEvent::Done { usage: totals },
            Err(RunEnd::Cancelled { partial }) => {
                tracing::debug!("run cancelled by caller");
                AssistantEvent::Cancelled { partial }
            }
            Err(RunEnd::Failed(err)) => {
                tracing::warn!(reason = err.reason(), error = %err, "run failed");
                AssistantEvent::Error {
                    reason: err.reason().to_string(),
                    message: err.to_string(),
                    retry_after_secs: err.retry_after().map(|d| d.as_secs()),
                }
            }
        };
        let _ = tx.send(terminal).await;
    }

    async fn run_loop(
        &self,
        input: &RunInput,
        tx: &mpsc::Sender<AssistantEvent>,
        cancel: &CancelToken,
        totals: &mut Usage,
    ) -> Result<(), RunEnd> {
        let mut messages = input.messages.clone();
        let tool_defs: Vec<ToolDefinition> = self.registry.definitions();
        let ctx = ToolContext {
            tenant_id: input.tenant_id.clone(),
            actor_id: input.actor_id.clone(),
        };

        let mut rounds_used: u32 = 0;

        loop {
            // ── Admission before every provider call ─────────────────
            // A denial here never opens a provider connection.
            self.quotas.admit(&input.tenant_id).map_err(|denied| {
                RunEnd::Failed(RunError::QuotaExceeded {
                    scope: denied.scope,
                    retry_after: denied.retry_after,
                })
            })?;

            if cancel.is_cancelled() {
                return Err(RunEnd::Cancelled { partial: String::new() });
            }

            // ── Stream one provider call ─────────────────────────────
            let req = ChatRequest {
                messages: messages.clone(),
                tools: tool_defs.clone(),
                temperature: Some(0.2),
                max_tokens: None,
                model: input.model.clone(),
            };
            let mut stream = self
                .provider
                .stream_chat(&req)
                .await
                .map_err(|e| RunEnd::Failed(RunError::Provider(e)))?;

            let mut text_buf = String::new();
            let mut pending: Vec<ToolCall> = Vec::new();
            let mut call_usage: Option<Usage> = None;
            // Invocations still assembling: call_id -> (name, args json buffer).
            let mut open_calls: HashMap<String, (String, String)> = HashMap::new();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        // Dropping the stream closes the connection.
                        return Err(RunEnd::Cancelled { partial: text_buf });
                    }
                    next = stream.next() => next,
                };
                let Some(event) = next else { break };
                let event = event.map_err(|e| RunEnd::Failed(RunError::Provider(e)))?;

                match event {
                    StreamEvent::Token { text } => {
                        let _ = tx.send(AssistantEvent::TextDelta { text: text.clone() }).await;
                        text_buf.push_str(&text);
                    }
                    StreamEvent::ToolCallStarted { call_id, tool_name } => {
                        open_calls.insert(call_id, (tool_name, String::new()));
                    }
                    StreamEvent::ToolCallDelta { call_id, delta } => {
                        if let Some((_, args)) = open_calls.get_mut(&call_id) {
                            args.push_str(&delta);
                        }
                    }
                    StreamEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                        open_calls.remove(&call_id);
                        let _ = tx
                            .send(AssistantEvent::ToolCallRequested {
                                call_id: call_id.clone(),
                                tool_name: tool_name.clone(),
                                arguments: arguments.clone(),
                            })
                            .await;
                        pending.push(ToolCall { call_id, tool_name, arguments });
                    }
                    StreamEvent::Done { usage, .. } => {
                        call_usage = usage;
                    }
                    StreamEvent::Error { message } => {
                        return Err(RunEnd::Failed(RunError::Provider(Error::Provider {
                            provider: "stream".into(),
                            message,
                        })));
                    }
                }
            }

            // Invocations that saw start/delta but no finish event:
            // salvage whatever parses rather than leaving them dangling.
            for (call_id, (tool_name, args)) in open_calls.drain() {
                let arguments: Value = if args.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    match serde_json::from_str(&args) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!(
                                call_id = %call_id,
                                tool = %tool_name,
                                error = %e,
                                "tool call arguments are not valid JSON; defaulting to empty object"
                            );
                            Value::Object(Default::default())
                        }
                    }
                };
                let _ = tx
                    .send(AssistantEvent::ToolCallRequested {
                        call_id: call_id.clone(),
                        tool_name: tool_name.clone(),
                        arguments: arguments.clone(),
                    })
                    .await;
                pending.push(ToolCall { call_id, tool_name, arguments });
            }

            if let Some(usage) = call_usage {
                totals.accumulate(&usage);
                let _ = tx
                    .send(AssistantEvent::UsageUpdate {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        total_tokens: usage.total_tokens,
                    })
                    .await;
            }

            // ── Natural completion ───────────────────────────────────
            if pending.is_empty() {
                return Ok(());
            }

            // ── Tool round ───────────────────────────────────────────
            rounds_used += 1;
            if rounds_used > self.max_tool_rounds {
                return Err(RunEnd::Failed(RunError::ToolLoopExceeded {
                    rounds: self.max_tool_rounds,
                }));
            }
            tracing::debug!(round = rounds_used, calls = pending.len(), "dispatching tool calls");

            messages.push(Message::assistant_tool_use(&text_buf, &pending));

            // All calls dispatch concurrently; results come back in
            // request order. Cancellation aborts the round.
            let dispatches =
                futures_util::future::join_all(pending.iter().map(|c| self.dispatcher.execute(c, &ctx)));
            let results = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RunEnd::Cancelled { partial: text_buf });
                }
                results = dispatches => results,
            };

            // Every invocation gets a tool-role message appended,
            // failures included, before the next provider call.
            for result in results {
                let content = result.content();
                let is_error = result.is_error();
                let _ = tx
                    .send(AssistantEvent::ToolCallResolved {
                        call_id: result.call_id.clone(),
                        tool_name: result.tool_name.clone(),
                        content: content.clone(),
                        is_error,
                    })
                    .await;
                messages.push(Message::tool_result(&result.call_id, content, is_error));
            }
        }
    }
}
