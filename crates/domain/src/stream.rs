use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;

/// A boxed async stream of provider events.
pub type EventStream = Pin<Box<dyn futures_core::Stream<Item = Result<StreamEvent>> + Send>>;

/// Events emitted by a model-provider stream, translated out of the wire
/// format by the adapter. The orchestrator only ever sees these.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A text fragment.
    #[serde(rename = "token")]
    Token { text: String },

    /// The model has started invoking a tool.
    #[serde(rename = "tool_call_started")]
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool-call argument data (raw JSON fragment).
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    /// A tool invocation is structurally complete.
    #[serde(rename = "tool_call_finished")]
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// The provider call ended. Carries the call's usage summary when the
    /// provider reported one.
    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        stop_reason: Option<String>,
    },

    /// A provider-side error surfaced mid-stream.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Token usage reported for one provider call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self { input_tokens, output_tokens, total_tokens: input_tokens + output_tokens }
    }

    /// Fold another call's usage into a running total. The orchestrator
    /// sums every provider call made during a run, not just the last one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0
    }
}
