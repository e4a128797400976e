use cd_domain::error::Result;
use cd_domain::message::{Message, ToolDefinition};
use cd_domain::stream::EventStream;

/// A provider-agnostic streaming chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send, oldest first.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier override. `None` = the adapter's default model.
    pub model: Option<String>,
}

/// The opaque streaming endpoint the orchestrator talks to.
///
/// One call shape only: submit the full message history, consume an
/// ordered [`StreamEvent`](cd_domain::stream::StreamEvent) sequence.
/// Dropping the returned stream closes the underlying connection.
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Open a streaming completion for the given request.
    async fn stream_chat(&self, req: &ChatRequest) -> Result<EventStream>;

    /// The model id billed when the request does not override it.
    fn default_model(&self) -> &str;
}
