//! LLM Service (C2): thin, provider-agnostic façade. Owns one adapter and
//! a default model name, applies the global provider deadline, and
//! normalizes the response shape.

use std::time::Duration;

use crate::model::{Message, ToolCall, ToolDescriptor, ToolResult};

use super::{ProviderAdapter, ProviderError, ProviderResponse, Tool};

pub struct LlmService {
    adapter: Box<dyn ProviderAdapter>,
    default_model: String,
    deadline: Duration,
}

impl LlmService {
    pub fn new(adapter: Box<dyn ProviderAdapter>, default_model: impl Into<String>) -> Self {
        Self {
            adapter,
            default_model: default_model.into(),
            deadline: Duration::from_secs(120),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn provider_type(&self) -> &'static str {
        self.adapter.provider_type()
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Forwards to the underlying adapter's dialect-specific formatting
    /// (§4.1), so the conversation engine never depends on a concrete
    /// adapter type.
    pub fn format_tool_calls(&self, calls: &[ToolCall]) -> Message {
        self.adapter.format_tool_calls(calls)
    }

    pub fn format_tool_results(&self, calls: &[ToolCall], results: &[ToolResult]) -> Vec<Message> {
        self.adapter.format_tool_results(calls, results)
    }

    /// Forward a request to the underlying adapter, applying the 120s
    /// provider-level deadline (separate from the per-request 5-minute and
    /// per-tool-call 60s deadlines enforced elsewhere, per §5).
    pub async fn make_request(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        tool_descriptors: &[ToolDescriptor],
        model: Option<&str>,
        max_tokens: u32,
        temperature: f32,
        enable_caching: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let tools: Vec<Tool> = tool_descriptors.iter().map(Tool::from).collect();
        let model = model.unwrap_or(&self.default_model);

        tracing::debug!(
            provider = self.adapter.provider_type(),
            model,
            tool_count = tools.len(),
            "dispatching provider request"
        );

        tokio::time::timeout(
            self.deadline,
            self.adapter.make_request(
                messages,
                system_prompt,
                &tools,
                model,
                max_tokens,
                temperature,
                enable_caching,
            ),
        )
        .await
        .unwrap_or(Err(ProviderError::Timeout))
    }
}
