//! Provider Adapter (C1): per-vendor formatting of messages, tools, tool
//! calls and tool results, behind a single dialect-agnostic trait.

pub mod anthropic;
pub mod openai;
pub mod service;

use crate::model::{Message, Role, ToolCall, ToolDescriptor, ToolResult};

pub use service::LlmService;

/// A tool as handed to a provider adapter, stripped down to the wire shape
/// every dialect needs (name, description, JSON-schema parameters).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl From<&ToolDescriptor> for Tool {
    fn from(d: &ToolDescriptor) -> Self {
        Self {
            name: d.qualified_name.clone(),
            description: d.description.clone(),
            parameters: d.input_schema.clone(),
        }
    }
}

/// Normalized response shape every adapter converges to, regardless of
/// vendor wire format.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
}

/// A cache-control hint attached to a content block: "retain this block for
/// reuse across requests" with an ephemeral TTL. Concrete meaning is
/// provider-specific; adapters translate it to their own wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHint {
    pub ephemeral: bool,
}

impl CacheHint {
    pub const EPHEMERAL_1H: CacheHint = CacheHint { ephemeral: true };
}

/// Per-vendor LLM dialect. Implementors own no conversation state beyond
/// what is passed in on each call; [`service::LlmService`] is the
/// provider-agnostic façade clients actually talk to.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Human-readable provider identifier, e.g. `"anthropic"` / `"openai"`.
    fn provider_type(&self) -> &'static str;

    /// Build the provider's native request and execute it. `enable_caching`
    /// requests cache-control annotation of the system prompt and the last
    /// tool descriptor, per §4.1.
    async fn make_request(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        tools: &[Tool],
        model: &str,
        max_tokens: u32,
        temperature: f32,
        enable_caching: bool,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Produce the assistant-content wire representation for a batch of
    /// tool calls, paired by position with the eventual results.
    fn format_tool_calls(&self, calls: &[ToolCall]) -> Message {
        Message::assistant(String::new(), Some(calls.to_vec()))
    }

    /// Produce tool-result messages paired positionally with `calls`.
    /// `cacheable` marks, per item, whether a cache-control annotation
    /// should be attached (driven by the engine's `CACHEABLE_TOOL_NAMES`
    /// set, not decided by the adapter itself).
    fn format_tool_results(&self, calls: &[ToolCall], results: &[ToolResult]) -> Vec<Message> {
        calls
            .iter()
            .zip(results.iter())
            .map(|(call, result)| {
                Message::tool_result(call.id.clone(), result.content.clone())
                    .with_cache_hint(result.cacheable)
            })
            .collect()
    }
}

/// Extracts plain text from an MCP `CallToolResult`-shaped JSON value
/// (structured content, a single text item, or a raw string), returning a
/// string safe to embed as tool-result wire content. The engine never
/// branches on the concrete response shape itself (§9).
pub fn unwrap_tool_content(value: &serde_json::Value) -> String {
    if let Some(s) = value.as_str() {
        return s.to_string();
    }
    if let Some(content) = value.get("content").and_then(|c| c.as_array()) {
        let texts: Vec<&str> = content
            .iter()
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
    }
    if let Some(text) = value.get("text").and_then(|t| t.as_str()) {
        return text.to_string();
    }
    serde_json::to_string(value).unwrap_or_default()
}

/// Ensures a `Role::System` message, if present, sorts first — the shape
/// every dialect expects before conversion.
pub fn split_system_prompt(messages: &[Message]) -> (Option<&str>, Vec<&Message>) {
    let mut system = None;
    let mut rest = Vec::with_capacity(messages.len());
    for m in messages {
        if m.role == Role::System && system.is_none() {
            system = Some(m.content.as_str());
        } else {
            rest.push(m);
        }
    }
    (system, rest)
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication failed")]
    Unauthorized,

    #[error("provider HTTP error: {status}: {body}")]
    HttpError { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl ProviderError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "PROVIDER_UNAUTHORIZED",
            Self::HttpError { .. } => "PROVIDER_HTTP_ERROR",
            Self::MalformedResponse(_) => "PROVIDER_MALFORMED_RESPONSE",
            Self::Timeout => "PROVIDER_TIMEOUT",
            Self::Network(_) => "PROVIDER_HTTP_ERROR",
            Self::ConfigError(_) => "PROVIDER_HTTP_ERROR",
        }
    }
}
