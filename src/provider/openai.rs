//! OpenAI-style dialect: `role` tagged messages (`system`/`user`/
//! `assistant`/`tool`), `tool_calls`/`tool_call_id` pairing, dispatched as
//! one non-streaming `POST /chat/completions` call per turn.

use serde::{Deserialize, Serialize};

use crate::model::{Message, Role, ToolCall};

use super::{split_system_prompt, ProviderAdapter, ProviderError, ProviderResponse, TokenUsage, Tool};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    fn convert_messages(&self, system_prompt: Option<&str>, rest: &[&Message]) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(rest.len() + 1);
        if let Some(text) = system_prompt {
            out.push(ChatMessage::System {
                content: text.to_string(),
            });
        }
        for msg in rest {
            match msg.role {
                Role::System => {}
                Role::User => out.push(ChatMessage::User {
                    content: msg.content.clone(),
                }),
                Role::Assistant => {
                    let tool_calls = msg.tool_calls.as_ref().map(|calls| {
                        calls
                            .iter()
                            .map(|c| OpenAIToolCall {
                                id: c.id.clone(),
                                tool_type: "function".to_string(),
                                function: OpenAIFunctionCall {
                                    name: c.name.clone(),
                                    arguments: c.arguments.to_string(),
                                },
                            })
                            .collect()
                    });
                    out.push(ChatMessage::Assistant {
                        content: if msg.content.is_empty() {
                            None
                        } else {
                            Some(msg.content.clone())
                        },
                        tool_calls,
                    });
                }
                Role::Tool => {
                    if let Some(tool_call_id) = &msg.tool_call_id {
                        out.push(ChatMessage::Tool {
                            content: msg.content.clone(),
                            tool_call_id: tool_call_id.clone(),
                        });
                    }
                }
            }
        }
        out
    }

    fn convert_tools(tools: &[Tool]) -> Option<Vec<OpenAITool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|t| OpenAITool {
                    tool_type: "function".to_string(),
                    function: OpenAIFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
        )
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    async fn make_request(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
        tools: &[Tool],
        model: &str,
        max_tokens: u32,
        temperature: f32,
        // OpenAI's chat-completions dialect has no first-class cache-control
        // annotation; prompt caching there is automatic and server-side.
        _enable_caching: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let (embedded_system, rest) = split_system_prompt(messages);
        let system = system_prompt.or(embedded_system);
        let chat_messages = self.convert_messages(system, &rest);
        let openai_tools = Self::convert_tools(tools);

        let request_body = ChatCompletionRequest {
            model: model.to_string(),
            messages: chat_messages,
            temperature: Some(temperature),
            max_completion_tokens: Some(max_tokens),
            stream: false,
            tools: openai_tools,
        };

        let response = self
            .client
            .post(format!("{OPENAI_API_BASE}/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::HttpError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("no choices in response".to_string()))?;

        let content = choice.message.content.unwrap_or_default();
        let mut tool_calls = Vec::new();
        if let Some(calls) = choice.message.tool_calls {
            for (index, call) in calls.into_iter().enumerate() {
                let arguments = serde_json::from_str(&call.function.arguments)
                    .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
                tool_calls.push(ToolCall {
                    id: call.id,
                    index,
                    name: call.function.name,
                    arguments,
                });
            }
        }

        let usage = parsed.usage.unwrap_or_default();

        Ok(ProviderResponse {
            content,
            tool_calls,
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                cached_tokens: usage
                    .prompt_tokens_details
                    .map(|d| d.cached_tokens)
                    .unwrap_or(0),
            },
        })
    }
}

// ============================== API wire types ==============================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
}

#[derive(Debug, Serialize, Clone)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize, Clone)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "role")]
enum ChatMessage {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: String },
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAIToolCall>>,
    },
    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_messages_includes_system_first() {
        let adapter = OpenAiAdapter::new("test-key");
        let user_msg = Message::user("hi");
        let converted = adapter.convert_messages(Some("be nice"), &[&user_msg]);
        assert_eq!(converted.len(), 2);
        matches!(converted[0], ChatMessage::System { .. });
    }

    #[test]
    fn test_convert_messages_pairs_tool_call_id() {
        let adapter = OpenAiAdapter::new("test-key");
        let tool_msg = Message::tool_result("call_1", "result");
        let converted = adapter.convert_messages(None, &[&tool_msg]);
        match &converted[0] {
            ChatMessage::Tool { tool_call_id, content } => {
                assert_eq!(tool_call_id, "call_1");
                assert_eq!(content, "result");
            }
            _ => panic!("expected Tool message"),
        }
    }

    #[test]
    fn test_convert_tools_empty_returns_none() {
        assert!(OpenAiAdapter::convert_tools(&[]).is_none());
    }

    /// L1: formatting a `ToolCall` into the wire dialect and parsing that
    /// wire form back yields an equivalent call (name + arguments).
    #[test]
    fn test_tool_call_round_trip_via_wire_form_l1() {
        let adapter = OpenAiAdapter::new("test-key");
        let original = ToolCall {
            id: "call_abc".to_string(),
            index: 0,
            name: "edgar__get_filing".to_string(),
            arguments: serde_json::json!({"ticker": "AAPL", "form": "10-K"}),
        };
        let assistant_msg = Message {
            role: Role::Assistant,
            content: String::new(),
            tool_call_id: None,
            tool_calls: Some(vec![original.clone()]),
            cache_hint: false,
        };
        let converted = adapter.convert_messages(None, &[&assistant_msg]);
        let wire_call = match &converted[0] {
            ChatMessage::Assistant { tool_calls: Some(calls), .. } => calls[0].clone(),
            other => panic!("expected an assistant message with tool calls, got {other:?}"),
        };

        // Round-trip the wire struct itself through JSON, as it would cross
        // the network boundary.
        let wire_json = serde_json::to_string(&wire_call).unwrap();
        let wire_call: OpenAIToolCall = serde_json::from_str(&wire_json).unwrap();

        let parsed = ToolCall {
            id: wire_call.id,
            index: 0,
            name: wire_call.function.name,
            arguments: serde_json::from_str(&wire_call.function.arguments).unwrap(),
        };

        assert_eq!(parsed.id, original.id);
        assert_eq!(parsed.name, original.name);
        assert_eq!(parsed.arguments, original.arguments);
    }
}
