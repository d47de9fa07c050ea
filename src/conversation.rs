//! Conversation Engine (C4): the tool-calling state machine — emit request,
//! parse tool calls, execute, append assistant+tool messages, re-dispatch,
//! detect a terminal verdict (§4.4).
//!
//! Grounded on the teacher's `llm::helpers::chat_loop_with_tools` shape
//! (`ChatLoopConfig` with `max_rounds`, a tool executor, and callbacks for
//! content/tool-calls/tool-results) and on
//! `other_examples/d933c0dc_dirmacs-ares__...coordinator.rs`'s
//! `ToolCoordinator` (iteration budget, concurrent tool-batch execution,
//! `FinishReason`). The per-call pairing-by-index and "never synthesize a
//! final answer" rules are specific to this engine and are not carried over
//! from either source — both of them *do* treat a final text answer as a
//! legitimate outcome, which this engine never does.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::error::EngineFailure;
use crate::events::{ProgressChannel, ProgressLevel};
use crate::mcp::McpIntegration;
use crate::model::{Message, RequestContext, TerminalVerdict, ToolCall, ToolDescriptor, ToolResult};
use crate::provider::LlmService;
use crate::verdict;

const ENGINE_MAX_TOKENS: u32 = 4096;
const ENGINE_TEMPERATURE: f32 = 0.2;

pub struct ConversationEngine {
    llm: Arc<LlmService>,
    mcp: Arc<McpIntegration>,
    progress: Arc<ProgressChannel>,
    system_prompt: String,
    model: Option<String>,
    iteration_budget: usize,
    tool_call_budget: usize,
    cacheable_tool_names: HashSet<String>,
    enable_caching: bool,
    request_deadline: Duration,
}

impl ConversationEngine {
    pub fn new(
        llm: Arc<LlmService>,
        mcp: Arc<McpIntegration>,
        progress: Arc<ProgressChannel>,
        system_prompt: impl Into<String>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            llm,
            mcp,
            progress,
            system_prompt: system_prompt.into(),
            model: None,
            iteration_budget: config.iteration_budget,
            tool_call_budget: config.tool_call_budget_per_request,
            cacheable_tool_names: config.cacheable_tool_names.clone(),
            enable_caching: config.enable_caching,
            request_deadline: config.request_timeout(),
        }
    }

    /// Override the model used for dispatch (defaults to the service's
    /// configured default model).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Runs one request to completion. `rendered_prompt` is the already
    /// templated analyze-message (§4.4 step 1, C4.A "Message template");
    /// `context_blocks` are the prior-turn messages C7 supplies, appended
    /// after it. Enforces the overall 5-minute request deadline (§5).
    pub async fn run(
        &self,
        rendered_prompt: &str,
        ctx: &RequestContext,
        context_blocks: &[Message],
    ) -> Result<TerminalVerdict, EngineFailure> {
        match tokio::time::timeout(
            self.request_deadline,
            self.run_inner(rendered_prompt, ctx, context_blocks),
        )
        .await
        {
            Ok(result) => result,
            // overall deadline expired: same observable contract as an
            // explicit cancellation (abort, nothing appended to the session).
            Err(_) => Err(EngineFailure::Cancelled),
        }
    }

    async fn run_inner(
        &self,
        rendered_prompt: &str,
        ctx: &RequestContext,
        context_blocks: &[Message],
    ) -> Result<TerminalVerdict, EngineFailure> {
        let mut messages = vec![Message::user(rendered_prompt)];
        messages.extend_from_slice(context_blocks);

        let mut all_tool_calls: Vec<ToolCall> = Vec::new();
        let mut all_tool_results: Vec<ToolResult> = Vec::new();

        for iteration in 0..self.iteration_budget {
            let span = tracing::info_span!(
                "conversation_turn",
                session_id = %ctx.session_id,
                iteration
            );
            let _enter = span.enter();

            if ctx.cancellation.is_cancelled() {
                return Err(EngineFailure::Cancelled);
            }

            let tool_catalog = self.mcp.tool_catalog().await;

            let response = tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => return Err(EngineFailure::Cancelled),
                result = self.llm.make_request(
                    &messages,
                    Some(&self.system_prompt),
                    &tool_catalog,
                    self.model.as_deref(),
                    ENGINE_MAX_TOKENS,
                    ENGINE_TEMPERATURE,
                    self.enable_caching,
                ) => result?,
            };

            if response.tool_calls.is_empty() {
                return self.detect_terminal(&response.content);
            }

            if all_tool_calls.len() + response.tool_calls.len() > self.tool_call_budget {
                return Err(EngineFailure::ToolCallBudget {
                    budget: self.tool_call_budget,
                });
            }

            // B5: any forbidden call in the batch aborts before anything in
            // the batch executes — an allowed sibling call is never run.
            let validation = self.mcp.validate(&response.tool_calls).await;
            let forbidden = validation.forbidden_names();
            if !forbidden.is_empty() {
                return Err(EngineFailure::ForbiddenTools(forbidden));
            }

            tracing::debug!(
                tool_names = ?response.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "dispatching tool batch"
            );
            self.progress.emit(
                &ctx.session_id,
                ProgressLevel::Info,
                format!("running {} tool call(s)", response.tool_calls.len()),
                Some(iteration as u32 + 1),
                None,
                None,
            );

            let mut tool_results = tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => return Err(EngineFailure::Cancelled),
                results = self.mcp.execute(&response.tool_calls) => results,
            };

            // Cache-control is an engine decision driven by CACHEABLE_TOOL_NAMES
            // (§4.4 step 3d), not something C3 itself knows about.
            for (result, call) in tool_results.iter_mut().zip(response.tool_calls.iter()) {
                if self
                    .cacheable_tool_names
                    .contains(ToolDescriptor::base_name(&call.name))
                {
                    result.cacheable = true;
                }
            }

            let assistant_message = self.llm.format_tool_calls(&response.tool_calls);
            let result_messages = self
                .llm
                .format_tool_results(&response.tool_calls, &tool_results);

            messages.push(assistant_message);
            messages.extend(result_messages);

            all_tool_calls.extend(response.tool_calls);
            all_tool_results.extend(tool_results);
        }

        Err(EngineFailure::IterationBudget {
            budget: self.iteration_budget,
        })
    }

    /// §4.4 step 3b: lexical verdict detection on a tool-call-free response.
    fn detect_terminal(&self, content: &str) -> Result<TerminalVerdict, EngineFailure> {
        use crate::model::ScriptGenerationStatus;

        match verdict::parse_verdict(content) {
            Some(TerminalVerdict::ReuseDecision(v)) if v.should_reuse => {
                Ok(TerminalVerdict::ReuseDecision(v))
            }
            Some(TerminalVerdict::ScriptGeneration(v)) if v.status == ScriptGenerationStatus::Success => {
                Ok(TerminalVerdict::ScriptGeneration(v))
            }
            Some(TerminalVerdict::ScriptGeneration(v)) => Err(EngineFailure::ScriptGenerationFailed(
                v.final_error.unwrap_or_else(|| "script generation failed".to_string()),
            )),
            // a reuse_decision with should_reuse=false, or no parseable
            // verdict at all, is not one of the two named terminal shapes.
            _ => Err(EngineFailure::NoStructuredResponse),
        }
    }
}
