//! Shared data types threaded through the conversation, dialogue, session
//! and MCP layers. Mirrors spec.md §3 "Data model".

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single role-tagged message in a conversation, provider-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set by the conversation engine on select tool-result messages
    /// (§4.4 step 3d); adapters that support cache-control annotation
    /// translate this into their own wire shape. Ignored by dialects that
    /// don't support it (e.g. the OpenAI adapter).
    pub cache_hint: bool,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
            cache_hint: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
            cache_hint: false,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls,
            cache_hint: false,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
            cache_hint: false,
        }
    }

    pub fn with_cache_hint(mut self, hint: bool) -> Self {
        self.cache_hint = hint;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the assistant. `index` preserves the
/// position in which the model emitted the call so that results can be
/// paired back up regardless of the order execution completes in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub index: usize,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Outcome of executing a `ToolCall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
    /// Set when the result is large enough / stable enough to be worth
    /// annotating for provider-side prompt caching (see provider::CacheHint).
    pub cacheable: bool,
}

/// A tool as advertised to the model, fully qualified as
/// `<server>__<tool>` once discovered from an MCP server (C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub qualified_name: String,
    pub server: String,
    pub raw_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    pub fn qualify(server: &str, raw_name: &str) -> String {
        format!("{server}__{raw_name}")
    }

    /// The unqualified tool name, used to test membership in
    /// `CACHEABLE_TOOL_NAMES` (§4.4 step 3d).
    pub fn base_name(qualified_name: &str) -> &str {
        qualified_name
            .split_once("__")
            .map(|(_, tool)| tool)
            .unwrap_or(qualified_name)
    }
}

/// Classification assigned to a user query by the Dialogue Context Service
/// (C5), per spec.md §3 "ConversationTurn".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Standalone,
    Contextual,
    Comparative,
    Parameter,
}

/// One completed turn of a conversation, appended only by C7 after a
/// request reaches a proceed state (§3 "ConversationTurn"); immutable
/// thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_query: String,
    pub query_type: QueryType,
    pub expanded_query: Option<String>,
    pub analysis_summary: Option<String>,
    pub context_used: bool,
    pub expansion_confidence: f64,
}

/// An identified container for conversation turns with a TTL and a bounded
/// history window (§3 "Session").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub turns: VecDeque<ConversationTurn>,
    pub history_window_size: usize,
}

impl Session {
    pub fn new(session_id: impl Into<String>, history_window_size: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            last_activity: now,
            turns: VecDeque::new(),
            history_window_size,
        }
    }

    pub fn last_turn(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    pub fn is_expired(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> bool {
        let elapsed = now.signed_duration_since(self.last_activity);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => elapsed >= ttl,
            Err(_) => false,
        }
    }

    /// FIFO trim to `history_window_size` (P4/B3).
    pub fn push_turn(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.history_window_size {
            self.turns.pop_front();
        }
    }
}

/// A prior analysis candidate fetched from the external analysis library,
/// scored by the reuse evaluator (C8). Never mutated by the core (§3
/// "AnalysisCandidate").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisCandidate {
    pub function_name: String,
    pub filename: String,
    pub similarity: f64,
    pub question: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub script_path: String,
}

/// Status of a `script_generation` terminal verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScriptGenerationStatus {
    Success,
    Failed,
}

/// `ReuseDecision { should_reuse, existing_function_name?, confidence,
/// reason, script_name?, parameters?, execution? }` (§3 "TerminalVerdict").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReuseDecisionVerdict {
    pub should_reuse: bool,
    pub existing_function_name: Option<String>,
    pub confidence: f64,
    pub reason: String,
    pub script_name: Option<String>,
    pub parameters: Option<serde_json::Value>,
    pub execution: Option<serde_json::Value>,
}

/// `ScriptGeneration { status, script_name?, analysis_description,
/// mcp_calls, execution?, final_error? }` (§3 "TerminalVerdict").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptGenerationVerdict {
    pub status: ScriptGenerationStatus,
    pub script_name: Option<String>,
    pub analysis_description: String,
    pub mcp_calls: Vec<serde_json::Value>,
    pub execution: Option<serde_json::Value>,
    pub final_error: Option<String>,
}

/// Exactly one of `ReuseDecision` or `ScriptGeneration` (§3, invariant P1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TerminalVerdict {
    ReuseDecision(ReuseDecisionVerdict),
    ScriptGeneration(ScriptGenerationVerdict),
}

impl TerminalVerdict {
    pub fn response_type(&self) -> &'static str {
        match self {
            Self::ReuseDecision(_) => "reuse_decision",
            Self::ScriptGeneration(v) if v.status == ScriptGenerationStatus::Success => {
                "script_generation"
            }
            Self::ScriptGeneration(_) => "script_generation_failed",
        }
    }
}

/// Per-request context threaded from the HTTP/CLI boundary (out of scope
/// for this crate) down into the engine: identifies the caller's session
/// and carries cancellation/deadline plumbing.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session_id: String,
    pub request_id: Uuid,
    pub started_at: std::time::Instant,
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl RequestContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: Uuid::new_v4(),
            started_at: std::time::Instant::now(),
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }
}

/// A saved analysis returned by the external analysis library after a
/// successful `script_generation` (§6 "Persisted state").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedAnalysis {
    pub analysis_id: String,
    pub description: String,
}

/// Metadata attached to a saved analysis, kept loose (`HashMap`) since the
/// external analysis library owns its own schema.
pub type AnalysisMetadata = HashMap<String, serde_json::Value>;
