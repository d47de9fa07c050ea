//! Crate-wide error taxonomy.
//!
//! Every variant carries a stable `code()` and a short `user_message()`
//! suitable for returning to a caller; the `Display` impl (driven by
//! `thiserror`) includes internal detail and is only ever logged via
//! `tracing::error!`, never returned in a response body (see spec.md §7).

use crate::mcp::McpError;
use crate::provider::ProviderError;

/// Top-level error type returned by the orchestrator's public entry points.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("mcp error: {0}")]
    Mcp(#[from] McpError),

    #[error("conversation engine aborted: {0}")]
    Engine(#[from] EngineFailure),

    #[error("dialogue error: {0}")]
    Dialogue(#[from] DialogueError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("library error: {0}")]
    Library(#[from] LibraryError),
}

impl OrchestratorError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.code(),
            Self::Mcp(e) => e.code(),
            Self::Engine(e) => e.code(),
            Self::Dialogue(e) => e.code(),
            Self::Session(e) => e.code(),
            Self::Library(_) => "LIBRARY_ERROR",
        }
    }

    /// Short, non-technical message safe to surface to a caller.
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(_) => "The analysis service is temporarily unavailable.".to_string(),
            Self::Mcp(e) => e.user_message(),
            Self::Engine(e) => e.user_message(),
            Self::Dialogue(_) => "I couldn't understand that question, could you rephrase it?".to_string(),
            Self::Session(_) => "Your session has expired, please ask your question again.".to_string(),
            Self::Library(_) => "Could not look up prior analyses right now.".to_string(),
        }
    }
}

/// Errors from the conversation engine (C4). Only `ForbiddenTools`,
/// `IterationBudget`, `NoStructuredResponse` and `ScriptGenerationFailed`
/// ever abort a request outright (spec.md §4.4).
#[derive(Debug, thiserror::Error)]
pub enum EngineFailure {
    #[error("assistant requested a forbidden tool: {0:?}")]
    ForbiddenTools(Vec<String>),

    #[error("iteration budget ({budget}) exhausted")]
    IterationBudget { budget: usize },

    #[error("tool-call budget ({budget}) exhausted")]
    ToolCallBudget { budget: usize },

    #[error("assistant produced no tool calls and no parseable verdict")]
    NoStructuredResponse,

    #[error("script generation failed: {0}")]
    ScriptGenerationFailed(String),

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Mcp(#[from] McpError),
}

impl EngineFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ForbiddenTools(_) => "FORBIDDEN_TOOLS",
            Self::IterationBudget { .. } => "ITERATION_BUDGET",
            Self::ToolCallBudget { .. } => "TOOL_CALL_BUDGET",
            Self::NoStructuredResponse => "NO_STRUCTURED_RESPONSE",
            Self::ScriptGenerationFailed(_) => "SCRIPT_GENERATION_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Provider(e) => e.code(),
            Self::Mcp(e) => e.code(),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::ForbiddenTools(_) => {
                "That request requires a tool that isn't permitted.".to_string()
            }
            Self::IterationBudget { .. } | Self::ToolCallBudget { .. } => {
                "The analysis took too many steps to complete, please try a narrower question."
                    .to_string()
            }
            Self::NoStructuredResponse => {
                "The analysis did not produce a usable result, please try again.".to_string()
            }
            Self::ScriptGenerationFailed(_) => "The analysis script could not be generated.".to_string(),
            Self::Cancelled => "The request was cancelled.".to_string(),
            Self::Provider(_) => "The analysis service is temporarily unavailable.".to_string(),
            Self::Mcp(_) => "A required tool failed and the analysis could not continue.".to_string(),
        }
    }
}

/// Errors from dialogue classification/expansion (C5).
#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    #[error("classification failed: {0}")]
    ClassifyFailed(String),

    #[error("expansion failed: {0}")]
    ExpandFailed(String),

    #[error("contextual query with no conversation history")]
    NoConversationHistory,
}

impl DialogueError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ClassifyFailed(_) => "CLASSIFY_FAILED",
            Self::ExpandFailed(_) => "EXPAND_FAILED",
            Self::NoConversationHistory => "NO_CONVERSATION_HISTORY",
        }
    }
}

/// Errors from session lookup (C6).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} expired")]
    Expired(String),

    #[error("session {0} not found")]
    NotFound(String),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Expired(_) => "SESSION_EXPIRED",
            Self::NotFound(_) => "SESSION_NOT_FOUND",
        }
    }
}

/// Errors surfaced by the external, consumed-only collaborators (analysis
/// library, chat history store). The orchestrator treats these as opaque.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("external collaborator error: {0}")]
    Backend(String),
}
