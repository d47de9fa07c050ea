//! MCP Integration (C3): discovery, validation and concurrent execution of
//! tool calls against one or more named MCP servers.

pub mod client;
pub mod policy;

pub use client::McpIntegration;
pub use policy::ToolPolicy;

use crate::model::ToolCall;

/// Per-call validation outcome for one [`ToolCall`] against the current
/// tool catalog and denylist (§4.3 "Validation").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallValidation {
    Valid,
    Unknown,
    Forbidden,
}

/// Result of validating a whole batch of tool calls at once.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub all_valid: bool,
    pub per_call: Vec<(ToolCall, CallValidation)>,
}

impl ValidationReport {
    /// Qualified names of every call that failed validation, in the order
    /// they were submitted — used to populate `EngineFailure::ForbiddenTools`.
    pub fn invalid_names(&self) -> Vec<String> {
        self.per_call
            .iter()
            .filter(|(_, v)| *v != CallValidation::Valid)
            .map(|(call, _)| call.name.clone())
            .collect()
    }

    /// Qualified names of every denylisted call — the subset of
    /// `invalid_names` that must abort the request outright (§4.4 step 3a);
    /// an unknown-but-not-forbidden call is instead surfaced to the model
    /// as a per-call execution error.
    pub fn forbidden_names(&self) -> Vec<String> {
        self.per_call
            .iter()
            .filter(|(_, v)| *v == CallValidation::Forbidden)
            .map(|(call, _)| call.name.clone())
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("tool {0} is forbidden")]
    ToolForbidden(String),

    #[error("tool {0} is not in the current catalog")]
    ToolUnknown(String),

    #[error("arguments for tool {0} failed schema validation: {1}")]
    ToolArgInvalid(String, String),

    #[error("tool {0} execution failed: {1}")]
    ToolExecutionFailed(String, String),

    #[error("failed to connect to mcp server {0}: {1}")]
    ConnectionFailed(String, String),
}

impl McpError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ToolForbidden(_) => "TOOL_FORBIDDEN",
            Self::ToolUnknown(_) => "TOOL_UNKNOWN",
            Self::ToolArgInvalid(_, _) => "TOOL_ARG_INVALID",
            Self::ToolExecutionFailed(_, _) => "TOOL_EXECUTION_FAILED",
            Self::ConnectionFailed(_, _) => "MCP_CONNECTION_FAILED",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::ToolForbidden(_) | Self::ToolUnknown(_) => {
                "That request requires a tool that isn't available.".to_string()
            }
            Self::ToolArgInvalid(_, _) | Self::ToolExecutionFailed(_, _) => {
                "A tool call failed while preparing the analysis.".to_string()
            }
            Self::ConnectionFailed(_, _) => {
                "Could not reach one of the required tool servers.".to_string()
            }
        }
    }
}
