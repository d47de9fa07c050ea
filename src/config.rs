//! Layered configuration: a TOML file merged with environment overrides,
//! in the style `swissarmyhammer` builds its own config via `figment`.

use std::collections::HashSet;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_context_model() -> String {
    "claude-haiku-4-5".to_string()
}

fn default_system_prompt_file() -> String {
    "config/system_prompt.txt".to_string()
}

fn default_analysis_message_template_file() -> String {
    "config/analyze_message.txt".to_string()
}

fn default_session_ttl_minutes() -> u64 {
    30
}

fn default_session_history_window() -> usize {
    10
}

fn default_session_max() -> usize {
    1000
}

fn default_similarity_top_k() -> usize {
    5
}

fn default_similarity_threshold() -> f64 {
    0.3
}

fn default_reuse_threshold() -> f64 {
    0.6
}

fn default_iteration_budget() -> usize {
    20
}

fn default_tool_call_budget_per_request() -> usize {
    64
}

fn default_mcp_fanout() -> usize {
    8
}

fn default_confidence_auto() -> f64 {
    0.8
}

fn default_confidence_confirm() -> f64 {
    0.5
}

fn default_enable_caching() -> bool {
    true
}

fn default_cacheable_tool_names() -> HashSet<String> {
    let mut set = HashSet::new();
    set.insert("get_function_docstring".to_string());
    set
}

fn default_tool_call_timeout_secs() -> u64 {
    60
}

fn default_provider_timeout_secs() -> u64 {
    120
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_progress_channel_capacity() -> usize {
    64
}

/// Top-level orchestrator configuration, assembled per §6's recognized
/// option table. Loaded via [`OrchestratorConfig::load`] / [`from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// `LLM_PROVIDER`: which adapter dialect to use (`anthropic` or `openai`).
    #[serde(default = "default_provider")]
    pub llm_provider: String,

    /// `DEFAULT_MODEL`.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// `CONTEXT_MODEL`: used by the dialogue context service (C5).
    #[serde(default = "default_context_model")]
    pub context_model: String,

    pub api_key: Option<String>,

    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,

    /// `SYSTEM_PROMPT_FILE`.
    #[serde(default = "default_system_prompt_file")]
    pub system_prompt_file: String,

    /// `ANALYSIS_MESSAGE_TEMPLATE_FILE`.
    #[serde(default = "default_analysis_message_template_file")]
    pub analysis_message_template_file: String,

    /// `SESSION_TTL_MINUTES`.
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: u64,

    /// `SESSION_HISTORY_WINDOW`.
    #[serde(default = "default_session_history_window")]
    pub session_history_window: usize,

    /// `SESSION_MAX`.
    #[serde(default = "default_session_max")]
    pub session_max: usize,

    /// `SIMILARITY_TOP_K`.
    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: usize,

    /// `SIMILARITY_THRESHOLD`.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// `REUSE_THRESHOLD`.
    #[serde(default = "default_reuse_threshold")]
    pub reuse_threshold: f64,

    /// `ITERATION_BUDGET`.
    #[serde(default = "default_iteration_budget")]
    pub iteration_budget: usize,

    /// `TOOL_CALL_BUDGET_PER_REQUEST`.
    #[serde(default = "default_tool_call_budget_per_request")]
    pub tool_call_budget_per_request: usize,

    /// `MCP_FANOUT`.
    #[serde(default = "default_mcp_fanout")]
    pub mcp_fanout: usize,

    /// `CONFIDENCE_AUTO`.
    #[serde(default = "default_confidence_auto")]
    pub confidence_auto: f64,

    /// `CONFIDENCE_CONFIRM`.
    #[serde(default = "default_confidence_confirm")]
    pub confidence_confirm: f64,

    /// `ENABLE_CACHING`.
    #[serde(default = "default_enable_caching")]
    pub enable_caching: bool,

    /// `CACHEABLE_TOOL_NAMES`.
    #[serde(default = "default_cacheable_tool_names")]
    pub cacheable_tool_names: HashSet<String>,

    #[serde(default = "default_tool_call_timeout_secs")]
    pub tool_call_timeout_secs: u64,

    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_progress_channel_capacity")]
    pub progress_channel_capacity: usize,

    /// Denylisted qualified tool names / glob patterns (`<server>__*`).
    #[serde(default)]
    pub denied_tools: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            llm_provider: default_provider(),
            default_model: default_model(),
            context_model: default_context_model(),
            api_key: None,
            mcp_servers: Vec::new(),
            system_prompt_file: default_system_prompt_file(),
            analysis_message_template_file: default_analysis_message_template_file(),
            session_ttl_minutes: default_session_ttl_minutes(),
            session_history_window: default_session_history_window(),
            session_max: default_session_max(),
            similarity_top_k: default_similarity_top_k(),
            similarity_threshold: default_similarity_threshold(),
            reuse_threshold: default_reuse_threshold(),
            iteration_budget: default_iteration_budget(),
            tool_call_budget_per_request: default_tool_call_budget_per_request(),
            mcp_fanout: default_mcp_fanout(),
            confidence_auto: default_confidence_auto(),
            confidence_confirm: default_confidence_confirm(),
            enable_caching: default_enable_caching(),
            cacheable_tool_names: default_cacheable_tool_names(),
            tool_call_timeout_secs: default_tool_call_timeout_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            progress_channel_capacity: default_progress_channel_capacity(),
            denied_tools: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from `path` (TOML), with `ORCH_`-prefixed
    /// environment variables taking precedence over file values.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ORCH_"))
            .extract()
    }

    /// Load configuration from environment variables only, falling back to
    /// built-in defaults. Useful for tests and for deployments without a
    /// config file on disk.
    pub fn from_env() -> Result<Self, figment::Error> {
        Figment::from(figment::providers::Serialized::defaults(Self::default()))
            .merge(Env::prefixed("ORCH_"))
            .extract()
    }

    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_call_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_minutes * 60)
    }
}

/// One configured MCP server connection, mirroring the transport-tagged
/// shape used by `querymt`'s `McpServerConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub transport: McpTransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum McpTransportConfig {
    Http {
        url: String,
        token: Option<String>,
    },
    Sse {
        url: String,
        token: Option<String>,
    },
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        envs: std::collections::HashMap<String, String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_spec_table() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.llm_provider, "anthropic");
        assert_eq!(cfg.session_ttl_minutes, 30);
        assert_eq!(cfg.session_history_window, 10);
        assert_eq!(cfg.session_max, 1000);
        assert_eq!(cfg.similarity_top_k, 5);
        assert_eq!(cfg.similarity_threshold, 0.3);
        assert_eq!(cfg.reuse_threshold, 0.6);
        assert_eq!(cfg.iteration_budget, 20);
        assert_eq!(cfg.tool_call_budget_per_request, 64);
        assert_eq!(cfg.mcp_fanout, 8);
        assert_eq!(cfg.confidence_auto, 0.8);
        assert_eq!(cfg.confidence_confirm, 0.5);
        assert!(cfg.cacheable_tool_names.contains("get_function_docstring"));
    }

    #[test]
    fn test_tool_call_timeout_duration() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.tool_call_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_session_ttl_duration() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.session_ttl(), Duration::from_secs(1800));
    }
}
