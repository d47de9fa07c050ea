//! A context-aware financial-analysis orchestrator: a multi-provider LLM
//! tool-calling engine (C1–C4, C10) wrapped in a dialogue/session context
//! layer (C5–C9) that lets a conversational client ask follow-up questions
//! without repeating itself.

pub mod config;
pub mod conversation;
pub mod dialogue;
pub mod error;
pub mod events;
pub mod library;
pub mod logging;
pub mod mcp;
pub mod model;
pub mod provider;
pub mod reuse;
pub mod search;
pub mod session;
pub mod template;
pub mod verdict;


pub use config::OrchestratorConfig;
pub use conversation::ConversationEngine;
pub use dialogue::DialogueContextService;
pub use error::OrchestratorError;
pub use events::ProgressChannel;
pub use mcp::McpIntegration;
pub use model::{RequestContext, TerminalVerdict};
pub use provider::LlmService;
pub use reuse::ReuseEvaluator;
pub use search::{ContextAwareSearch, SearchOutcome};
pub use session::SessionManager;
