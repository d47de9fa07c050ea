//! Trait boundaries for the external, consumed-only collaborators named in
//! §6 "Persisted state": the analysis library (similarity search, saving
//! completed analyses) and the chat history store. Both are out of scope
//! for this crate's implementation — only the narrow interfaces the core
//! depends on are modeled here, per §1 and §9's "ad-hoc dictionary return
//! envelopes → typed result variants" refactor.

use async_trait::async_trait;

use crate::error::LibraryError;
use crate::model::{AnalysisCandidate, ConversationTurn, SavedAnalysis};

/// `search_similar(query, top_k, threshold) -> [candidates]`,
/// `save_completed_analysis(question, script_path, meta) -> { analysis_id,
/// description }` (§6).
#[async_trait]
pub trait AnalysisLibrary: Send + Sync {
    async fn search_similar(
        &self,
        query: &str,
        top_k: usize,
        threshold: f64,
    ) -> Result<Vec<AnalysisCandidate>, LibraryError>;

    async fn save_completed_analysis(
        &self,
        question: &str,
        script_path: &str,
        meta: serde_json::Value,
    ) -> Result<SavedAnalysis, LibraryError>;
}

/// `add_assistant_message_with_analysis(...)`, `create_analysis(...)`,
/// `cache_analysis_result(...)` (§6).
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    async fn add_assistant_message_with_analysis(
        &self,
        session_id: &str,
        turn: &ConversationTurn,
    ) -> Result<(), LibraryError>;

    async fn create_analysis(
        &self,
        session_id: &str,
        data: serde_json::Value,
    ) -> Result<(), LibraryError>;

    async fn cache_analysis_result(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), LibraryError>;
}
