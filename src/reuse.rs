//! Reuse Evaluator (C8): given similarity candidates from the analysis
//! library, runs a short LLM pass that returns a `reuse_decision` verdict,
//! or `None` when no LLM-based judgment was formed (§4.8).
//!
//! Per §9's elected Open Question resolution, a positive verdict here
//! short-circuits the request before the Conversation Engine (C4) runs —
//! the two reuse-emission paths in the original are collapsed to one.

use std::sync::Arc;

use crate::model::{AnalysisCandidate, Message, ReuseDecisionVerdict, TerminalVerdict};
use crate::provider::LlmService;
use crate::verdict;

const REUSE_SYSTEM_PROMPT: &str = "You decide whether an existing analysis can answer the user's question as-is. Respond with exactly one fenced ```json block containing a `reuse_decision` object: {\"reuse_decision\": {\"should_reuse\": bool, \"existing_function_name\": string, \"confidence\": number, \"reason\": string}}. Only set should_reuse to true if one of the candidates genuinely answers the question.";

pub struct ReuseEvaluator {
    llm: Arc<LlmService>,
    model: String,
    reuse_threshold: f64,
}

impl ReuseEvaluator {
    pub fn new(llm: Arc<LlmService>, model: impl Into<String>, reuse_threshold: f64) -> Self {
        Self {
            llm,
            model: model.into(),
            reuse_threshold,
        }
    }

    /// Evaluates whether `candidates` (already similarity-ranked) can
    /// satisfy `user_query` without a fresh analysis. Candidates below the
    /// reuse threshold (default 0.6) are never offered to the model.
    pub async fn evaluate(
        &self,
        user_query: &str,
        candidates: &[AnalysisCandidate],
    ) -> Option<ReuseDecisionVerdict> {
        let eligible: Vec<&AnalysisCandidate> = candidates
            .iter()
            .filter(|c| c.similarity >= self.reuse_threshold)
            .collect();
        if eligible.is_empty() {
            return None;
        }

        let prompt = build_reuse_prompt(user_query, &eligible);
        let request = self
            .llm
            .make_request(
                &[Message::user(prompt)],
                Some(REUSE_SYSTEM_PROMPT),
                &[],
                Some(&self.model),
                512,
                0.1,
                false,
            )
            .await;

        let response = match request {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "reuse evaluation request failed");
                return None;
            }
        };

        match verdict::parse_verdict(&response.content) {
            Some(TerminalVerdict::ReuseDecision(decision)) => Some(decision),
            _ => None,
        }
    }
}

fn build_reuse_prompt(user_query: &str, candidates: &[&AnalysisCandidate]) -> String {
    let mut prompt = format!("User question: {user_query}\n\nCandidate prior analyses:\n");
    for candidate in candidates {
        prompt.push_str(&format!(
            "- function `{}` (similarity {:.2}): originally answered \"{}\" — {}\n",
            candidate.function_name, candidate.similarity, candidate.question, candidate.description
        ));
    }
    prompt
}
