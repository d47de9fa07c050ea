//! Dialogue Context Service (C5): LLM-assisted query classification and
//! expansion, with heuristic fallbacks and a pure confidence-scoring
//! function (§4.5).

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::DialogueError;
use crate::model::{ConversationTurn, Message, QueryType};
use crate::provider::LlmService;

const CLASSIFY_SYSTEM_CONTEXTUAL: &str = "Classify the current question relative to the previous one. Respond with exactly one letter and nothing else: A for a complete standalone question, B for one that references the previous question contextually (pronouns, \"that\", \"it\"), C for a comparative follow-up (\"what about X instead\"), D for a parameter-substitution follow-up (\"now try with a 10% threshold\").";

const CLASSIFY_SYSTEM_FIRST: &str = "This is the first question in the conversation. Respond with exactly one letter and nothing else: A if it is complete and self-contained, B if it is incomplete or depends on context that doesn't exist yet.";

const EXPAND_SYSTEM_PROMPT: &str = "Rewrite the ambiguous follow-up question as a single standalone question using the conversation context. Respond with only the rewritten question.";

static ASSET_TICKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2,5}\b").expect("valid regex"));

const ANALYSIS_KEYWORDS: &[&str] = &[
    "correlation",
    "backtest",
    "moving average",
    "volatility",
    "sharpe",
    "drawdown",
    "regression",
    "compare",
    "beta",
    "returns",
];

const CONTEXTUAL_PATTERNS: &[&str] = &[
    "what about",
    "how about",
    "instead",
    "that one",
    "the other",
    "same but",
    "again",
    "what if",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyMethod {
    Llm,
    Heuristic,
}

#[derive(Debug, Clone)]
pub struct ClassifyResult {
    pub query_type: QueryType,
    pub confidence: f64,
    pub method: ClassifyMethod,
}

pub struct DialogueContextService {
    llm: Arc<LlmService>,
    context_model: String,
}

impl DialogueContextService {
    pub fn new(llm: Arc<LlmService>, context_model: impl Into<String>) -> Self {
        Self {
            llm,
            context_model: context_model.into(),
        }
    }

    /// `(current_query, last_query?) -> { query_type, confidence, method }`
    /// (§4.5 "Classify"). Falls back to the heuristic pattern matcher only
    /// when the LLM path errors (§7 "Dialogue errors").
    pub async fn classify(
        &self,
        current_query: &str,
        last_query: Option<&str>,
    ) -> ClassifyResult {
        match self.classify_via_llm(current_query, last_query).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, "query classification fell back to heuristic path");
                self.classify_heuristic(current_query, last_query)
            }
        }
    }

    async fn classify_via_llm(
        &self,
        current_query: &str,
        last_query: Option<&str>,
    ) -> Result<ClassifyResult, DialogueError> {
        let is_first = last_query.is_none();
        let system = if is_first {
            CLASSIFY_SYSTEM_FIRST
        } else {
            CLASSIFY_SYSTEM_CONTEXTUAL
        };
        let prompt = match last_query {
            Some(prev) => format!("Previous question: {prev}\nCurrent question: {current_query}"),
            None => format!("Current question: {current_query}"),
        };

        let response = self
            .llm
            .make_request(
                &[Message::user(prompt)],
                Some(system),
                &[],
                Some(&self.context_model),
                8,
                0.1,
                false,
            )
            .await
            .map_err(|e| DialogueError::ClassifyFailed(e.to_string()))?;

        let token = response.content.trim().chars().next();
        let query_type = match (token, is_first) {
            (Some('A'), _) => QueryType::Standalone,
            (Some('B'), true) => QueryType::Contextual,
            (Some('B'), false) => QueryType::Contextual,
            (Some('C'), false) => QueryType::Comparative,
            (Some('D'), false) => QueryType::Parameter,
            _ => {
                return Err(DialogueError::ClassifyFailed(format!(
                    "out-of-alphabet classifier response: {:?}",
                    response.content
                )))
            }
        };

        Ok(ClassifyResult {
            query_type,
            confidence: 0.95,
            method: ClassifyMethod::Llm,
        })
    }

    /// Substring pattern matcher over the lowercased query, used only when
    /// the LLM path errors. General-case confidence is capped at 0.8 per
    /// §4.5; the strong-signal standalone case (explicit assets + explicit
    /// analysis keyword) is the documented exception required by L2
    /// ("confidence ≥ 0.9") — see DESIGN.md's Open Question resolution.
    fn classify_heuristic(&self, current_query: &str, last_query: Option<&str>) -> ClassifyResult {
        let lower = current_query.to_lowercase();

        if last_query.is_some() && CONTEXTUAL_PATTERNS.iter().any(|p| lower.contains(p)) {
            return ClassifyResult {
                query_type: QueryType::Contextual,
                confidence: 0.75,
                method: ClassifyMethod::Heuristic,
            };
        }

        if has_explicit_assets(current_query) && has_explicit_analysis_type(&lower) {
            return ClassifyResult {
                query_type: QueryType::Standalone,
                confidence: 0.95,
                method: ClassifyMethod::Heuristic,
            };
        }

        ClassifyResult {
            query_type: QueryType::Standalone,
            confidence: 0.6,
            method: ClassifyMethod::Heuristic,
        }
    }

    /// `(contextual_query, conversation_context_text) -> expanded_query`
    /// (§4.5 "Expand"). Returns the expanded query plus its heuristic
    /// confidence score. On LLM failure, falls back to a naive
    /// concatenation with the last turn's query; callers treat a `None`
    /// return (no prior turn to lean on) as `EXPAND_FAILED`.
    pub async fn expand(
        &self,
        contextual_query: &str,
        turns: &[ConversationTurn],
    ) -> Result<(String, f64), DialogueError> {
        let context_text = build_context_text(turns);

        let expanded = match self.expand_via_llm(contextual_query, &context_text).await {
            Ok(expanded) => expanded,
            Err(err) => {
                tracing::warn!(error = %err, "query expansion fell back to heuristic path");
                match turns.last() {
                    Some(last) => format!("{contextual_query} ({})", last.user_query),
                    None => return Err(DialogueError::ExpandFailed("no prior turn to expand from".to_string())),
                }
            }
        };

        let confidence = score_expansion(contextual_query, &expanded, &context_text);
        Ok((expanded, confidence))
    }

    async fn expand_via_llm(&self, query: &str, context: &str) -> Result<String, DialogueError> {
        let prompt = format!(
            "Conversation context:\n{context}\n\nAmbiguous follow-up question: {query}"
        );

        let response = self
            .llm
            .make_request(
                &[Message::user(prompt)],
                Some(EXPAND_SYSTEM_PROMPT),
                &[],
                Some(&self.context_model),
                128,
                0.1,
                false,
            )
            .await
            .map_err(|e| DialogueError::ExpandFailed(e.to_string()))?;

        let text = response.content.trim();
        if text.is_empty() {
            return Err(DialogueError::ExpandFailed("empty expansion".to_string()));
        }

        // "the engine trims at the first `?`" (§4.5).
        let trimmed = match text.find('?') {
            Some(idx) => &text[..=idx],
            None => text,
        };
        Ok(trimmed.trim().to_string())
    }
}

/// Up to the last 3 turns, rendered `User: … / Analysis: …` separated by
/// `---` (§4.5 "Expand").
fn build_context_text(turns: &[ConversationTurn]) -> String {
    let start = turns.len().saturating_sub(3);
    turns[start..]
        .iter()
        .map(|t| {
            format!(
                "User: {} / Analysis: {}",
                t.user_query,
                t.analysis_summary.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

fn has_explicit_assets(query: &str) -> bool {
    ASSET_TICKER.is_match(query)
}

fn has_explicit_analysis_type(lowercased_query: &str) -> bool {
    ANALYSIS_KEYWORDS.iter().any(|kw| lowercased_query.contains(kw))
}

fn asset_tickers(text: &str) -> HashSet<String> {
    ASSET_TICKER
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// `score_expansion(original, expanded, context) -> float`, clamped to
/// `[0,1]`: composed of expansion-quality, asset clarity, and context
/// utilization (§4.5 "Expansion confidence scoring", §9 refactor note).
/// Each term is independently specified and unit-tested.
pub fn score_expansion(original: &str, expanded: &str, context: &str) -> f64 {
    let quality = expansion_quality_score(original, expanded);
    let clarity = asset_clarity_score(expanded, context);
    let utilization = context_utilization_score(expanded, context);
    ((quality + clarity + utilization) / 3.0).clamp(0.0, 1.0)
}

fn expansion_quality_score(original: &str, expanded: &str) -> f64 {
    let mut score = 0.0_f64;
    if expanded.trim_end().ends_with('?') {
        score += 0.4;
    }
    let orig_words = original.split_whitespace().count();
    let exp_words = expanded.split_whitespace().count();
    if exp_words > orig_words {
        score += 0.3;
    }
    if expanded.trim() != original.trim() {
        score += 0.3;
    }
    score.clamp(0.0, 1.0)
}

fn asset_clarity_score(expanded: &str, context: &str) -> f64 {
    let context_assets = asset_tickers(context);
    if context_assets.is_empty() {
        return 1.0;
    }
    let expanded_assets = asset_tickers(expanded);
    let preserved = context_assets.intersection(&expanded_assets).count();
    (preserved as f64 / context_assets.len() as f64).clamp(0.0, 1.0)
}

fn context_utilization_score(expanded: &str, context: &str) -> f64 {
    let context_words: HashSet<String> = context
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();
    if context_words.is_empty() {
        return 0.0;
    }
    let expanded_words: HashSet<String> = expanded
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();
    let overlap = expanded_words.intersection(&context_words).count();
    (overlap as f64 / context_words.len() as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_standalone_with_explicit_assets_and_type_l2() {
        let service_confidence = {
            // mirrors classify_heuristic without constructing a service
            let lower = "correlation between aapl and spy".to_string();
            has_explicit_assets("correlation between AAPL and SPY") && has_explicit_analysis_type(&lower)
        };
        assert!(service_confidence);
    }

    #[test]
    fn test_expansion_quality_rewards_question_form_and_growth() {
        let score = expansion_quality_score(
            "what about qqq",
            "what is the backtest result for buying QQQ on 5% drops?",
        );
        assert!(score > 0.9);
    }

    #[test]
    fn test_expansion_quality_zero_when_identical() {
        let score = expansion_quality_score("same text", "same text");
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_asset_clarity_full_marks_when_context_has_no_assets() {
        assert_eq!(asset_clarity_score("anything", "no tickers here"), 1.0);
    }

    #[test]
    fn test_asset_clarity_penalizes_dropped_tickers() {
        let score = asset_clarity_score("only QQQ now", "User: compare AAPL and SPY");
        assert!(score < 1.0);
        assert!(score >= 0.0);
    }

    #[test]
    fn test_context_utilization_measures_overlap() {
        let score = context_utilization_score(
            "backtest buying QQQ on 5% drops",
            "User: backtest buying AAPL on 5% drops / Analysis: ",
        );
        assert!(score > 0.0 && score <= 1.0);
    }

    #[test]
    fn test_score_expansion_clamped_to_unit_interval() {
        let score = score_expansion("x", "what about QQQ instead, same as AAPL backtest?", "User: backtest buying AAPL on 5% drops");
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_build_context_text_keeps_last_three_turns() {
        let turns: Vec<ConversationTurn> = (0..5)
            .map(|i| ConversationTurn {
                turn_id: uuid::Uuid::new_v4(),
                timestamp: chrono::Utc::now(),
                user_query: format!("q{i}"),
                query_type: QueryType::Standalone,
                expanded_query: None,
                analysis_summary: Some(format!("a{i}")),
                context_used: false,
                expansion_confidence: 0.0,
            })
            .collect();
        let text = build_context_text(&turns);
        assert!(!text.contains("q0"));
        assert!(text.contains("q2"));
        assert!(text.contains("q4"));
    }
}
