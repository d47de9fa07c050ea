//! Verdict Parser (C10): extracts a `reuse_decision` or `script_generation`
//! JSON blob from free-form assistant text (§4.10).
//!
//! Lexical only — fenced ```json blocks are tried first, in order, then the
//! whole body as a last resort. The first structurally valid match wins;
//! malformed or unrecognized JSON is silently skipped, never an error (a
//! pure function, so L3 — parsing twice yields the same result — holds
//! trivially).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::model::{
    ReuseDecisionVerdict, ScriptGenerationStatus, ScriptGenerationVerdict, TerminalVerdict,
};

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)```").expect("valid regex"));

pub fn parse_verdict(text: &str) -> Option<TerminalVerdict> {
    for caps in FENCED_JSON.captures_iter(text) {
        let candidate = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if let Ok(value) = serde_json::from_str::<Value>(candidate.trim()) {
            if let Some(verdict) = from_root(&value) {
                return Some(verdict);
            }
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return from_root(&value);
    }

    None
}

fn from_root(root: &Value) -> Option<TerminalVerdict> {
    if let Some(reuse) = root.get("reuse_decision") {
        return parse_reuse_decision(reuse).map(TerminalVerdict::ReuseDecision);
    }
    if let Some(script) = root.get("script_generation") {
        return parse_script_generation(script).map(TerminalVerdict::ScriptGeneration);
    }
    None
}

fn parse_reuse_decision(v: &Value) -> Option<ReuseDecisionVerdict> {
    let should_reuse = v.get("should_reuse")?.as_bool()?;
    let existing_function_name = v
        .get("existing_function_name")
        .and_then(|x| x.as_str())
        .map(str::to_string);
    let confidence = v.get("confidence").and_then(|c| c.as_f64());

    // "should_reuse=true requires also existing_function_name and
    // confidence" (§4.10) — malformed otherwise, fall through as no match.
    if should_reuse && (existing_function_name.is_none() || confidence.is_none()) {
        return None;
    }

    Some(ReuseDecisionVerdict {
        should_reuse,
        existing_function_name,
        confidence: confidence.unwrap_or(0.0),
        reason: v
            .get("reason")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string(),
        script_name: v
            .get("script_name")
            .and_then(|s| s.as_str())
            .map(str::to_string),
        parameters: v.get("parameters").cloned(),
        execution: v.get("execution").cloned(),
    })
}

fn parse_script_generation(v: &Value) -> Option<ScriptGenerationVerdict> {
    let status = match v.get("status").and_then(|s| s.as_str())? {
        "success" => ScriptGenerationStatus::Success,
        "failed" => ScriptGenerationStatus::Failed,
        _ => return None,
    };

    let script_name = v
        .get("script_name")
        .and_then(|s| s.as_str())
        .map(str::to_string);
    let mcp_calls: Vec<Value> = v
        .get("mcp_calls")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    // "success additionally requires script_name and mcp_calls" (§4.10).
    if status == ScriptGenerationStatus::Success
        && (script_name.is_none() || v.get("mcp_calls").is_none())
    {
        return None;
    }

    Some(ScriptGenerationVerdict {
        status,
        script_name,
        analysis_description: v
            .get("analysis_description")
            .and_then(|d| d.as_str())
            .unwrap_or_default()
            .to_string(),
        mcp_calls,
        execution: v.get("execution").cloned(),
        final_error: v
            .get("final_error")
            .and_then(|e| e.as_str())
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TerminalVerdict;

    #[test]
    fn test_parses_fenced_reuse_decision() {
        let text = r#"Here you go:
```json
{"reuse_decision": {"should_reuse": true, "existing_function_name": "aapl_corr", "confidence": 0.91, "reason": "match"}}
```
"#;
        match parse_verdict(text) {
            Some(TerminalVerdict::ReuseDecision(v)) => {
                assert!(v.should_reuse);
                assert_eq!(v.existing_function_name.as_deref(), Some("aapl_corr"));
                assert_eq!(v.confidence, 0.91);
            }
            other => panic!("expected reuse decision, got {other:?}"),
        }
    }

    #[test]
    fn test_parses_whole_body_script_generation() {
        let text = r#"{"script_generation": {"status": "success", "script_name": "a.py", "analysis_description": "d", "mcp_calls": []}}"#;
        match parse_verdict(text) {
            Some(TerminalVerdict::ScriptGeneration(v)) => {
                assert_eq!(v.status, ScriptGenerationStatus::Success);
                assert_eq!(v.script_name.as_deref(), Some("a.py"));
            }
            other => panic!("expected script generation, got {other:?}"),
        }
    }

    #[test]
    fn test_should_reuse_true_missing_confidence_is_invalid() {
        let text = r#"```json
{"reuse_decision": {"should_reuse": true, "existing_function_name": "f"}}
```"#;
        assert!(parse_verdict(text).is_none());
    }

    #[test]
    fn test_success_missing_script_name_is_invalid() {
        let text = r#"{"script_generation": {"status": "success", "analysis_description": "d", "mcp_calls": []}}"#;
        assert!(parse_verdict(text).is_none());
    }

    #[test]
    fn test_failed_status_does_not_require_script_name() {
        let text = r#"{"script_generation": {"status": "failed", "analysis_description": "d", "mcp_calls": [], "final_error": "boom"}}"#;
        match parse_verdict(text) {
            Some(TerminalVerdict::ScriptGeneration(v)) => {
                assert_eq!(v.status, ScriptGenerationStatus::Failed);
                assert_eq!(v.final_error.as_deref(), Some("boom"));
            }
            other => panic!("expected script generation, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_json_ignored_not_error() {
        assert!(parse_verdict("not json at all, just prose").is_none());
    }

    #[test]
    fn test_idempotent_parse_l3() {
        let text = r#"{"reuse_decision": {"should_reuse": false, "confidence": 0.2, "reason": "no match"}}"#;
        let a = parse_verdict(text);
        let b = parse_verdict(text);
        match (a, b) {
            (Some(TerminalVerdict::ReuseDecision(a)), Some(TerminalVerdict::ReuseDecision(b))) => {
                assert_eq!(a.should_reuse, b.should_reuse);
                assert_eq!(a.confidence, b.confidence);
            }
            other => panic!("expected matching reuse decisions, got {other:?}"),
        }
    }

    #[test]
    fn test_first_valid_match_wins_over_later_blocks() {
        let text = r#"
```json
garbage not json
```
```json
{"reuse_decision": {"should_reuse": false, "confidence": 0.1, "reason": "n/a"}}
```
```json
{"script_generation": {"status": "success", "script_name": "x.py", "analysis_description": "d", "mcp_calls": []}}
```
"#;
        match parse_verdict(text) {
            Some(TerminalVerdict::ReuseDecision(v)) => assert!(!v.should_reuse),
            other => panic!("expected first valid reuse decision, got {other:?}"),
        }
    }
}
