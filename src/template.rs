//! Message template and system prompt loading (§6.B ambient stack): both
//! are opaque external text assets, read best-effort with a built-in
//! fallback when the file is missing — the teacher's `logger::log` idiom
//! of "best effort, fall back, never panic" applied to file I/O instead of
//! logging.

const DEFAULT_SYSTEM_PROMPT: &str = "You are a financial analysis assistant. Use the available tools to answer the user's question, then respond with exactly one fenced ```json block containing either a `reuse_decision` or a `script_generation` verdict.";

const DEFAULT_ANALYZE_MESSAGE_TEMPLATE: &str = "Please analyze the following question and, using the available tools as needed, produce a reuse_decision or script_generation verdict:\n\n{user_question}";

/// Loads the system prompt file at `path`; its contents are opaque to the
/// core (§6 "System prompt"). Falls back to a generic message when the
/// file is missing or unreadable.
pub fn load_system_prompt(path: impl AsRef<std::path::Path>) -> String {
    match std::fs::read_to_string(path.as_ref()) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            tracing::warn!(path = %path.as_ref().display(), "system prompt file is empty, using fallback");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(err) => {
            tracing::warn!(path = %path.as_ref().display(), error = %err, "system prompt file missing, using fallback");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

/// Renders the `analyze-message` template at `path`, substituting the
/// single `{user_question}` placeholder verbatim (§6 "Message template").
/// Falls back to a minimal built-in template when the file is missing.
pub fn render_analyze_message(path: impl AsRef<std::path::Path>, question: &str) -> String {
    let template = match std::fs::read_to_string(path.as_ref()) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => {
            tracing::warn!(path = %path.as_ref().display(), "analyze-message template missing, using fallback");
            DEFAULT_ANALYZE_MESSAGE_TEMPLATE.to_string()
        }
    };
    template.replace("{user_question}", question)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_analyze_message_substitutes_placeholder() {
        let rendered = render_analyze_message("/nonexistent/path.txt", "what is AAPL's beta?");
        assert!(rendered.contains("what is AAPL's beta?"));
        assert!(!rendered.contains("{user_question}"));
    }

    #[test]
    fn test_load_system_prompt_falls_back_on_missing_file() {
        let prompt = load_system_prompt("/nonexistent/system_prompt.txt");
        assert_eq!(prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_render_analyze_message_reads_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.txt");
        std::fs::write(&path, "Q: {user_question}\n").unwrap();
        let rendered = render_analyze_message(&path, "correlation of AAPL and SPY");
        assert_eq!(rendered, "Q: correlation of AAPL and SPY\n");
    }
}
