//! Allow/deny policy for qualified tool names, supporting exact matches and
//! `<server>__*` glob patterns (§6 "Denylist is configurable").

use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    denied_exact: HashSet<String>,
    denied_prefixes: Vec<String>,
}

impl ToolPolicy {
    pub fn new(denied: impl IntoIterator<Item = String>) -> Self {
        let mut denied_exact = HashSet::new();
        let mut denied_prefixes = Vec::new();
        for entry in denied {
            if let Some(prefix) = entry.strip_suffix('*') {
                denied_prefixes.push(prefix.to_string());
            } else {
                denied_exact.insert(entry);
            }
        }
        Self {
            denied_exact,
            denied_prefixes,
        }
    }

    pub fn is_denied(&self, qualified_name: &str) -> bool {
        if self.denied_exact.contains(qualified_name) {
            return true;
        }
        self.denied_prefixes
            .iter()
            .any(|prefix| qualified_name.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_denied() {
        let policy = ToolPolicy::new(["fs__delete_all".to_string()]);
        assert!(policy.is_denied("fs__delete_all"));
        assert!(!policy.is_denied("fs__read_file"));
    }

    #[test]
    fn test_glob_pattern_denies_whole_server() {
        let policy = ToolPolicy::new(["shell__*".to_string()]);
        assert!(policy.is_denied("shell__exec"));
        assert!(policy.is_denied("shell__anything"));
        assert!(!policy.is_denied("edgar__get_filing"));
    }

    #[test]
    fn test_empty_policy_denies_nothing() {
        let policy = ToolPolicy::default();
        assert!(!policy.is_denied("anything__at_all"));
    }
}
