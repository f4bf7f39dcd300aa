//! Literal text substitution

use regex::{NoExpand, Regex};
use tracing::warn;

use crate::core::model::ReplaceRule;

/// Pre-compiled replace rules, applied in order
#[derive(Debug, Clone, Default)]
pub struct Replacer {
    rules: Vec<(Regex, String)>,
}

impl Replacer {
    /// Compile rules. Rules with an empty `from` are skipped.
    pub fn new(rules: &[ReplaceRule]) -> Self {
        let rules = rules
            .iter()
            .filter(|r| !r.from.is_empty())
            .filter_map(|r| match Regex::new(&regex::escape(&r.from)) {
                Ok(re) => Some((re, r.to.clone())),
                Err(e) => {
                    warn!("Skipping replace rule {:?}: {}", r.from, e);
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule globally, each to the output of the previous one
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (re, to) in &self.rules {
            if re.is_match(&out) {
                out = re.replace_all(&out, NoExpand(to.as_str())).into_owned();
            }
        }
        out
    }
}

/// One-shot form of `Replacer::apply`
pub fn apply_replacements(text: &str, rules: &[ReplaceRule]) -> String {
    Replacer::new(rules).apply(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_substitution() {
        let rules = [ReplaceRule::new("secret", "REDACTED")];
        assert_eq!(
            apply_replacements("secret key, secret door", &rules),
            "REDACTED key, REDACTED door"
        );
    }

    #[test]
    fn test_from_is_literal() {
        let rules = [ReplaceRule::new("a.b", "X")];
        assert_eq!(apply_replacements("a.b axb", &rules), "X axb");
    }

    #[test]
    fn test_to_is_not_expanded() {
        let rules = [ReplaceRule::new("name", "$1 ${x}")];
        assert_eq!(apply_replacements("name", &rules), "$1 ${x}");
    }

    #[test]
    fn test_rules_apply_sequentially() {
        let rules = [ReplaceRule::new("a", "b"), ReplaceRule::new("b", "c")];
        assert_eq!(apply_replacements("ab", &rules), "cc");
    }

    #[test]
    fn test_empty_from_is_skipped() {
        let replacer = Replacer::new(&[ReplaceRule::new("", "x")]);
        assert!(replacer.is_empty());
        assert_eq!(replacer.apply("abc"), "abc");
    }
}
