//! Query grammar for list endpoints (spec.md §6).
//!
//! Whitespace-separated terms; each term is either `key=value` (attribute
//! match), `has:key`, or a bare state keyword, any of them optionally
//! prefixed by `!` for negation. The keyword vocabulary differs between
//! jobs and batches, so this module only handles the grammar; callers
//! validate bare words against their own keyword set.

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermTarget {
    /// `key=value`
    Attribute { key: String, value: String },
    /// `has:key`
    HasKey(String),
    /// A bare word, interpreted as a state keyword by the caller.
    Keyword(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    pub negated: bool,
    pub target: TermTarget,
}

/// Parse a query string into terms. Empty input yields an empty vec (no
/// filter). Malformed terms are not possible by construction — any
/// non-empty whitespace-separated token parses to one of the three
/// `TermTarget` variants — but callers must still reject `Keyword` terms
/// that aren't in their known vocabulary.
pub fn parse_query(input: &str) -> Vec<QueryTerm> {
    input
        .split_whitespace()
        .map(|raw| {
            let (negated, body) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            let target = if let Some((key, value)) = body.split_once('=') {
                TermTarget::Attribute {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            } else if let Some(key) = body.strip_prefix("has:") {
                TermTarget::HasKey(key.to_string())
            } else {
                TermTarget::Keyword(body.to_string())
            };
            QueryTerm { negated, target }
        })
        .collect()
}

/// Validates that every bare keyword term in `terms` appears in
/// `known_keywords`. Returns a `ValidationError` naming the first unknown
/// term (spec.md §6: "Unknown term ⇒ 400").
pub fn validate_keywords(terms: &[QueryTerm], known_keywords: &[&str]) -> Result<(), AppError> {
    for term in terms {
        if let TermTarget::Keyword(word) = &term.target {
            if !known_keywords.contains(&word.as_str()) {
                return Err(AppError::validation(format!("unknown query term: {word}")));
            }
        }
    }
    Ok(())
}

pub const JOB_STATE_KEYWORDS: &[&str] = &[
    "pending", "ready", "running", "live", "cancelled", "error", "failed", "bad", "success",
    "done",
];

pub const BATCH_STATE_KEYWORDS: &[&str] = &[
    "open", "closed", "complete", "running", "cancelled", "failure", "success",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attribute_term() {
        let terms = parse_query("name=etl-run");
        assert_eq!(
            terms[0].target,
            TermTarget::Attribute {
                key: "name".into(),
                value: "etl-run".into()
            }
        );
        assert!(!terms[0].negated);
    }

    #[test]
    fn parses_has_key_term() {
        let terms = parse_query("has:owner");
        assert_eq!(terms[0].target, TermTarget::HasKey("owner".into()));
    }

    #[test]
    fn parses_negated_keyword() {
        let terms = parse_query("!running");
        assert!(terms[0].negated);
        assert_eq!(terms[0].target, TermTarget::Keyword("running".into()));
    }

    #[test]
    fn multiple_terms_split_on_whitespace() {
        let terms = parse_query("running has:owner !name=foo");
        assert_eq!(terms.len(), 3);
    }

    #[test]
    fn unknown_keyword_rejected() {
        let terms = parse_query("frobnicated");
        assert!(validate_keywords(&terms, JOB_STATE_KEYWORDS).is_err());
    }

    #[test]
    fn known_keyword_accepted() {
        let terms = parse_query("running");
        assert!(validate_keywords(&terms, JOB_STATE_KEYWORDS).is_ok());
    }
}
