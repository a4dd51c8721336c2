//! Search-term validation, LIKE escaping, and code-point set matching.

use std::collections::HashSet;

use campusbot_shared::{CampusBotError, Result};

/// Longest accepted search term, in code points.
pub const MAX_TERM_CHARS: usize = 100;

/// Escape character declared in every `LIKE ... ESCAPE` clause.
pub(crate) const LIKE_ESCAPE: char = '\\';

/// Trim and validate a user-supplied search term.
pub fn validate_term(term: &str) -> Result<&str> {
    let trimmed = term.trim();
    if trimmed.is_empty() {
        return Err(CampusBotError::invalid("search term is empty"));
    }
    let len = trimmed.chars().count();
    if len > MAX_TERM_CHARS {
        return Err(CampusBotError::invalid(format!(
            "search term is {len} characters, max {MAX_TERM_CHARS}"
        )));
    }
    Ok(trimmed)
}

/// Escape `%`, `_` and the escape character itself so they match literally.
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    for c in term.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

/// `%term%` pattern for substring matching.
pub(crate) fn contains_pattern(term: &str) -> String {
    format!("%{}%", escape_like(term))
}

/// `term%` pattern for prefix matching.
pub(crate) fn prefix_pattern(term: &str) -> String {
    format!("{}%", escape_like(term))
}

/// The set of code points in a term, used for order-independent matching.
#[derive(Debug, Clone)]
pub struct CharSet(HashSet<char>);

impl CharSet {
    pub fn new(term: &str) -> Self {
        Self(term.chars().collect())
    }

    /// True when every code point of the term occurs somewhere in `target`.
    pub fn is_subset_of(&self, target: &str) -> bool {
        let target: HashSet<char> = target.chars().collect();
        self.0.is_subset(&target)
    }
}

/// Whether `target` contains every code point of `term`.
pub fn fuzzy_matches(term: &str, target: &str) -> bool {
    CharSet::new(term).is_subset_of(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_overlong_terms() {
        assert!(validate_term("   ").is_err());
        let long: String = std::iter::repeat_n('資', MAX_TERM_CHARS + 1).collect();
        assert!(validate_term(&long).is_err());
        let max: String = std::iter::repeat_n('資', MAX_TERM_CHARS).collect();
        assert!(validate_term(&max).is_ok());
    }

    #[test]
    fn length_is_counted_in_code_points() {
        // 100 three-byte characters is 300 bytes but still within the limit.
        let term: String = std::iter::repeat_n('工', 100).collect();
        assert_eq!(term.len(), 300);
        assert!(validate_term(&term).is_ok());
    }

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(contains_pattern("a_b"), "%a\\_b%");
        assert_eq!(prefix_pattern("4111"), "4111%");
    }

    #[test]
    fn fuzzy_is_order_independent_and_non_contiguous() {
        assert!(fuzzy_matches("資工系", "資訊工程學系"));
        assert!(fuzzy_matches("系工資", "資訊工程學系"));
        assert!(!fuzzy_matches("電機系", "資訊工程學系"));
    }

    #[test]
    fn fuzzy_ignores_repeated_characters() {
        assert!(fuzzy_matches("資資", "資訊"));
    }
}
