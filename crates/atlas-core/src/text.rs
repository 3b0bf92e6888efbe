//! Text canonicalization rules.
//!
//! Two consumers:
//! - ContentFetcher normalizes extracted page text with [`normalize_whitespace`]
//! - QueryRefiner output goes through [`sanitize_refined_query`]
//!
//! Both only touch whitespace, control characters, and the search-engine
//! name. Words are never rewritten.

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::QueryError;

/// Maximum number of words in a refined query.
pub const MAX_QUERY_WORDS: usize = 32;

lazy_static! {
    /// Any run of whitespace or control characters
    static ref WHITESPACE_RUN: Regex = Regex::new(r"[\s\p{Cc}]+").unwrap();

    /// Escaped control sequences a model sometimes writes out literally
    static ref ESCAPED_CONTROL: Regex = Regex::new(r"\\[nrt]").unwrap();

    /// The search engine's name, which must never reach the search box
    static ref ENGINE_NAME: Regex = Regex::new(r"(?i)google\s*search").unwrap();
}

/// Collapse every run of whitespace and control characters to one space and trim.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text, " ").trim().to_string()
}

/// Replace each control character with a space, leaving everything else intact.
///
/// Used on streamed fragments where collapsing runs across fragment
/// boundaries is not possible.
pub fn replace_control_chars(text: &str) -> String {
    if !text.chars().any(char::is_control) {
        return text.to_string();
    }
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Whether the text contains any control character.
pub fn has_control_chars(text: &str) -> bool {
    text.chars().any(char::is_control)
}

/// Number of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Bring model output into the refined-query shape.
///
/// - control characters and literal `\n`/`\t`/`\r` escapes become spaces
/// - the phrase "Google Search" is removed in any casing
/// - whitespace is collapsed and the result is cut to [`MAX_QUERY_WORDS`] words
pub fn sanitize_refined_query(text: &str) -> Result<String, QueryError> {
    let mut sanitized = collapse_words(&ESCAPED_CONTROL.replace_all(text, " "), usize::MAX);

    // Removing one occurrence can splice its neighbours into a new one.
    while ENGINE_NAME.is_match(&sanitized) {
        sanitized = collapse_words(&ENGINE_NAME.replace_all(&sanitized, " "), usize::MAX);
    }

    let sanitized = collapse_words(&sanitized, MAX_QUERY_WORDS);
    if sanitized.is_empty() {
        return Err(QueryError::EmptyRefinement);
    }
    Ok(sanitized)
}

fn collapse_words(text: &str, max_words: usize) -> String {
    text.split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|w| !w.is_empty())
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_collapses_runs() {
        let text = "  Paris\n\n\tis the\r\ncapital   of France \u{0007} ";
        assert_eq!(normalize_whitespace(text), "Paris is the capital of France");
    }

    #[test]
    fn test_replace_control_chars_keeps_length() {
        assert_eq!(replace_control_chars("a\nb\tc"), "a b c");
        assert_eq!(replace_control_chars("plain"), "plain");
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_sanitize_strips_engine_name() {
        let refined = sanitize_refined_query("Google Search: capital of France").unwrap();
        assert_eq!(refined, ": capital of France");

        let refined = sanitize_refined_query("capital of France google   SEARCH").unwrap();
        assert_eq!(refined, "capital of France");
    }

    #[test]
    fn test_sanitize_removes_escaped_newlines() {
        let refined = sanitize_refined_query("intitle:\"Paris\"\\npopulation 2024\n").unwrap();
        assert_eq!(refined, "intitle:\"Paris\" population 2024");
    }

    #[test]
    fn test_sanitize_caps_word_count() {
        let long = (0..50).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let refined = sanitize_refined_query(&long).unwrap();
        assert_eq!(word_count(&refined), MAX_QUERY_WORDS);
        assert!(refined.starts_with("w0 w1"));
    }

    #[test]
    fn test_sanitize_rejects_empty() {
        assert_eq!(
            sanitize_refined_query(" \n Google Search \t"),
            Err(QueryError::EmptyRefinement)
        );
    }

    proptest! {
        #[test]
        fn prop_sanitized_query_within_limits(input in "\\PC*(\n|\t|\r|Google Search|\\\\n| )*\\PC*") {
            if let Ok(refined) = sanitize_refined_query(&input) {
                prop_assert!(word_count(&refined) <= MAX_QUERY_WORDS);
                prop_assert!(!has_control_chars(&refined));
                prop_assert!(!refined.to_lowercase().contains("google search"));
            }
        }

        #[test]
        fn prop_normalized_text_has_no_control_chars(input in any::<String>()) {
            let normalized = normalize_whitespace(&input);
            prop_assert!(!has_control_chars(&normalized));
            prop_assert!(!normalized.contains("  "));
        }
    }
}
