use std::sync::LazyLock;

use regex::Regex;

/// Maximum number of characters of description kept in the catalog.
pub const STORED_DESCRIPTION_MAX_CHARS: usize = 1000;

/// Maximum number of characters of description shown in search results.
pub const DISPLAY_DESCRIPTION_MAX_CHARS: usize = 600;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Boilerplate fragments that leak into scraped text from page chrome.
static NOISE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)Home\s+Products",
        r"(?i)Product Fact Sheet.*",
        r"(?i)English \(USA\)",
        r"(?i)Test Type:.*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid noise regex"))
    .collect()
});

/// Collapse every run of whitespace into a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Normalize whitespace and remove known boilerplate phrases.
///
/// Tail patterns (`Product Fact Sheet…`, `Test Type:…`) drop everything
/// after the marker.
pub fn clean_text(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }

    let mut cleaned = normalize_whitespace(text);
    for pattern in NOISE.iter() {
        cleaned = pattern.replace_all(&cleaned, "").into_owned();
    }
    normalize_whitespace(&cleaned)
}

/// Truncate to at most `max_chars` characters without splitting a
/// multi-byte character.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Count the characters of a query that carry meaning (letters and digits).
pub fn meaningful_chars(text: &str) -> usize {
    text.chars().filter(|c| c.is_alphanumeric()).count()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn normalize_collapses_runs() {
        assert_eq!(normalize_whitespace("  a \n\t b   c "), "a b c");
    }

    #[test]
    fn clean_text_empty_input() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("   \n "), "");
    }

    #[test]
    fn clean_text_strips_breadcrumb() {
        assert_eq!(
            clean_text("Home  Products Java 8 (New)"),
            "Java 8 (New)"
        );
    }

    #[test]
    fn clean_text_drops_fact_sheet_tail() {
        assert_eq!(
            clean_text("Measures Java skills. Product Fact Sheet PDF English"),
            "Measures Java skills."
        );
    }

    #[test]
    fn clean_text_drops_language_marker_mid_sentence() {
        assert_eq!(
            clean_text("Languages English (USA) available"),
            "Languages available"
        );
    }

    #[test]
    fn clean_text_drops_test_type_tail() {
        assert_eq!(clean_text("Entry-Level Test Type: K S"), "Entry-Level");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn meaningful_chars_ignores_punctuation() {
        assert_eq!(meaningful_chars(" ?! "), 0);
        assert_eq!(meaningful_chars("a-b"), 2);
    }

    proptest! {
        #[test]
        fn clean_text_has_no_double_spaces(s in "\\PC{0,200}") {
            let cleaned = clean_text(&s);
            prop_assert!(!cleaned.contains("  "));
            prop_assert_eq!(cleaned.trim(), cleaned.as_str());
        }

        #[test]
        fn truncate_never_exceeds_limit(s in "\\PC{0,300}", n in 0usize..200) {
            prop_assert!(truncate_chars(&s, n).chars().count() <= n);
        }
    }
}
