//! Text analysis for ingested artifacts.
//!
//! Purpose, keywords, and dependency references are derived from file
//! content at ingestion time and re-derived only when the checksum moves.
//! Everything here is deterministic for the same input.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Keywords shorter than this never qualify.
pub const MIN_KEYWORD_LEN: usize = 3;

/// At most this many keywords per entity, first-seen order.
pub const MAX_KEYWORDS: usize = 15;

/// Purpose strings are truncated to this many characters.
pub const MAX_PURPOSE_CHARS: usize = 200;

/// Common English words that carry no signal for matching.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
    "our", "out", "day", "get", "has", "him", "his", "how", "man", "new", "now", "old", "see",
    "two", "way", "who", "did", "its", "let", "put", "say", "she", "too", "use", "that", "with",
    "have", "this", "will", "your", "from", "they", "know", "want", "been", "good", "much",
    "some", "time", "very", "when", "come", "here", "just", "like", "long", "make", "many",
    "more", "only", "over", "such", "take", "than", "them", "well", "were", "what", "which",
    "their", "would", "there", "should", "could", "about", "into", "also", "because",
];

fn token_cleaner() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Anything outside [a-z0-9 whitespace hyphen] becomes a separator.
    RE.get_or_init(|| Regex::new(r"[^a-z0-9\s\-]").expect("literal pattern"))
}

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Extract up to [`MAX_KEYWORDS`] lowercase keywords from text.
///
/// Lowercase, strip non `[a-z0-9\s-]`, split on whitespace, drop stop words
/// and tokens shorter than [`MIN_KEYWORD_LEN`], dedupe preserving first-seen
/// order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let cleaned = token_cleaner().replace_all(&lowered, " ");

    let mut seen = BTreeSet::new();
    let mut keywords = Vec::new();
    for token in cleaned.split_whitespace() {
        let token = token.trim_matches('-');
        if token.len() < MIN_KEYWORD_LEN || is_stop_word(token) {
            continue;
        }
        if seen.insert(token.to_string()) {
            keywords.push(token.to_string());
            if keywords.len() == MAX_KEYWORDS {
                break;
            }
        }
    }
    keywords
}

/// Extract a purpose summary of at most [`MAX_PURPOSE_CHARS`] characters.
///
/// The first line that looks like a header wins: a markdown heading, a
/// `#`/`//`/`*`/`<!--` comment, or failing those the first non-empty line.
/// Markers are stripped and the remainder truncated on a char boundary.
pub fn extract_purpose(text: &str) -> String {
    let mut fallback: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(stripped) = strip_header_markers(line) {
            if !stripped.is_empty() {
                return truncate_chars(stripped, MAX_PURPOSE_CHARS);
            }
            continue;
        }
        if fallback.is_none() {
            fallback = Some(line);
        }
    }

    fallback
        .map(|line| truncate_chars(line, MAX_PURPOSE_CHARS))
        .unwrap_or_default()
}

/// Strip comment/heading markers; None when the line is plain prose.
fn strip_header_markers(line: &str) -> Option<&str> {
    for prefix in ["#", "//", "*", "<!--"] {
        if let Some(rest) = line.strip_prefix(prefix) {
            let rest = rest.trim_start_matches(['#', '-', '!', '*', '/']).trim();
            let rest = rest.strip_suffix("-->").map(str::trim).unwrap_or(rest);
            return Some(rest);
        }
    }
    None
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

/// Scan text for references to known entity ids.
///
/// A reference is a case-insensitive occurrence of an id bounded by
/// characters outside `[a-z0-9_-]`. The result never contains `self_id`.
pub fn detect_dependencies<'a, I>(text: &str, self_id: &str, known_ids: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let haystack = text.to_lowercase();
    let mut found = BTreeSet::new();

    for id in known_ids {
        if id.eq_ignore_ascii_case(self_id) || id.is_empty() {
            continue;
        }
        let needle = id.to_lowercase();
        if contains_bounded(&haystack, &needle) {
            found.insert(id.to_string());
        }
    }
    found
}

/// Substring match with id-character boundaries on both sides.
fn contains_bounded(haystack: &str, needle: &str) -> bool {
    let is_id_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        let before_ok = haystack[..abs].chars().next_back().map_or(true, |c| !is_id_char(c));
        let after_ok = haystack[abs + needle.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_id_char(c));
        if before_ok && after_ok {
            return true;
        }
        start = abs + needle.len();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_lowercase_filtered_and_capped() {
        let keywords = extract_keywords("Validate the YAML schema! Validate it again.");
        assert_eq!(keywords, vec!["validate", "yaml", "schema", "again"]);
    }

    #[test]
    fn test_keywords_drop_short_tokens_and_stop_words() {
        let keywords = extract_keywords("a an to the and for of in validate");
        assert_eq!(keywords, vec!["validate"]);
    }

    #[test]
    fn test_keywords_first_seen_order_cap() {
        let text = (0..30).map(|i| format!("keyword{i}")).collect::<Vec<_>>().join(" ");
        let keywords = extract_keywords(&text);
        assert_eq!(keywords.len(), MAX_KEYWORDS);
        assert_eq!(keywords[0], "keyword0");
    }

    #[test]
    fn test_keywords_keep_hyphenated_tokens() {
        let keywords = extract_keywords("run the pre-flight checks");
        assert!(keywords.contains(&"pre-flight".to_string()));
    }

    #[test]
    fn test_purpose_prefers_heading() {
        let text = "\n# Validate input files\n\nLong body text here.";
        assert_eq!(extract_purpose(text), "Validate input files");
    }

    #[test]
    fn test_purpose_from_comment_markers() {
        assert_eq!(extract_purpose("// Parse a yaml schema file\ncode"), "Parse a yaml schema file");
        assert_eq!(extract_purpose("<!-- Checklist for release -->\n- item"), "Checklist for release");
    }

    #[test]
    fn test_purpose_falls_back_to_first_line_and_truncates() {
        let long = "word ".repeat(100);
        let purpose = extract_purpose(&long);
        assert_eq!(purpose.chars().count(), MAX_PURPOSE_CHARS);
    }

    #[test]
    fn test_purpose_empty_input() {
        assert_eq!(extract_purpose(""), "");
        assert_eq!(extract_purpose("\n\n"), "");
    }

    #[test]
    fn test_detect_dependencies_bounded_matches() {
        let known = ["parse-yaml", "render", "parse"];
        let deps = detect_dependencies("Uses parse-yaml then render output", "self", known);
        assert!(deps.contains("parse-yaml"));
        assert!(deps.contains("render"));
        // "parse" only occurs inside "parse-yaml"; the hyphen is an id char.
        assert!(!deps.contains("parse"));
    }

    #[test]
    fn test_detect_dependencies_never_self() {
        let known = ["foo", "bar"];
        let deps = detect_dependencies("foo depends on bar", "foo", known);
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec!["bar".to_string()]);
    }
}
