//! Best-effort textual filter for chat content.
//!
//! Applied to user input and to model output alike before anything is stored
//! or returned. This is not an HTML parser: it drops well-formed tags, then
//! any remaining angle brackets, script-style URL schemes and inline
//! event-handler attributes, then bounds the length. A bracket that does not
//! open a tag (`x<5`, `a < b`) only loses the bracket itself.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum length of sanitized content, in characters.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// `<name ...>` or `</name>`: a letter right after the bracket, no nested
/// brackets inside.
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?[A-Za-z][A-Za-z0-9-]*(?:\s[^<>]*)?/?>").expect("valid tag regex")
});

static SCHEME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:java|vb)script\s*:").expect("valid scheme regex")
});

static EVENT_HANDLER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bon\w+\s*=").expect("valid event handler regex"));

/// Sanitize `raw` with the default length bound.
pub fn sanitize(raw: &str) -> String {
    sanitize_with_limit(raw, MAX_MESSAGE_CHARS)
}

/// Sanitize `raw`, truncating the result to `max_chars` characters.
pub fn sanitize_with_limit(raw: &str, max_chars: usize) -> String {
    let mut text = TAG_RE.replace_all(raw, "").replace(['<', '>'], "");
    // Repeat until stable so removals cannot splice a new pattern together.
    loop {
        let next = SCHEME_RE.replace_all(&text, "");
        let next = EVENT_HANDLER_RE.replace_all(&next, "").into_owned();
        if next == text {
            break;
        }
        text = next;
    }
    let trimmed = text.trim();

    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => trimmed[..cut].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

/// Sanitize an arbitrary JSON value. Anything other than a string yields an
/// empty result.
pub fn sanitize_value(value: &serde_json::Value, max_chars: usize) -> String {
    match value {
        serde_json::Value::String(s) => sanitize_with_limit(s, max_chars),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_script_tags() {
        let out = sanitize("<script>alert(1)</script>hello");
        assert!(out.contains("alert(1)hello"));
        assert!(!out.contains('<'));
        assert!(!out.contains('>'));
    }

    #[test]
    fn stray_brackets_keep_surrounding_text() {
        assert_eq!(sanitize("a < b"), "a  b");
        assert_eq!(sanitize("1 > 0"), "1  0");
        assert_eq!(sanitize("a < b > c"), "a  b  c");
        assert_eq!(sanitize("is x<5 and y>3 true?"), "is x5 and y3 true?");
        assert_eq!(sanitize("<< quoted >>"), "quoted");
    }

    #[test]
    fn strips_script_schemes_case_insensitively() {
        assert_eq!(sanitize("click JavaScript:alert(1)"), "click alert(1)");
        assert_eq!(sanitize("vbscript : run"), "run");
    }

    #[test]
    fn nested_patterns_do_not_survive() {
        assert_eq!(sanitize("jajavascript:vascript:alert"), "alert");
        assert_eq!(sanitize("java<script:x"), "x");
        assert_eq!(sanitize("onjavascript:load=go"), "go");
    }

    #[test]
    fn strips_event_handlers() {
        let out = sanitize("img src=x onerror=alert(1) onLoad = go()");
        assert!(!out.to_lowercase().contains("onerror="));
        assert!(!out.to_lowercase().contains("onload"));
        assert!(out.contains("alert(1)"));
    }

    #[test]
    fn leaves_ordinary_words_alone() {
        assert_eq!(sanitize("online only"), "online only");
        assert_eq!(sanitize("How do I reset my password?"), "How do I reset my password?");
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(sanitize("   hi there \n"), "hi there");
    }

    #[test]
    fn truncates_to_limit() {
        let long = "x".repeat(MAX_MESSAGE_CHARS + 500);
        assert_eq!(sanitize(&long).chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(20);
        let out = sanitize_with_limit(&long, 5);
        assert_eq!(out, "ééééé");
    }

    #[test]
    fn markup_only_becomes_empty() {
        assert_eq!(sanitize("<b></b>   "), "");
        assert_eq!(sanitize("<<>>"), "");
        assert_eq!(sanitize(""), "");
    }

    #[test]
    fn non_string_values_become_empty() {
        assert_eq!(sanitize_value(&json!(42), 100), "");
        assert_eq!(sanitize_value(&json!(null), 100), "");
        assert_eq!(sanitize_value(&json!({"text": "hi"}), 100), "");
        assert_eq!(sanitize_value(&json!(" hi "), 100), "hi");
    }
}
