//! Plain-text helpers shared by indexing and result projection

use once_cell::sync::Lazy;
use regex::Regex;

const ELLIPSIS: &str = "...";

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Convert an HTML fragment to plain text: tags removed, entities decoded, whitespace collapsed.
pub fn html_to_plain(html: &str) -> String {
    let without_tags = TAG_RE.replace_all(html, " ");
    let decoded = decode_entities(&without_tags);
    WHITESPACE_RE.replace_all(&decoded, " ").trim().to_string()
}

/// Remove newlines and tabs, collapsing the surrounding whitespace.
pub fn strip_control_whitespace(text: &str) -> String {
    let replaced = text.replace(['\n', '\r', '\t'], " ");
    WHITESPACE_RE.replace_all(&replaced, " ").trim().to_string()
}

/// Truncate to at most `max_chars` characters, breaking at a word boundary.
///
/// A shortened summary ends in `...`, counted within `max_chars`. A single
/// word longer than the remaining room is cut.
pub fn summarize(text: &str, max_chars: usize) -> String {
    let text = strip_control_whitespace(text);
    if text.chars().count() <= max_chars {
        return text;
    }
    let max_chars = max_chars.saturating_sub(ELLIPSIS.len());

    let mut summary = String::new();
    for word in text.split(' ') {
        let needed = if summary.is_empty() {
            word.chars().count()
        } else {
            summary.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars {
            break;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(word);
    }

    if summary.is_empty() {
        summary = text.chars().take(max_chars).collect();
    }

    let trimmed = summary.trim_end_matches(|c: char| c.is_ascii_punctuation() && c != ')');
    format!("{}{}", trimmed, ELLIPSIS)
}

/// Slug for option values: lowercase alphanumerics separated by single hyphens.
///
/// Non-ASCII letters and digits are kept, so "Café" and "Caf" stay distinct.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    let mut pending_hyphen = false;

    for c in label.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_plain() {
        let html = "<p>Hello&nbsp;<strong>World</strong></p>\n<p>Tom &amp; Jerry</p>";
        assert_eq!(html_to_plain(html), "Hello World Tom & Jerry");
    }

    #[test]
    fn test_strip_control_whitespace() {
        assert_eq!(strip_control_whitespace("Hello\nWorld\t!"), "Hello World !");
    }

    #[test]
    fn test_summarize_breaks_at_word_boundary() {
        let text = "The quick brown fox jumps over the lazy dog";
        let summary = summarize(text, 20);
        assert_eq!(summary, "The quick brown...");
        assert!(summary.chars().count() <= 20);
    }

    #[test]
    fn test_summarize_short_text_untouched() {
        assert_eq!(summarize("Short text", 80), "Short text");
    }

    #[test]
    fn test_summarize_long_single_word() {
        let summary = summarize("abcdefghijklmnop", 8);
        assert_eq!(summary, "abcde...");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Parks & Recreation"), "parks-recreation");
        assert_eq!(slugify("  Water Quality 2024 "), "water-quality-2024");
        assert_eq!(slugify("Ōtaki"), "ōtaki");
        assert_eq!(slugify("Café"), "café");
        assert_eq!(slugify("日本"), "日本");
        assert_eq!(slugify("Māori Culture"), "māori-culture");
        assert_eq!(slugify("!!!"), "");
    }
}
