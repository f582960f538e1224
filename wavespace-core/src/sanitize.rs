//! Input sanitization.
//!
//! Untrusted strings pass through [`sanitize`] before they enter state or
//! are echoed back into a page. Sanitizing is idempotent: the dangerous
//! pattern list is stripped to a fixed point, and escaping leaves existing
//! entities alone.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Patterns removed from untrusted input.
static DANGEROUS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)<script[^>]*>.*?</script>",
        r"(?i)<iframe[^>]*>.*?</iframe>",
        r"(?i)<embed[^>]*>",
        r"(?i)<object[^>]*>",
        r"(?i)javascript:",
        r"(?i)vbscript:",
        r"(?i)data:text/html",
        r"(?i)on\w+\s*=",
        r"(?i)<link[^>]*>",
        r"(?i)<meta[^>]*>",
        r"(?i)<form[^>]*>",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static DANGEROUS_PROTOCOL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)^(javascript|data|vbscript|file|ftp):").ok());

static EMAIL_SHAPE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok());

static ABSOLUTE_URL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*:\S+$").ok());

static HTML_TAG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"<([^>]*)>").ok());

static TAG_PARTS: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)^(/?)([a-zA-Z][a-zA-Z0-9]*)(\s.*|/)?$").ok());

static CLASS_ATTR: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r#"(?i)\bclass="([^"]*)""#).ok());

static ATTR_NAME: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[A-Za-z_:][-A-Za-z0-9_:.]*$").ok());

/// Formatting tags kept by [`sanitize_html`].
pub const ALLOWED_TAGS: [&str; 6] = ["p", "br", "strong", "em", "u", "span"];

/// Entities produced by [`escape_html`]; an `&` that starts one of these is
/// left as is.
const KNOWN_ENTITIES: [&str; 6] = ["&amp;", "&lt;", "&gt;", "&quot;", "&#039;", "&#39;"];

/// Expected shape of a typed input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputKind {
    /// Free text: stripped and escaped.
    #[default]
    Text,
    Email,
    Number,
    Alphanumeric,
    /// Hangul syllables, ASCII letters and digits, whitespace, `-`, `_`, `.`.
    Korean,
    Url,
    /// Basic formatting markup, see [`sanitize_html`].
    SafeHtml,
}

/// Strip dangerous patterns, trim, and entity-escape the result.
pub fn sanitize(input: &str) -> String {
    escape_entities_once(&strip_to_fixed_point(input))
}

/// Plain five-character HTML escape. Not idempotent; prefer [`sanitize`]
/// for anything that may be processed twice.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        push_escaped(&mut out, ch);
    }
    out
}

/// Remove every dangerous pattern once.
pub fn strip_dangerous(input: &str) -> String {
    DANGEROUS_PATTERNS
        .iter()
        .fold(input.to_string(), |acc, pattern| {
            pattern.replace_all(&acc, "").into_owned()
        })
}

/// True if any dangerous pattern occurs in `input`.
pub fn detect_xss(input: &str) -> bool {
    DANGEROUS_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(input))
}

/// Return `url` if it is safe to place in an `href`, otherwise `#`.
pub fn safe_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return "#".to_string();
    }
    if DANGEROUS_PROTOCOL
        .as_ref()
        .is_some_and(|re| re.is_match(trimmed))
    {
        tracing::warn!(url = trimmed, "Blocked dangerous URL protocol");
        return "#".to_string();
    }
    let allowed = ["/", "http://", "https://", "#", "mailto:"];
    if allowed.iter().any(|prefix| trimmed.starts_with(prefix)) {
        trimmed.to_string()
    } else {
        "#".to_string()
    }
}

/// Sanitize a form value according to the shape the field expects.
///
/// Values that do not fit the shape come back empty.
pub fn sanitize_input(input: &str, kind: InputKind) -> String {
    let stripped = strip_to_fixed_point(input);
    match kind {
        InputKind::Text => escape_entities_once(&stripped),
        InputKind::Email => {
            if EMAIL_SHAPE.as_ref().is_some_and(|re| re.is_match(&stripped)) {
                stripped
            } else {
                String::new()
            }
        }
        InputKind::Number => {
            let digits: String = stripped
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            if leading_float(&digits) {
                digits
            } else {
                String::new()
            }
        }
        InputKind::Alphanumeric => stripped
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect(),
        InputKind::Korean => stripped
            .chars()
            .filter(|c| {
                ('가'..='힣').contains(c)
                    || c.is_ascii_alphanumeric()
                    || c.is_whitespace()
                    || matches!(*c, '-' | '_' | '.')
            })
            .collect(),
        InputKind::SafeHtml => sanitize_html(&stripped),
        InputKind::Url => {
            if ABSOLUTE_URL.as_ref().is_some_and(|re| re.is_match(&stripped)) {
                let url = safe_url(&stripped);
                if url == "#" {
                    String::new()
                } else {
                    url
                }
            } else {
                String::new()
            }
        }
    }
}

/// Keep [`ALLOWED_TAGS`] (with only their `class` attribute) and drop every
/// other tag. Text between tags is entity-escaped.
pub fn sanitize_html(html: &str) -> String {
    let mut current = filter_tags(&strip_to_fixed_point(html));
    // Dropping a tag can join two harmless halves into a dangerous pattern.
    while detect_xss(&current) {
        current = filter_tags(&strip_to_fixed_point(&current));
    }
    current
}

fn filter_tags(stripped: &str) -> String {
    let Some(tag) = HTML_TAG.as_ref() else {
        return escape_entities_once(stripped);
    };

    let mut out = String::with_capacity(stripped.len());
    let mut last = 0;
    for found in tag.captures_iter(stripped) {
        let (Some(whole), Some(inner)) = (found.get(0), found.get(1)) else {
            continue;
        };
        out.push_str(&escape_entities_once(&stripped[last..whole.start()]));
        if let Some(kept) = allowed_tag(inner.as_str()) {
            out.push_str(&kept);
        }
        last = whole.end();
    }
    out.push_str(&escape_entities_once(&stripped[last..]));
    out.trim().to_string()
}

fn allowed_tag(inner: &str) -> Option<String> {
    let parts = TAG_PARTS.as_ref()?.captures(inner)?;
    let closing = parts.get(1).is_some_and(|m| !m.as_str().is_empty());
    let name = parts.get(2)?.as_str().to_ascii_lowercase();
    if !ALLOWED_TAGS.contains(&name.as_str()) {
        return None;
    }
    if closing {
        return Some(format!("</{}>", name));
    }
    let class = parts
        .get(3)
        .and_then(|attrs| CLASS_ATTR.as_ref()?.captures(attrs.as_str()))
        .and_then(|c| c.get(1))
        .map(|value| format!(" class=\"{}\"", escape_entities_once(value.as_str())))
        .unwrap_or_default();
    Some(format!("<{}{}>", name, class))
}

/// Render `name="value"` with the value escaped. Event handler attributes
/// and malformed names render as an empty string.
pub fn safe_attr(name: &str, value: &str) -> String {
    if name.to_ascii_lowercase().starts_with("on") {
        tracing::warn!(attr = name, "Blocked event handler attribute");
        return String::new();
    }
    if !ATTR_NAME.as_ref().is_some_and(|re| re.is_match(name)) {
        return String::new();
    }
    format!("{}=\"{}\"", name, escape_html(value))
}

/// Deep-sanitize a JSON value: strings (and object keys) are sanitized,
/// arrays and objects recursed, other scalars returned unchanged.
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, field) in fields {
                out.insert(sanitize(key), sanitize_value(field));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

// Every pass that changes the string makes it shorter, so this terminates.
fn strip_to_fixed_point(input: &str) -> String {
    let mut current = input.trim().to_string();
    loop {
        let next = strip_dangerous(&current).trim().to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

fn escape_entities_once(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (idx, ch) in input.char_indices() {
        if ch == '&' && KNOWN_ENTITIES.iter().any(|e| input[idx..].starts_with(e)) {
            out.push('&');
        } else {
            push_escaped(&mut out, ch);
        }
    }
    out
}

fn push_escaped(out: &mut String, ch: char) {
    match ch {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        '\'' => out.push_str("&#039;"),
        other => out.push(other),
    }
}

/// Mirrors `parseFloat`: accept if some prefix parses as a number.
fn leading_float(s: &str) -> bool {
    (1..=s.len())
        .rev()
        .any(|end| s.is_char_boundary(end) && s[..end].parse::<f64>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_script_block_removed() {
        let out = sanitize("<script>alert(1)</script>");
        assert!(!out.to_lowercase().contains("<script"));
        assert_eq!(out, "");
    }

    #[test]
    fn test_markup_escaped() {
        assert_eq!(sanitize("<b>x</b>"), "&lt;b&gt;x&lt;/b&gt;");
        assert_eq!(sanitize("Tom & \"Jerry\""), "Tom &amp; &quot;Jerry&quot;");
    }

    #[test]
    fn test_existing_entities_not_double_escaped() {
        let once = sanitize("a < b & c");
        assert_eq!(once, "a &lt; b &amp; c");
        assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn test_nested_pattern_reassembly_stripped() {
        // Removing the inner "javascript:" would otherwise leave a new one.
        let out = sanitize("javajavascript:script:alert(1)");
        assert!(!out.to_lowercase().contains("javascript:"));
        assert_eq!(sanitize(&out), out);
    }

    #[test]
    fn test_event_handler_attribute_stripped() {
        let out = sanitize("<img src=x onerror=alert(1)>");
        assert!(!out.contains("onerror"));
        assert!(!out.contains('<'));
    }

    #[test]
    fn test_unclosed_script_is_escaped() {
        let out = sanitize("<script>alert(1)");
        assert!(!out.contains("<script"));
        assert!(out.starts_with("&lt;script&gt;"));
    }

    #[test]
    fn test_detect_xss() {
        assert!(detect_xss("<iframe src=x></iframe>"));
        assert!(detect_xss("JAVASCRIPT:void(0)"));
        assert!(!detect_xss("plain text"));
    }

    #[test]
    fn test_safe_url() {
        assert_eq!(safe_url("javascript:alert(1)"), "#");
        assert_eq!(safe_url("  "), "#");
        assert_eq!(safe_url("ftp://files"), "#");
        assert_eq!(safe_url("/forum?page=2"), "/forum?page=2");
        assert_eq!(safe_url("https://example.com"), "https://example.com");
        assert_eq!(safe_url("mailto:ops@example.com"), "mailto:ops@example.com");
        assert_eq!(safe_url("relative/path"), "#");
    }

    #[test]
    fn test_sanitize_input_kinds() {
        assert_eq!(sanitize_input(" user@example.com ", InputKind::Email), "user@example.com");
        assert_eq!(sanitize_input("not-an-email", InputKind::Email), "");
        assert_eq!(sanitize_input("12,500원", InputKind::Number), "12500");
        assert_eq!(sanitize_input("abc", InputKind::Number), "");
        assert_eq!(sanitize_input("a-b_c 1!", InputKind::Alphanumeric), "abc1");
        assert_eq!(sanitize_input("https://example.com/a", InputKind::Url), "https://example.com/a");
        assert_eq!(sanitize_input("javascript:alert(1)", InputKind::Url), "");
        assert_eq!(sanitize_input("<i>hi</i>", InputKind::Text), "&lt;i&gt;hi&lt;/i&gt;");
    }

    #[test]
    fn test_sanitize_input_korean() {
        assert_eq!(sanitize_input("안녕하세요, wave_space-1.0!", InputKind::Korean), "안녕하세요 wave_space-1.0");
        assert_eq!(sanitize_input("<b>게시판</b>", InputKind::Korean), "b게시판b");
        assert_eq!(sanitize_input("ㅋㅋ😀", InputKind::Korean), "");
    }

    #[test]
    fn test_sanitize_html_keeps_formatting_only() {
        assert_eq!(
            sanitize_html(r#"<p class="lead" style="color:red">Hi <strong>there</strong></p>"#),
            r#"<p class="lead">Hi <strong>there</strong></p>"#
        );
        assert_eq!(sanitize_html("<div><em>x</em></div>"), "<em>x</em>");
        assert_eq!(sanitize_html("line<br/>next<BR>"), "line<br>next<br>");
        assert_eq!(sanitize_html("<img src=x onerror=alert(1)>pic"), "pic");
        assert_eq!(sanitize_html("<script>alert(1)</script><u>ok</u>"), "<u>ok</u>");
        assert_eq!(sanitize_html("a < b & c"), "a &lt; b &amp; c");
        assert_eq!(sanitize_input("<span>x</span><a href=\"/\">y</a>", InputKind::SafeHtml), "<span>x</span>y");
    }

    #[test]
    fn test_sanitize_html_rejoined_pattern_removed() {
        let out = sanitize_html("java<b>script:alert(1)");
        assert!(!out.to_lowercase().contains("javascript:"));
        assert_eq!(sanitize_html(&out), out);
    }

    #[test]
    fn test_sanitize_html_is_idempotent() {
        let once = sanitize_html(r#"<p class="a&b">x & <i>y</i></p>"#);
        assert_eq!(sanitize_html(&once), once);
    }

    #[test]
    fn test_safe_attr() {
        assert_eq!(safe_attr("title", "a \"quoted\" <tip>"), "title=\"a &quot;quoted&quot; &lt;tip&gt;\"");
        assert_eq!(safe_attr("onClick", "alert(1)"), "");
        assert_eq!(safe_attr("data-id", "7"), "data-id=\"7\"");
        assert_eq!(safe_attr("bad name", "x"), "");
    }

    #[test]
    fn test_sanitize_value_recurses() {
        let raw = json!({
            "theme": "<b>x</b>",
            "tags": ["<i>a</i>", 3, true, null],
            "nested": { "note": "<script>x</script>ok" }
        });
        let clean = sanitize_value(&raw);
        assert_eq!(
            clean,
            json!({
                "theme": "&lt;b&gt;x&lt;/b&gt;",
                "tags": ["&lt;i&gt;a&lt;/i&gt;", 3, true, null],
                "nested": { "note": "ok" }
            })
        );
    }
}
