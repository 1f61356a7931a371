//! Small HTML text helpers shared by the sanitizer, highlighter and copy
//! augmenter.

use once_cell::sync::Lazy;
use regex::Regex;

static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)[^>]*>").expect("valid tag regex")
});

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "pre", "li", "tr", "blockquote", "h1", "h2", "h3", "h4", "h5", "h6", "table",
    "ul", "ol",
];

pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Escape an attribute value that may already contain entities.
pub fn escape_attribute(s: &str) -> String {
    s.replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

/// Text content of an HTML fragment: tags removed, entities decoded, and a
/// newline after each closing block element or `<br>`.
pub fn text_content(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    let mut pre_depth = 0usize;
    for caps in TAG.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        push_text(&mut out, &html[last..whole.start()], pre_depth > 0);
        last = whole.end();

        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();
        if name == "pre" {
            if closing {
                pre_depth = pre_depth.saturating_sub(1);
            } else {
                pre_depth += 1;
            }
        }
        if name == "br" || (closing && BLOCK_TAGS.contains(&name.as_str())) {
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    push_text(&mut out, &html[last..], false);
    unescape(&out)
}

/// Tags removed and entities decoded, whitespace kept verbatim.
pub fn strip_tags(html: &str) -> String {
    unescape(&TAG.replace_all(html, ""))
}

// Formatting newlines right after a break are not content, except inside
// preformatted text.
fn push_text(out: &mut String, segment: &str, preformatted: bool) {
    if !preformatted && out.ends_with('\n') {
        out.push_str(segment.trim_start_matches('\n'));
    } else {
        out.push_str(segment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_roundtrip() {
        let raw = r#"if a < b && c > "d" { }"#;
        assert_eq!(unescape(&escape(raw)), raw);
    }

    #[test]
    fn test_unescape_does_not_double_decode() {
        assert_eq!(unescape("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_text_content_strips_markup() {
        let html = "<p>ENS <strong>is</strong> a naming system</p>\n<ul>\n<li>one</li>\n<li>two</li>\n</ul>\n";
        assert_eq!(
            text_content(html).trim(),
            "ENS is a naming system\none\ntwo"
        );
    }

    #[test]
    fn test_text_content_keeps_blank_lines_in_code() {
        let html = "<pre><code>a\n\nb\n</code></pre>\n<p>after</p>";
        assert_eq!(text_content(html), "a\n\nb\nafter\n");
    }

    #[test]
    fn test_strip_tags_keeps_whitespace() {
        assert_eq!(
            strip_tags("<span class=\"k\">let</span> x\n\n<span>y</span>"),
            "let x\n\ny"
        );
    }

    #[test]
    fn test_text_content_decodes_entities() {
        assert_eq!(text_content("<code>a &lt; b</code>"), "a < b");
    }
}
