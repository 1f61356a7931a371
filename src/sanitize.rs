//! Allowlist HTML sanitizer.
//!
//! The input is tokenized and only allowlisted tags and attributes are
//! re-serialized; everything else is dropped. Text between tags is passed
//! through, and a `<` that does not open a tag is escaped, so every `<` in
//! the output starts an allowlisted tag.

use crate::html;

pub const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "hr", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "ul", "ol", "li",
    "strong", "em", "del", "s", "code", "pre", "a", "table", "thead", "tbody", "tr", "th", "td",
    "div", "span", "button", "svg", "path", "rect",
];

const GLOBAL_ATTRIBUTES: &[&str] = &["class", "title"];

const SVG_ATTRIBUTES: &[&str] = &[
    "width",
    "height",
    "viewbox",
    "fill",
    "stroke",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
    "d",
    "x",
    "y",
    "rx",
    "ry",
    "xmlns",
];

/// Tags whose content goes away with them.
const DROP_WITH_CONTENT: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "noscript", "template", "textarea", "title",
    "xmp", "noembed", "noframes",
];

const SAFE_URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    let mut text_start = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        out.push_str(&input[text_start..i]);

        i = match parse_markup(input, i) {
            Markup::Skip(end) => end,
            Markup::Tag(tag) => {
                if tag.closing {
                    if is_allowed_tag(&tag.name) {
                        out.push_str("</");
                        out.push_str(&tag.name);
                        out.push('>');
                    }
                    tag.end
                } else if DROP_WITH_CONTENT.contains(&tag.name.as_str()) {
                    skip_raw_text(input, tag.end, &tag.name)
                } else {
                    if is_allowed_tag(&tag.name) {
                        write_open_tag(&mut out, &tag);
                    }
                    tag.end
                }
            }
            Markup::Text => {
                out.push_str("&lt;");
                i + 1
            }
        };
        text_start = i;
    }

    out.push_str(&input[text_start..]);
    out
}

pub fn is_allowed_tag(name: &str) -> bool {
    ALLOWED_TAGS.contains(&name)
}

#[derive(Debug)]
struct ParsedTag {
    name: String,
    closing: bool,
    self_closing: bool,
    attributes: Vec<(String, Option<String>)>,
    end: usize,
}

#[derive(Debug)]
enum Markup {
    /// Comment, doctype or processing instruction ending at the offset.
    Skip(usize),
    Tag(ParsedTag),
    /// Not markup; the `<` is literal text.
    Text,
}

fn parse_markup(input: &str, start: usize) -> Markup {
    let bytes = input.as_bytes();
    let rest = &input[start..];

    if rest.starts_with("<!--") {
        let end = input[start + 4..]
            .find("-->")
            .map(|p| start + 4 + p + 3)
            .unwrap_or(input.len());
        return Markup::Skip(end);
    }

    let mut i = start + 1;
    match bytes.get(i) {
        Some(b'!') | Some(b'?') => {
            let end = input[i..].find('>').map(|p| i + p + 1).unwrap_or(input.len());
            return Markup::Skip(end);
        }
        Some(b'/') => i += 1,
        _ => {}
    }
    let closing = i > start + 1;

    if !bytes.get(i).is_some_and(|b| b.is_ascii_alphabetic()) {
        return Markup::Text;
    }
    let name_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-' || bytes[i] == b':') {
        i += 1;
    }
    let name = input[name_start..i].to_ascii_lowercase();

    let mut attributes = Vec::new();
    let mut self_closing = false;
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match bytes.get(i) {
            None => return Markup::Text,
            Some(b'>') => {
                i += 1;
                break;
            }
            Some(b'/') => {
                self_closing = true;
                i += 1;
                continue;
            }
            _ => {}
        }
        self_closing = false;

        let attr_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'/' | b'>' | b'=')
        {
            i += 1;
        }
        if i == attr_start {
            // A lone `=`; browsers treat it as the start of a name.
            i += 1;
            continue;
        }
        let attr_name = input[attr_start..i].to_ascii_lowercase();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = None;
        if bytes.get(i) == Some(&b'=') {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            match bytes.get(i) {
                None => return Markup::Text,
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    let value_start = i + 1;
                    let Some(len) = input[value_start..].find(quote as char) else {
                        return Markup::Text;
                    };
                    value = Some(input[value_start..value_start + len].to_string());
                    i = value_start + len + 1;
                }
                Some(_) => {
                    let value_start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    value = Some(input[value_start..i].to_string());
                }
            }
        }
        attributes.push((attr_name, value));
    }

    Markup::Tag(ParsedTag {
        name,
        closing,
        self_closing,
        attributes,
        end: i,
    })
}

/// Offset just past the end tag closing a dropped element, or the end of
/// input if it never closes.
fn skip_raw_text(input: &str, from: usize, name: &str) -> usize {
    let lower = input[from..].to_ascii_lowercase();
    let needle = format!("</{name}");
    match lower.find(&needle) {
        Some(p) => {
            let after = from + p + needle.len();
            input[after..].find('>').map(|q| after + q + 1).unwrap_or(input.len())
        }
        None => input.len(),
    }
}

fn write_open_tag(out: &mut String, tag: &ParsedTag) {
    out.push('<');
    out.push_str(&tag.name);

    let is_link = tag.name == "a";
    for (name, value) in &tag.attributes {
        let value = value.as_deref().unwrap_or("");
        if !is_allowed_attribute(&tag.name, name, value) {
            continue;
        }
        let name = if name == "viewbox" { "viewBox" } else { name.as_str() };
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&html::escape_attribute(value));
        out.push('"');
    }
    if is_link {
        out.push_str(" target=\"_blank\" rel=\"noopener noreferrer\"");
    }

    if tag.self_closing && matches!(tag.name.as_str(), "br" | "hr" | "path" | "rect") {
        out.push_str(" />");
    } else {
        out.push('>');
    }
}

fn is_allowed_attribute(tag: &str, name: &str, value: &str) -> bool {
    if GLOBAL_ATTRIBUTES.contains(&name) {
        return true;
    }
    match (tag, name) {
        ("a", "href") => is_safe_url(value),
        // Forced on every link instead.
        ("a", "target") | ("a", "rel") => false,
        ("ol", "start") => value.chars().all(|c| c.is_ascii_digit()),
        ("button", "type") => value.eq_ignore_ascii_case("button"),
        ("svg" | "path" | "rect", _) => SVG_ATTRIBUTES.contains(&name),
        _ => false,
    }
}

fn is_safe_url(value: &str) -> bool {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();

    // Entity-encoded schemes (`javascript&colon;`, `&#106;avascript:`).
    if cleaned.contains("&#") || cleaned.contains("&colon") {
        return false;
    }

    match cleaned.find(':') {
        None => true,
        Some(colon) => {
            let scheme = &cleaned[..colon];
            scheme.contains(['/', '?', '#']) || SAFE_URL_SCHEMES.contains(&scheme)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::{self, MarkdownOptions};
    use once_cell::sync::Lazy;
    use proptest::prelude::*;
    use regex::Regex;

    static OUTPUT_TAG: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"<\s*/?\s*([^\s/>]*)").unwrap());

    static WHOLE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
    static EVENT_HANDLER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\son[a-z]+\s*=").unwrap());

    fn tags_in(html: &str) -> Vec<String> {
        OUTPUT_TAG
            .captures_iter(html)
            .map(|c| c[1].to_ascii_lowercase())
            .collect()
    }

    const PAYLOADS: &[&str] = &[
        "<script>alert(1)</script>",
        "<SCRIPT SRC=//evil.example/x.js></SCRIPT>",
        "<img src=x onerror=alert(1)>",
        "<svg onload=alert(1)><path d=\"M0 0\" onclick=\"x()\"/></svg>",
        "<a href=\"javascript:alert(1)\">click</a>",
        "<a href=\"jav&#x09;ascript:alert(1)\">tab</a>",
        "<a href=\" JaVaScRiPt:alert(1)\">case</a>",
        "<iframe src=\"https://evil.example\"></iframe>",
        "<style>body{display:none}</style>",
        "<div style=\"background:url(javascript:alert(1))\">styled</div>",
        "<<script>script>alert(1)<</script>/script>",
        "<scr<script>ipt>alert(1)</script>",
        "<!--<script>alert(1)</script>-->",
        "<![CDATA[<script>alert(1)</script>]]>",
        "<object data=x></object><embed src=x>",
        "<input autofocus onfocus=alert(1)>",
        "<form action=x><button formaction=javascript:alert(1)>go</button></form>",
        "<math><mi xlink:href=\"javascript:alert(1)\">m</mi></math>",
        "<p title=\"x\" onmouseover=\"alert(1)\">hover</p>",
        "<a href='x' onclick='y'",
        "<details open ontoggle=alert(1)>",
        "<table background=\"javascript:alert(1)\"><tr><td>x</td></tr></table>",
        "<base href=\"https://evil.example/\">",
        "<meta http-equiv=\"refresh\" content=\"0;url=javascript:alert(1)\">",
        "<video><source onerror=alert(1)></video>",
        "<textarea><script>alert(1)</script></textarea>",
        "</p><script>alert(1)</script><p>",
        "< script>alert(1)</script>",
        "<a/href=\"javascript:alert(1)\">slash</a>",
    ];

    #[test]
    fn test_no_disallowed_tags_survive_adversarial_payloads() {
        let options = MarkdownOptions::default();
        let prefixes = ["", "Intro text\n\n", "- item\n", "> quote\n", "**bold** "];
        let suffixes = ["", " trailing", "\n\n```js\nlet x = 1;\n```"];

        for payload in PAYLOADS {
            for prefix in prefixes {
                for suffix in suffixes {
                    let content = format!("{prefix}{payload}{suffix}");
                    for candidate in [sanitize(&content), sanitize(&markdown::to_html(&content, &options))] {
                        for tag in tags_in(&candidate) {
                            assert!(
                                is_allowed_tag(&tag),
                                "tag <{tag}> survived in {candidate:?} from {content:?}"
                            );
                        }
                        for markup in WHOLE_TAG.find_iter(&candidate) {
                            let markup = markup.as_str().to_ascii_lowercase();
                            assert!(!markup.contains("javascript:"), "script url in {markup}");
                            assert!(!EVENT_HANDLER.is_match(&markup), "event handler in {markup}");
                            assert!(!markup.contains("style="), "style attribute in {markup}");
                        }
                    }
                }
            }
        }
    }

    const MARKUP_PIECES: &[&str] = &[
        "<", ">", "/", "</", "/>", "<!--", "-->", "<!", "<?", "=", "\"", "'", "`", " ", "\n",
        "script", "SCRIPT", "style", "img", "svg", "a", "p", "pre", "code", "button", "iframe",
        "textarea", "title", "math", "href", "src", "onerror", "onload", "style=", "class",
        "javascript:", "jav&#x09;ascript:", "&lt;", "&gt;", "&#60;", "&amp;", "&colon;",
        "alert(1)", "```", "`x`", "*", "[x](", ")", "text",
    ];

    fn adversarial_content() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::sample::select(MARKUP_PIECES), 0..48)
            .prop_map(|pieces| pieces.concat())
    }

    proptest! {
        #[test]
        fn prop_sanitized_output_only_has_allowed_tags(content in adversarial_content()) {
            let options = MarkdownOptions::default();
            for candidate in [sanitize(&content), sanitize(&markdown::to_html(&content, &options))] {
                for tag in tags_in(&candidate) {
                    prop_assert!(
                        is_allowed_tag(&tag),
                        "tag <{}> survived in {:?} from {:?}",
                        tag,
                        candidate,
                        content
                    );
                }
            }
        }
    }

    #[test]
    fn test_disallowed_tags_are_dropped_not_escaped() {
        assert_eq!(sanitize("<p>a <img src=x> b</p>"), "<p>a  b</p>");
        assert_eq!(sanitize("<font color=red>red</font>"), "red");
    }

    #[test]
    fn test_script_content_is_dropped() {
        assert_eq!(sanitize("before<script>alert(1)</script>after"), "beforeafter");
        assert_eq!(sanitize("x<style>p{}</style"), "x");
        assert_eq!(sanitize("x<script>never closed"), "x");
    }

    #[test]
    fn test_stray_angle_bracket_is_escaped() {
        assert_eq!(sanitize("1 < 2 and <3"), "1 &lt; 2 and &lt;3");
        assert_eq!(sanitize("<p unterminated"), "&lt;p unterminated");
    }

    #[test]
    fn test_links_are_forced_to_new_tab() {
        assert_eq!(
            sanitize("<a href=\"https://docs.ens.domains\" target=\"_self\" rel=\"opener\">docs</a>"),
            "<a href=\"https://docs.ens.domains\" target=\"_blank\" rel=\"noopener noreferrer\">docs</a>"
        );
    }

    #[test]
    fn test_unsafe_hrefs_are_removed() {
        assert_eq!(
            sanitize("<a href=\"javascript:alert(1)\">x</a>"),
            "<a target=\"_blank\" rel=\"noopener noreferrer\">x</a>"
        );
        assert!(sanitize("<a href=\"/relative/path:with-colon\">x</a>").contains("href="));
        assert!(sanitize("<a href=\"mailto:hi@ens.domains\">x</a>").contains("href="));
    }

    #[test]
    fn test_svg_copy_icon_survives() {
        let icon = "<svg width=\"16\" height=\"16\" viewBox=\"0 0 24 24\" fill=\"none\" stroke=\"currentColor\"><rect x=\"9\" y=\"9\" width=\"13\" height=\"13\" rx=\"2\" /><path d=\"M5 15H4\" /></svg>";
        assert_eq!(sanitize(icon), icon);
    }

    #[test]
    fn test_markdown_output_passes_unchanged() {
        let html = markdown::to_html(
            "# Title\n\nSome *text* with `code`.\n\n```solidity\nuint a = 1;\n```\n",
            &MarkdownOptions::default(),
        );
        assert_eq!(sanitize(&html), html);
    }

    #[test]
    fn test_comments_and_doctype_are_dropped() {
        assert_eq!(sanitize("<!DOCTYPE html><!-- note --><p>x</p>"), "<p>x</p>");
    }
}
