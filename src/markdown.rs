//! Markdown to HTML conversion.
//!
//! Options are passed into every call rather than set process-wide. The
//! output is not safe to display until it has gone through
//! [`crate::sanitize::sanitize`].

use once_cell::sync::Lazy;
use pulldown_cmark::{CodeBlockKind, CowStr, Event, LinkType, Options, Parser, Tag};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::html;

static BARE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s<>]+").expect("valid url regex"));

const URL_TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '\'', '"'];

fn default_true() -> bool {
    true
}

fn default_lang_prefix() -> String {
    "language-".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MarkdownOptions {
    /// Render soft line breaks as `<br />`.
    #[serde(default = "default_true")]
    pub breaks: bool,
    /// Tables, strikethrough and bare-URL autolinks.
    #[serde(default = "default_true")]
    pub gfm: bool,
    /// Class prefix marking a fenced block's language for the highlighter.
    #[serde(default = "default_lang_prefix")]
    pub lang_prefix: String,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        MarkdownOptions {
            breaks: true,
            gfm: true,
            lang_prefix: default_lang_prefix(),
        }
    }
}

pub fn to_html(content: &str, options: &MarkdownOptions) -> String {
    let mut parser_options = Options::empty();
    if options.gfm {
        parser_options.insert(Options::ENABLE_TABLES);
        parser_options.insert(Options::ENABLE_STRIKETHROUGH);
    }

    let mut events: Vec<Event<'_>> = Vec::new();
    let mut in_code_block = false;
    let mut link_depth = 0usize;
    // The parser splits text at unmatched emphasis markers, so adjacent text
    // events are joined before URLs are looked for.
    let mut prose = String::new();

    for event in Parser::new_ext(content, parser_options) {
        if let Event::Text(text) = &event {
            if options.gfm && !in_code_block && link_depth == 0 {
                prose.push_str(text);
                continue;
            }
        }
        if !prose.is_empty() {
            push_autolinked(&mut events, CowStr::from(std::mem::take(&mut prose)));
        }

        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code_block = true;
                events.push(Event::Html(code_block_open(&kind, &options.lang_prefix).into()));
            }
            Event::End(Tag::CodeBlock(_)) => {
                in_code_block = false;
                events.push(Event::Html("</code></pre>\n".into()));
            }
            Event::Start(Tag::Link(..)) => {
                link_depth += 1;
                events.push(event);
            }
            Event::End(Tag::Link(..)) => {
                link_depth = link_depth.saturating_sub(1);
                events.push(event);
            }
            Event::SoftBreak if options.breaks => events.push(Event::HardBreak),
            other => events.push(other),
        }
    }
    if !prose.is_empty() {
        push_autolinked(&mut events, CowStr::from(prose));
    }

    let mut out = String::with_capacity(content.len() * 3 / 2);
    pulldown_cmark::html::push_html(&mut out, events.into_iter());
    out
}

fn code_block_open(kind: &CodeBlockKind<'_>, lang_prefix: &str) -> String {
    let lang = match kind {
        CodeBlockKind::Fenced(info) => info.split_whitespace().next().unwrap_or(""),
        CodeBlockKind::Indented => "",
    };
    if lang.is_empty() {
        "<pre><code>".to_string()
    } else {
        format!(
            "<pre><code class=\"{}{}\">",
            html::escape(lang_prefix),
            html::escape(lang)
        )
    }
}

fn push_autolinked<'a>(events: &mut Vec<Event<'a>>, text: CowStr<'a>) {
    if !BARE_URL.is_match(&text) {
        events.push(Event::Text(text));
        return;
    }

    let mut last = 0;
    for found in BARE_URL.find_iter(&text) {
        let url = found.as_str().trim_end_matches(URL_TRAILING_PUNCTUATION);
        if url.len() <= "https://".len() {
            continue;
        }
        let start = found.start();
        let end = start + url.len();

        if start > last {
            events.push(Event::Text(CowStr::from(text[last..start].to_string())));
        }
        let dest = CowStr::from(url.to_string());
        events.push(Event::Start(Tag::Link(
            LinkType::Autolink,
            dest.clone(),
            CowStr::from(""),
        )));
        events.push(Event::Text(dest.clone()));
        events.push(Event::End(Tag::Link(LinkType::Autolink, dest, CowStr::from(""))));
        last = end;
    }
    if last < text.len() {
        events.push(Event::Text(CowStr::from(text[last..].to_string())));
    }
}
