//! Incremental rendering of the message list.
//!
//! Every pass formats each assistant message from its latest content and
//! swaps the whole cache in at once. An entry whose content has not changed
//! since the last pass is carried over as is, which is also why a failed
//! message is not retried until its content changes.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

use crate::copy::{self, CodeBlockTarget};
use crate::diagnostics::{self, Kind};
use crate::highlight::Highlighter;
use crate::html;
use crate::markdown::{self, MarkdownOptions};
use crate::message::{Message, MessageId, Role};
use crate::sanitize;

static PRE_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<pre[^>]*>.*?</pre>").expect("valid pre element regex"));

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("highlighting failed: {0}")]
    Highlight(#[from] syntect::Error),
    #[error("invalid grammar: {0}")]
    Grammar(String),
}

/// Turns message content into display-safe HTML. Returning is the signal
/// that formatting is complete.
pub trait Formatter {
    fn format(&self, content: &str) -> Result<String, RenderError>;

    /// Class prefix that marks a code block's language in the output.
    fn lang_prefix(&self) -> &str {
        "language-"
    }
}

/// Markdown, then sanitize, then highlight.
#[derive(Debug, Clone)]
pub struct Pipeline {
    options: MarkdownOptions,
    highlighter: Highlighter,
}

impl Pipeline {
    pub fn new(options: MarkdownOptions) -> Self {
        Self::with_highlighter(options, Highlighter::new())
    }

    pub fn with_highlighter(options: MarkdownOptions, highlighter: Highlighter) -> Self {
        Pipeline {
            options,
            highlighter,
        }
    }

    pub fn options(&self) -> &MarkdownOptions {
        &self.options
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(MarkdownOptions::default())
    }
}

impl Formatter for Pipeline {
    fn format(&self, content: &str) -> Result<String, RenderError> {
        let raw = markdown::to_html(content, &self.options);
        let safe = sanitize::sanitize(&raw);
        self.highlighter.highlight(&safe, &self.options.lang_prefix)
    }

    fn lang_prefix(&self) -> &str {
        &self.options.lang_prefix
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedMessage {
    pub html: String,
    pub code_blocks: Vec<CodeBlockTarget>,
}

/// A run of prose or one code block, in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Code { index: usize, text: String },
}

impl FormattedMessage {
    /// Visible text, as a reader would select it.
    pub fn text(&self) -> String {
        html::text_content(&self.html)
    }

    /// The message split around its code blocks, for views that lay out
    /// code separately from prose.
    pub fn segments(&self) -> Vec<Segment> {
        let mut out = Vec::new();
        let mut last = 0;

        for pre in PRE_ELEMENT.find_iter(&self.html) {
            let Some(block) = self
                .code_blocks
                .iter()
                .find(|block| block.open_tag.start == pre.start())
            else {
                continue;
            };
            push_prose(&mut out, &self.html[last..pre.start()]);
            out.push(Segment::Code {
                index: block.index,
                text: block.text.clone(),
            });
            last = pre.end();
        }
        push_prose(&mut out, &self.html[last..]);
        out
    }
}

fn push_prose(out: &mut Vec<Segment>, html: &str) {
    let text = html::text_content(html);
    let text = text.trim();
    if !text.is_empty() {
        out.push(Segment::Text(text.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatState {
    Formatted(FormattedMessage),
    FormattingFailed { raw: String, error: String },
}

#[derive(Debug, Clone)]
struct CacheEntry {
    source: String,
    state: FormatState,
}

/// What the view shows for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display<'a> {
    /// User and system messages: shown verbatim, never formatted.
    Plain(&'a str),
    Html(&'a FormattedMessage),
    /// Formatting failed; the raw content stands in.
    Raw(&'a str),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderSummary {
    pub formatted: usize,
    pub reused: usize,
    pub failed: usize,
}

pub struct MessageRenderer<F = Pipeline> {
    formatter: F,
    cache: HashMap<MessageId, CacheEntry>,
}

impl Default for MessageRenderer<Pipeline> {
    fn default() -> Self {
        Self::new(Pipeline::default())
    }
}

impl<F: Formatter> MessageRenderer<F> {
    pub fn new(formatter: F) -> Self {
        MessageRenderer {
            formatter,
            cache: HashMap::new(),
        }
    }

    pub fn render(&mut self, messages: &[Message]) -> RenderSummary {
        let mut summary = RenderSummary::default();
        let mut next = HashMap::with_capacity(self.cache.len() + 1);

        for message in messages.iter().filter(|m| m.role == Role::Assistant) {
            if let Some(entry) = self.cache.get(&message.id) {
                if entry.source == message.content {
                    next.insert(message.id.clone(), entry.clone());
                    summary.reused += 1;
                    continue;
                }
            }

            let state = self.format_one(message);
            if matches!(state, FormatState::FormattingFailed { .. }) {
                summary.failed += 1;
            } else {
                summary.formatted += 1;
            }
            next.insert(
                message.id.clone(),
                CacheEntry {
                    source: message.content.clone(),
                    state,
                },
            );
        }

        self.cache = next;
        summary
    }

    fn format_one(&self, message: &Message) -> FormatState {
        match self.formatter.format(&message.content) {
            Ok(formatted) => {
                // Formatting is done; attach copy controls exactly once.
                let lang_prefix = self.formatter.lang_prefix();
                let targets = copy::plan(&formatted, lang_prefix);
                let html = copy::apply(&formatted, &targets);
                let code_blocks = copy::code_blocks(&html, lang_prefix);
                FormatState::Formatted(FormattedMessage { html, code_blocks })
            }
            Err(e) => {
                diagnostics::log_with(
                    Kind::Render,
                    format!("Showing message {} unformatted: {e}", message.id),
                );
                FormatState::FormattingFailed {
                    raw: message.content.clone(),
                    error: e.to_string(),
                }
            }
        }
    }

    pub fn state(&self, id: &MessageId) -> Option<&FormatState> {
        self.cache.get(id).map(|entry| &entry.state)
    }

    pub fn display<'a>(&'a self, message: &'a Message) -> Display<'a> {
        if message.role != Role::Assistant {
            return Display::Plain(&message.content);
        }
        match self.state(&message.id) {
            Some(FormatState::Formatted(formatted)) => Display::Html(formatted),
            Some(FormatState::FormattingFailed { raw, .. }) => Display::Raw(raw),
            None => Display::Raw(&message.content),
        }
    }

    pub fn code_text(&self, id: &MessageId, index: usize) -> Option<&str> {
        match self.state(id)? {
            FormatState::Formatted(formatted) => formatted
                .code_blocks
                .iter()
                .find(|block| block.index == index)
                .map(|block| block.text.as_str()),
            FormatState::FormattingFailed { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
