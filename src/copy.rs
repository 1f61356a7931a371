//! Copy controls for rendered code blocks.
//!
//! [`plan`] is pure: it describes which code blocks still need a control.
//! [`apply`] is the thin adapter that rewrites the markup. Clipboard writes
//! go through the [`Clipboard`] trait so the feedback logic can be tested
//! without a desktop session.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::diagnostics::{self, Kind};
use crate::html;
use crate::message::MessageId;

pub const AUGMENTED_MARKER: &str = "data-copy-augmented";

/// How long a control shows its confirmation after a successful copy.
pub const COPY_CONFIRMATION: Duration = Duration::from_secs(1);

const COPY_BUTTON_ICON: &str = concat!(
    "<svg width=\"16\" height=\"16\" viewBox=\"0 0 24 24\" fill=\"none\" stroke=\"currentColor\" ",
    "stroke-width=\"2\" stroke-linecap=\"round\" stroke-linejoin=\"round\">",
    "<rect x=\"9\" y=\"9\" width=\"13\" height=\"13\" rx=\"2\" ry=\"2\" />",
    "<path d=\"M5 15H4a2 2 0 0 1-2-2V4a2 2 0 0 1 2-2h9a2 2 0 0 1 2 2v1\" />",
    "</svg>"
);

static PRE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<pre([^>]*)>(.*?)</pre>").expect("valid pre block regex")
});

static CODE_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<code([^>]*)>(.*?)</code>"#).expect("valid code element regex")
});

static CLASS_ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"class="([^"]*)""#).expect("valid class regex"));

/// A code block found in rendered markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlockTarget {
    /// Position among the code blocks of the message, from zero.
    pub index: usize,
    /// Byte range of the `<pre ...>` opening tag.
    pub open_tag: Range<usize>,
    pub language: Option<String>,
    /// Text content of the inner `<code>` element only.
    pub text: String,
    pub augmented: bool,
}

/// Every code block in `html`, augmented or not. The language is read from
/// the `{lang_prefix}{lang}` class on the inner `<code>`.
pub fn code_blocks(html: &str, lang_prefix: &str) -> Vec<CodeBlockTarget> {
    let mut blocks = Vec::new();

    for caps in PRE_BLOCK.captures_iter(html) {
        let (Some(whole), Some(attrs), Some(inner)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let Some(code) = CODE_ELEMENT.captures(inner.as_str()) else {
            continue;
        };

        let language = CLASS_ATTRIBUTE
            .captures(&code[1])
            .and_then(|c| {
                c[1].split_whitespace()
                    .find_map(|class| class.strip_prefix(lang_prefix))
                    .filter(|lang| !lang.is_empty())
                    .map(str::to_string)
            });

        blocks.push(CodeBlockTarget {
            index: blocks.len(),
            open_tag: whole.start()..inner.start(),
            language,
            text: html::strip_tags(&code[2]),
            augmented: attrs.as_str().contains(AUGMENTED_MARKER),
        });
    }

    blocks
}

/// Code blocks that do not carry a copy control yet.
pub fn plan(html: &str, lang_prefix: &str) -> Vec<CodeBlockTarget> {
    code_blocks(html, lang_prefix)
        .into_iter()
        .filter(|block| !block.augmented)
        .collect()
}

/// Mark each planned `<pre>` and insert its copy control. Targets must come
/// from [`plan`] on the same `html`.
pub fn apply(html: &str, targets: &[CodeBlockTarget]) -> String {
    let mut out = String::with_capacity(html.len() + targets.len() * 512);
    let mut last = 0;

    for target in targets {
        if target.open_tag.start < last || target.open_tag.end > html.len() {
            tracing::warn!("Skipping stale copy target {}", target.index);
            continue;
        }
        let open_tag = &html[target.open_tag.clone()];
        let attrs = open_tag
            .strip_prefix("<pre")
            .and_then(|rest| rest.strip_suffix('>'))
            .unwrap_or("");

        out.push_str(&html[last..target.open_tag.start]);
        out.push_str(&format!(
            "<pre{attrs} {AUGMENTED_MARKER}=\"true\" data-copy-index=\"{}\">",
            target.index
        ));
        out.push_str(&copy_button(target.index));
        last = target.open_tag.end;
    }

    out.push_str(&html[last..]);
    out
}

/// Plan and apply in one go. Running it again on its own output adds
/// nothing.
pub fn augment(html: &str, lang_prefix: &str) -> String {
    let targets = plan(html, lang_prefix);
    if targets.is_empty() {
        return html.to_string();
    }
    apply(html, &targets)
}

fn copy_button(index: usize) -> String {
    format!(
        "<button type=\"button\" class=\"copy-button\" data-copy-index=\"{index}\" title=\"Copy code\">{COPY_BUTTON_ICON}</button>"
    )
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("clipboard write rejected: {0}")]
    Rejected(String),
}

pub trait Clipboard {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// The desktop clipboard.
pub struct SystemClipboard {
    inner: arboard::Clipboard,
}

impl SystemClipboard {
    pub fn new() -> Result<Self, ClipboardError> {
        arboard::Clipboard::new()
            .map(|inner| SystemClipboard { inner })
            .map_err(|e| ClipboardError::Unavailable(e.to_string()))
    }
}

impl Clipboard for SystemClipboard {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.inner
            .set_text(text.to_string())
            .map_err(|e| ClipboardError::Rejected(e.to_string()))
    }
}

/// One clipboard handle, opened on first use and kept for the life of the
/// process. On X11 the copied text is only served while its handle is open.
pub struct SharedClipboard<C> {
    handle: Mutex<Option<C>>,
    open: fn() -> Result<C, ClipboardError>,
}

impl<C: Clipboard> SharedClipboard<C> {
    pub fn new(open: fn() -> Result<C, ClipboardError>) -> Self {
        SharedClipboard {
            handle: Mutex::new(None),
            open,
        }
    }

    /// Write through the shared handle. A failed open is reported as
    /// `Unavailable` and tried again on the next write.
    pub fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        let mut handle = self
            .handle
            .lock()
            .map_err(|_| ClipboardError::Unavailable("clipboard lock poisoned".to_string()))?;
        if handle.is_none() {
            *handle = Some((self.open)()?);
        }
        match handle.as_mut() {
            Some(clipboard) => clipboard.write_text(text),
            None => Err(ClipboardError::Unavailable("no clipboard handle".to_string())),
        }
    }
}

static SYSTEM_CLIPBOARD: Lazy<SharedClipboard<SystemClipboard>> =
    Lazy::new(|| SharedClipboard::new(SystemClipboard::new));

/// Write to the system clipboard off the UI thread.
pub async fn write_async(text: String) -> Result<(), ClipboardError> {
    tokio::task::spawn_blocking(move || SYSTEM_CLIPBOARD.write_text(&text))
        .await
        .map_err(|e| ClipboardError::Unavailable(e.to_string()))?
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CopyKey {
    pub message: MessageId,
    pub block: usize,
}

/// Transient "copied" state per control.
#[derive(Debug, Default)]
pub struct CopyFeedback {
    confirmed_until: HashMap<CopyKey, Instant>,
}

impl CopyFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `text` and record the outcome. Never fails; a rejected write is
    /// reported to diagnostics.
    pub fn activate<C: Clipboard + ?Sized>(
        &mut self,
        key: CopyKey,
        text: &str,
        clipboard: &mut C,
        now: Instant,
    ) {
        let result = clipboard.write_text(text);
        self.record(key, result, now);
    }

    pub fn record(&mut self, key: CopyKey, result: Result<(), ClipboardError>, now: Instant) {
        match result {
            Ok(()) => {
                self.confirmed_until.insert(key, now + COPY_CONFIRMATION);
            }
            Err(e) => {
                diagnostics::log_with(
                    Kind::Clipboard,
                    format!("Copy of code block {} in {} failed: {e}", key.block, key.message),
                );
            }
        }
    }

    pub fn is_confirmed(&self, key: &CopyKey, now: Instant) -> bool {
        self.confirmed_until
            .get(key)
            .is_some_and(|until| now < *until)
    }

    pub fn is_active(&self) -> bool {
        !self.confirmed_until.is_empty()
    }

    /// Drop confirmations that have run out.
    pub fn expire(&mut self, now: Instant) {
        self.confirmed_until.retain(|_, until| now < *until);
    }
}
