use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::sync::Arc;
use syntect::html::{ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::{SyntaxDefinition, SyntaxSet};
use syntect::util::LinesWithEndings;

use crate::html;
use crate::render::RenderError;

/// Grammars shipped with the crate on top of syntect's defaults.
const BUNDLED_GRAMMARS: &[(&str, &str)] = &[(
    "Solidity",
    include_str!("grammars/solidity.sublime-syntax"),
)];

pub const HIGHLIGHTED_MARKER: &str = "data-highlighted";

static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<pre><code class="([^"]*)"([^>]*)>(.*?)</code></pre>"#)
        .expect("valid code block regex")
});

static BUNDLED_SYNTAXES: Lazy<Arc<SyntaxSet>> = Lazy::new(|| {
    let mut builder = SyntaxSet::load_defaults_newlines().into_builder();
    for (name, source) in BUNDLED_GRAMMARS {
        match SyntaxDefinition::load_from_str(source, true, Some(*name)) {
            Ok(definition) => builder.add(definition),
            Err(e) => tracing::warn!("Skipping bundled {name} grammar: {e}"),
        }
    }
    Arc::new(builder.build())
});

fn class_style() -> ClassStyle {
    ClassStyle::SpacedPrefixed { prefix: "hl-" }
}

/// Fence tags that name a grammar syntect knows under another token.
fn grammar_token(lang: &str) -> String {
    let lower = lang.to_ascii_lowercase();
    match lower.as_str() {
        "shell" | "console" | "zsh" => "sh".to_string(),
        "ts" | "typescript" | "tsx" | "jsx" => "js".to_string(),
        "yml" => "yaml".to_string(),
        _ => lower,
    }
}

#[derive(Clone)]
pub struct Highlighter {
    syntaxes: Arc<SyntaxSet>,
}

impl Default for Highlighter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Highlighter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Highlighter")
            .field("grammars", &self.syntaxes.syntaxes().len())
            .finish()
    }
}

impl Highlighter {
    /// syntect's default grammars plus the bundled ones. A bundled grammar
    /// that fails to load is logged and left out.
    pub fn new() -> Self {
        Highlighter {
            syntaxes: BUNDLED_SYNTAXES.clone(),
        }
    }

    /// The default set plus extra sublime-syntax sources.
    pub fn with_grammars(sources: &[&str]) -> Result<Self, RenderError> {
        let mut builder = BUNDLED_SYNTAXES.as_ref().clone().into_builder();
        for source in sources {
            let definition = SyntaxDefinition::load_from_str(source, true, None)
                .map_err(|e| RenderError::Grammar(e.to_string()))?;
            builder.add(definition);
        }
        Ok(Highlighter {
            syntaxes: Arc::new(builder.build()),
        })
    }

    pub fn has_grammar(&self, lang: &str) -> bool {
        self.syntaxes.find_syntax_by_token(&grammar_token(lang)).is_some()
    }

    /// Highlight every `<pre><code class="{lang_prefix}{lang}">` block that
    /// is not marked yet. Blocks without a known grammar are left as they
    /// are. Marked blocks are skipped, so a second pass changes nothing.
    pub fn highlight(&self, html: &str, lang_prefix: &str) -> Result<String, RenderError> {
        let mut out = String::with_capacity(html.len() + html.len() / 2);
        let mut last = 0;

        for caps in CODE_BLOCK.captures_iter(html) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&html[last..whole.start()]);
            last = whole.end();

            match self.highlight_block(&caps, lang_prefix)? {
                Some(replacement) => out.push_str(&replacement),
                None => out.push_str(whole.as_str()),
            }
        }
        out.push_str(&html[last..]);
        Ok(out)
    }

    fn highlight_block(
        &self,
        caps: &Captures<'_>,
        lang_prefix: &str,
    ) -> Result<Option<String>, RenderError> {
        let class = &caps[1];
        let rest = &caps[2];
        if rest.contains(HIGHLIGHTED_MARKER) {
            return Ok(None);
        }
        let Some(lang) = class
            .split_whitespace()
            .find_map(|c| c.strip_prefix(lang_prefix))
        else {
            return Ok(None);
        };

        let source = html::unescape(&caps[3]);
        let Some(body) = self.highlight_code(lang, &source)? else {
            return Ok(None);
        };
        Ok(Some(format!(
            "<pre><code class=\"{class}\"{rest} {HIGHLIGHTED_MARKER}=\"true\">{body}</code></pre>"
        )))
    }

    /// Tokenize `source` with the grammar for `lang`; `None` when no grammar
    /// is loaded for it.
    pub fn highlight_code(&self, lang: &str, source: &str) -> Result<Option<String>, RenderError> {
        let Some(syntax) = self.syntaxes.find_syntax_by_token(&grammar_token(lang)) else {
            tracing::debug!("No grammar for {lang}, leaving code block unstyled");
            return Ok(None);
        };

        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, &self.syntaxes, class_style());
        for line in LinesWithEndings::from(source) {
            generator.parse_html_for_line_which_includes_newline(line)?;
        }
        Ok(Some(generator.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::{self, MarkdownOptions};
    use crate::sanitize;

    fn rendered(md: &str) -> String {
        sanitize::sanitize(&markdown::to_html(md, &MarkdownOptions::default()))
    }

    #[test]
    fn test_solidity_grammar_is_bundled() {
        let highlighter = Highlighter::new();
        assert!(highlighter.has_grammar("solidity"));
        assert!(highlighter.has_grammar("sol"));
        assert!(!highlighter.has_grammar("foobar"));
    }

    #[test]
    fn test_known_grammar_gets_token_spans() {
        let html = rendered("```solidity\npragma solidity ^0.8.0;\ncontract Registry {}\n```");
        let out = Highlighter::new().highlight(&html, "language-").unwrap();

        assert!(out.contains("data-highlighted=\"true\""));
        assert!(out.contains("<span class=\"hl-keyword hl-control hl-solidity\">pragma</span>"));
        assert!(out.contains("<span class=\"hl-keyword hl-control hl-solidity\">contract</span>"));
        assert_eq!(html::text_content(&out), "pragma solidity ^0.8.0;\ncontract Registry {}\n");
    }

    #[test]
    fn test_unknown_grammar_passes_through() {
        let html = rendered("```foobar\nfrobnicate(1 < 2);\n```");
        let out = Highlighter::new().highlight(&html, "language-").unwrap();

        assert_eq!(out, html);
        assert!(!out.contains("hl-"));
        assert!(out.contains("frobnicate(1 &lt; 2);"));
    }

    #[test]
    fn test_highlighting_is_idempotent() {
        let highlighter = Highlighter::new();
        let html = rendered(
            "Intro\n\n```solidity\nfunction f() public {}\n```\n\n```rust\nfn main() {}\n```\n\n```foobar\nx\n```",
        );
        let once = highlighter.highlight(&html, "language-").unwrap();
        let twice = highlighter.highlight(&once, "language-").unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.matches(HIGHLIGHTED_MARKER).count(), 2);
    }

    #[test]
    fn test_escaped_source_roundtrips() {
        let html = rendered("```rust\nlet s = \"<a & b>\";\n```");
        let out = Highlighter::new().highlight(&html, "language-").unwrap();
        assert_eq!(html::text_content(&out), "let s = \"<a & b>\";\n");
    }

    #[test]
    fn test_other_prefix_is_ignored() {
        let html = "<pre><code class=\"lang-rust\">fn main() {}\n</code></pre>";
        let highlighter = Highlighter::new();
        assert_eq!(highlighter.highlight(html, "language-").unwrap(), html);
        assert!(highlighter
            .highlight(html, "lang-")
            .unwrap()
            .contains(HIGHLIGHTED_MARKER));
    }

    #[test]
    fn test_invalid_extra_grammar_is_an_error() {
        let err = Highlighter::with_grammars(&["not: [valid"]).unwrap_err();
        assert!(matches!(err, RenderError::Grammar(_)));
    }

    #[test]
    fn test_extra_grammar_is_loaded() {
        let grammar = "%YAML 1.2\n---\nname: Ensfile\nfile_extensions: [ensfile]\nscope: source.ensfile\ncontexts:\n  main:\n    - match: '\\bname\\b'\n      scope: keyword.other.ensfile\n";
        let highlighter = Highlighter::with_grammars(&[grammar]).unwrap();
        assert!(highlighter.has_grammar("ensfile"));
        assert!(highlighter.has_grammar("solidity"));
    }
}
