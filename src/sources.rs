//! Source links and citation numbering for retrieved documentation chunks.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

const MISSING_URL: &str = "No URL available";

static DOCS_PAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/src/pages/(.*?)(?:\.mdx?)?$").expect("valid docs page regex"));
static ENSIP_PAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/ensips/(\d+)\.md$").expect("valid ensip regex"));
static SUPPORT_PAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/docs/(.*?)(?:\.mdx?)?$").expect("valid support page regex"));
static CITATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("valid citation regex"));
static REFERENCES_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\n## References\n[\s\S]*").expect("valid references regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLink {
    pub url: String,
    pub display: String,
}

impl SourceLink {
    /// `[n] [display](url)`, the line used in link and reference lists.
    pub fn entry(&self, number: usize) -> String {
        format!("[{number}] [{}]({})", self.display, self.url)
    }
}

/// Map a raw document URL to the page a reader should visit and a short
/// label for it. URLs from unknown repositories keep their original text as
/// the label.
pub fn resolve_source(raw: &str) -> SourceLink {
    let display = raw.to_string();
    let mut url = raw.to_string();

    if url.contains("api.github.com") {
        url = url
            .replace("api.github.com", "github.com")
            .replace("/blob", "/tree");
    }

    if url.contains("github.com/ensdomains/docs") {
        if let Some(path) = DOCS_PAGE.captures(&url).map(|c| c[1].to_string()) {
            let parts: Vec<&str> = path.split('/').collect();
            let tail = &parts[parts.len().saturating_sub(2)..];
            return SourceLink {
                url: format!("https://docs.ens.domains/{path}"),
                display: format!("ensdomains/docs/{}", tail.join("/")),
            };
        }
    } else if url.contains("github.com/ensdomains/ensips") {
        if let Some(number) = ENSIP_PAGE.captures(&url).map(|c| c[1].to_string()) {
            return SourceLink {
                url: format!("https://docs.ens.domains/ensip/{number}"),
                display: format!("ensdomains/ensips/{number}"),
            };
        }
    } else if url.contains("github.com/ensdomains/ens-support-docs") {
        if let Some(path) = SUPPORT_PAGE.captures(&url).map(|c| c[1].replace("core/", "")) {
            return SourceLink {
                display: format!("ensdomains/ens-support-docs/{path}"),
                url,
            };
        }
    }

    SourceLink { url, display }
}

/// Citation numbers handed out in retrieval order, one per distinct page.
#[derive(Debug, Clone, Default)]
pub struct CitationMap {
    by_url: HashMap<String, usize>,
    links: BTreeMap<usize, SourceLink>,
}

impl CitationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cite(&mut self, raw_url: &str) -> usize {
        let link = resolve_source(raw_url);
        if let Some(&number) = self.by_url.get(&link.url) {
            return number;
        }
        let number = self.links.len() + 1;
        self.by_url.insert(link.url.clone(), number);
        self.links.insert(number, link);
        number
    }

    pub fn entry(&self, number: usize) -> Option<String> {
        self.links.get(&number).map(|link| link.entry(number))
    }

    /// Every entry, in citation order.
    pub fn entries(&self) -> Vec<String> {
        self.links
            .iter()
            .map(|(number, link)| link.entry(*number))
            .collect()
    }

    /// Entries for the numbers actually cited, ascending. Unknown numbers are
    /// skipped.
    pub fn references(&self, cited: &BTreeSet<usize>) -> Vec<String> {
        cited.iter().filter_map(|n| self.entry(*n)).collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// One chunk returned by the retriever.
#[derive(Debug, Clone, Default)]
pub struct RetrievedChunk {
    pub url: Option<String>,
    pub header_path: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    pub citations: CitationMap,
    pub text: String,
}

/// Number the chunks' sources and lay the chunks out as
/// `[n] [Header: path]\ntext` lines for the prompt.
pub fn build_context(chunks: &[RetrievedChunk]) -> Context {
    let mut citations = CitationMap::new();
    let mut lines = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let number = citations.cite(chunk.url.as_deref().unwrap_or(MISSING_URL));
        match chunk.header_path.as_deref().filter(|h| !h.is_empty()) {
            Some(header) => lines.push(format!("[{number}] [Header: {header}]\n{}", chunk.text)),
            None => lines.push(format!("[{number}] {}", chunk.text)),
        }
    }

    Context {
        citations,
        text: lines.join("\n"),
    }
}

pub fn cited_numbers(text: &str) -> BTreeSet<usize> {
    CITATION
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Drop a trailing `## References` section from an earlier reply.
pub fn strip_references(text: &str) -> String {
    REFERENCES_SECTION.replace(text, "").into_owned()
}
