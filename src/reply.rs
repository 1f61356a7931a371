//! Shaping of model output into the text the chat backend streams back.
//!
//! The model is told to answer only from numbered sources and to say
//! `[OUT_OF_SCOPE]` otherwise. The first few chunks are held back until that
//! marker can be ruled out; after that chunks pass straight through, and the
//! reply ends with a references footer for the sources it cited.

use crate::message::{Role, WireMessage};
use crate::sources::{self, CitationMap};

pub const OUT_OF_SCOPE_MARKER: &str = "[OUT_OF_SCOPE]";

pub const OUT_OF_SCOPE_REPLY: &str = "I'm sorry, I'm not sure about that. You can reach out to the ENS team at [https://chat.ens.domains](https://chat.ens.domains)";

/// Chunks inspected for the out-of-scope marker.
const DETECTION_WINDOW: usize = 5;

const LINKS_HEADER: &str = "\n\n## Potentially Useful Links\n";
const REFERENCES_HEADER: &str = "\n\n## References\n";

const SYSTEM_PROMPT: &str = r#"
**You are an AI assistant answering questions strictly based on the provided ENS documentation sources ONLY.**
Your primary goal is accuracy based *solely* on the numbered sources below.

**CRITICAL RULES:**
1.  **DO NOT USE EXTERNAL KNOWLEDGE.** Base your entire answer *only* on the information explicitly present in the numbered sources provided in the 'SOURCES' section below.
2.  **If the answer cannot be found within the 'SOURCES' section, DO NOT MAKE ONE UP.** Instead, output *only* the exact phrase `[OUT_OF_SCOPE]` and nothing else. Your confidence must be extremely high, derived directly from the source text.
3.  **Cite sources accurately:** Use the corresponding number in square brackets immediately after the information derived from that source. Every factual statement requires a citation. Only cite sources listed below.
4.  **Format using Markdown:** Use newlines, sections, and formatting for readability. Be concise.
5.  **Do not add a 'References' section at the end.** This will be handled separately.

**EXAMPLE:**
**User:** What is ENS?
**Assistant:** ENS is a decentralized naming system for the Ethereum blockchain. [1]

**TARGET AUDIENCE (Non-Technical):**
* Keep language simple.
* When applicable, suggest using the ENS manager app (app.ens.domains) over technical methods.

---
**SOURCES:**
{context_str}
---

**Query:** {query_str}
**Answer:**
"#;

pub fn system_prompt(context: &str, query: &str) -> String {
    let (head, rest) = SYSTEM_PROMPT
        .split_once("{context_str}")
        .unwrap_or((SYSTEM_PROMPT, ""));
    let (middle, tail) = rest.split_once("{query_str}").unwrap_or((rest, ""));
    format!("{head}{context}{middle}{query}{tail}")
}

/// User and assistant turns for the model, with earlier reference footers
/// removed. System messages from the client are dropped.
pub fn prepare_history(messages: &[WireMessage]) -> Vec<WireMessage> {
    messages
        .iter()
        .filter_map(|m| match m.role {
            Role::User => Some(m.clone()),
            Role::Assistant => Some(WireMessage {
                role: Role::Assistant,
                content: sources::strip_references(&m.content),
            }),
            Role::System => None,
        })
        .collect()
}

fn numbered_list(header: &str, entries: Vec<String>) -> Vec<String> {
    if entries.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(entries.len() + 1);
    out.push(header.to_string());
    out.extend(entries.into_iter().map(|entry| entry + "\n"));
    out
}

/// The canned reply plus every retrieved source as a suggestion.
pub fn out_of_scope_reply(citations: &CitationMap) -> Vec<String> {
    let mut out = vec![OUT_OF_SCOPE_REPLY.to_string()];
    out.extend(numbered_list(LINKS_HEADER, citations.entries()));
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pending,
    Answering,
    OutOfScope,
}

#[derive(Debug)]
pub struct ReplyShaper {
    citations: CitationMap,
    seen: usize,
    held: String,
    full: String,
    verdict: Verdict,
}

impl ReplyShaper {
    pub fn new(citations: CitationMap) -> Self {
        ReplyShaper {
            citations,
            seen: 0,
            held: String::new(),
            full: String::new(),
            verdict: Verdict::Pending,
        }
    }

    pub fn is_out_of_scope(&self) -> bool {
        self.verdict == Verdict::OutOfScope
    }

    /// Feed one model chunk; returns what should be streamed out now.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        match self.verdict {
            Verdict::OutOfScope => Vec::new(),
            Verdict::Answering => {
                self.full.push_str(chunk);
                vec![chunk.to_string()]
            }
            Verdict::Pending => {
                self.seen += 1;
                self.full.push_str(chunk);
                if self.seen <= DETECTION_WINDOW {
                    self.held.push_str(chunk);
                    if self.held.contains(OUT_OF_SCOPE_MARKER) {
                        tracing::info!("Model reported the question as out of scope");
                        self.verdict = Verdict::OutOfScope;
                        self.held.clear();
                        return out_of_scope_reply(&self.citations);
                    }
                    return Vec::new();
                }
                self.verdict = Verdict::Answering;
                vec![std::mem::take(&mut self.held), chunk.to_string()]
            }
        }
    }

    /// End of model output: release anything still held back and append the
    /// references footer.
    pub fn finish(mut self) -> Vec<String> {
        if self.verdict == Verdict::OutOfScope {
            return Vec::new();
        }

        let mut out = Vec::new();
        if !self.held.is_empty() {
            out.push(std::mem::take(&mut self.held));
        }
        let cited = sources::cited_numbers(&self.full);
        out.extend(numbered_list(
            REFERENCES_HEADER,
            self.citations.references(&cited),
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{build_context, RetrievedChunk};

    fn citations() -> CitationMap {
        build_context(&[
            RetrievedChunk {
                url: Some("https://github.com/ensdomains/ensips/blob/master/ensips/1.md".to_string()),
                header_path: None,
                text: "ENS is a naming system.".to_string(),
            },
            RetrievedChunk {
                url: Some("https://example.com/registrar".to_string()),
                header_path: None,
                text: "Names are rented yearly.".to_string(),
            },
        ])
        .citations
    }

    fn run(shaper: &mut ReplyShaper, chunks: &[&str]) -> Vec<String> {
        chunks.iter().flat_map(|c| shaper.push(c)).collect()
    }

    #[test]
    fn test_marker_in_first_chunks_gives_canned_reply() {
        let mut shaper = ReplyShaper::new(citations());
        let mut out = run(&mut shaper, &["[OUT", "_OF_", "SCOPE]"]);
        out.extend(run(&mut shaper, &["ignored"]));
        out.extend(shaper.finish());

        assert_eq!(
            out.concat(),
            format!(
                "{OUT_OF_SCOPE_REPLY}\n\n## Potentially Useful Links\n\
                 [1] [ensdomains/ensips/1](https://docs.ens.domains/ensip/1)\n\
                 [2] [https://example.com/registrar](https://example.com/registrar)\n"
            )
        );
    }

    #[test]
    fn test_marker_after_window_is_passed_through() {
        let mut shaper = ReplyShaper::new(CitationMap::new());
        let out = run(&mut shaper, &["a", "b", "c", "d", "e", "f", "[OUT_OF_SCOPE]"]);
        assert!(!shaper.is_out_of_scope());
        assert_eq!(out.concat(), "abcdef[OUT_OF_SCOPE]");
    }

    #[test]
    fn test_references_list_only_cited_sources() {
        let mut shaper = ReplyShaper::new(citations());
        let chunks = ["Names ", "are ", "rented ", "yearly ", "[2]", ". ", "Done."];
        let mut out = run(&mut shaper, &chunks);
        out.extend(shaper.finish());

        assert_eq!(
            out.concat(),
            "Names are rented yearly [2]. Done.\n\n## References\n\
             [2] [https://example.com/registrar](https://example.com/registrar)\n"
        );
    }

    #[test]
    fn test_short_answer_is_flushed_on_finish() {
        let mut shaper = ReplyShaper::new(citations());
        let out = run(&mut shaper, &["ENS is ", "a naming system. [1]"]);
        assert!(out.is_empty());

        let tail = shaper.finish();
        assert_eq!(
            tail.concat(),
            "ENS is a naming system. [1]\n\n## References\n\
             [1] [ensdomains/ensips/1](https://docs.ens.domains/ensip/1)\n"
        );
    }

    #[test]
    fn test_no_citations_no_footer() {
        let mut shaper = ReplyShaper::new(citations());
        run(&mut shaper, &["Hello [7]"]);
        assert_eq!(shaper.finish(), vec!["Hello [7]".to_string()]);
    }

    #[test]
    fn test_empty_retrieval_reply_has_no_links_section() {
        assert_eq!(
            out_of_scope_reply(&CitationMap::new()),
            vec![OUT_OF_SCOPE_REPLY.to_string()]
        );
    }

    #[test]
    fn test_system_prompt_fills_placeholders() {
        let prompt = system_prompt("[1] ENS is a naming system.", "What is ENS?");
        assert!(prompt.contains("**SOURCES:**\n[1] ENS is a naming system.\n---"));
        assert!(prompt.contains("**Query:** What is ENS?\n**Answer:**"));
        assert!(!prompt.contains("{context_str}"));
        assert!(!prompt.contains("{query_str}"));
    }

    #[test]
    fn test_query_text_is_not_reinterpreted() {
        let prompt = system_prompt("ctx {query_str}", "q");
        assert!(prompt.contains("ctx {query_str}"));
    }

    #[test]
    fn test_history_drops_reference_footers() {
        let history = prepare_history(&[
            WireMessage {
                role: Role::System,
                content: "ignored".to_string(),
            },
            WireMessage {
                role: Role::User,
                content: "What is ENS?".to_string(),
            },
            WireMessage {
                role: Role::Assistant,
                content: "A naming system. [1]\n\n## References\n[1] [a](b)\n".to_string(),
            },
        ]);

        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "A naming system. [1]");
    }
}
