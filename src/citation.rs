// ABOUTME: Citation processor - inserts anchors into the draft via the LLM.
// ABOUTME: Enforces the prose-identity invariant mechanically; degrades on failure.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{CitationStyle, SessionConfig};
use crate::event::{EventBus, EventKind};
use crate::lead::prompts;
use crate::llm::{ChatModel, Message, Request};
use crate::source::Source;
use crate::subagent::estimate_tokens;

/// Anchor-placement statistics for one cited output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationStats {
    pub total_anchors: usize,
    pub unique_anchors: usize,
    pub uncited_sources: usize,
}

/// The draft with citation anchors inserted.
///
/// `body` is character-identical to the draft outside the anchor spans;
/// the mechanically generated references section is kept separate so the
/// invariant stays checkable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitedOutput {
    pub body: String,
    pub references: String,
    pub style: CitationStyle,
    pub stats: CitationStats,
    /// True when the identity invariant failed twice and the uncited
    /// draft was emitted instead.
    pub degraded: bool,
}

impl CitedOutput {
    /// Body plus references as one document.
    pub fn text(&self) -> String {
        if self.references.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\n{}", self.body, self.references)
        }
    }
}

/// Regex matching this style's anchors.
fn anchor_regex(style: CitationStyle) -> Regex {
    match style {
        CitationStyle::Numeric => Regex::new(r"\[(\d+)\]").unwrap(),
        CitationStyle::Footnote => Regex::new(r"\[\^(\d+)\]").unwrap(),
    }
}

/// Remove all anchors from a candidate, for byte comparison with the draft.
pub fn strip_anchors(text: &str, style: CitationStyle) -> String {
    anchor_regex(style).replace_all(text, "").into_owned()
}

/// Anchor indices appearing in a text, in order of appearance.
fn anchor_indices(text: &str, style: CitationStyle) -> Vec<usize> {
    anchor_regex(style)
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Build the mechanical references section from the source table snapshot.
fn references_section(sources: &[Source], style: CitationStyle) -> String {
    if sources.is_empty() {
        return String::new();
    }
    let mut lines = vec!["## References".to_string(), String::new()];
    for (i, source) in sources.iter().enumerate() {
        let marker = match style {
            CitationStyle::Numeric => format!("[{}]", i + 1),
            CitationStyle::Footnote => format!("[^{}]", i + 1),
        };
        if source.title.is_empty() {
            lines.push(format!("{}: {}", marker, source.url));
        } else {
            lines.push(format!("{}: [{}]({})", marker, source.title, source.url));
        }
    }
    lines.join("\n")
}

/// Strip wrapper tags and preamble the model sometimes adds around the
/// cited text.
fn clean_candidate(raw: &str) -> String {
    let mut text = raw;
    if let Some(start) = text.find("<exact_text_with_citation>") {
        text = &text[start + "<exact_text_with_citation>".len()..];
    }
    if let Some(end) = text.find("</exact_text_with_citation>") {
        text = &text[..end];
    }
    text.trim_matches('\n').to_string()
}

/// Inserts citation anchors against substantive claims in the draft.
///
/// Which claims deserve anchors is the LLM's judgment; this type only
/// enforces that the prose is untouched, retrying once with a stricter
/// prompt and falling back to the uncited draft after a second failure.
pub struct CitationProcessor {
    model: Arc<dyn ChatModel>,
    config: Arc<SessionConfig>,
    bus: EventBus,
}

impl CitationProcessor {
    pub fn new(model: Arc<dyn ChatModel>, config: Arc<SessionConfig>, bus: EventBus) -> Self {
        Self { model, config, bus }
    }

    /// Produce the cited output for a draft.
    pub async fn cite(&self, draft: &str, sources: &[Source]) -> CitedOutput {
        let style = self.config.citation_style;

        if sources.is_empty() {
            let output = CitedOutput {
                body: draft.to_string(),
                references: String::new(),
                style,
                stats: CitationStats::default(),
                degraded: false,
            };
            self.publish_complete(&output);
            return output;
        }

        for attempt in 0..2 {
            let strict = attempt > 0;
            match self.request_citations(draft, sources, style, strict).await {
                Ok(candidate) => match self.validate(draft, &candidate, sources.len(), style) {
                    Ok(()) => {
                        let output = self.assemble(candidate, sources, style, false);
                        self.publish_complete(&output);
                        return output;
                    }
                    Err(reason) => {
                        warn!(attempt, reason, "citation candidate rejected");
                    }
                },
                Err(e) => {
                    warn!(attempt, error = %e, "citation LLM call failed");
                }
            }
        }

        // Identity could not be preserved; emit the uncited draft with a
        // mechanical references section.
        self.bus.publish(
            None,
            EventKind::CitationDegraded {
                reason: "citation identity invariant failed twice".into(),
            },
        );
        self.assemble(draft.to_string(), sources, style, true)
    }

    async fn request_citations(
        &self,
        draft: &str,
        sources: &[Source],
        style: CitationStyle,
        strict: bool,
    ) -> Result<String, crate::error::LlmError> {
        let prompt = prompts::citation_prompt(draft, sources, style, strict);
        let max_tokens = (estimate_tokens(draft) + 1024).min(16_384) as u32;
        let request = Request::new(&self.config.citation_model)
            .message(Message::user(prompt))
            .temperature(0.1)
            .max_tokens(max_tokens);

        let response = self.model.complete(&request).await?;
        Ok(clean_candidate(&response.text()))
    }

    fn validate(
        &self,
        draft: &str,
        candidate: &str,
        source_count: usize,
        style: CitationStyle,
    ) -> Result<(), &'static str> {
        if strip_anchors(candidate, style) != draft {
            return Err("prose differs from draft outside anchor spans");
        }
        let out_of_range = anchor_indices(candidate, style)
            .into_iter()
            .any(|i| i == 0 || i > source_count);
        if out_of_range {
            return Err("anchor index outside the source table range");
        }
        Ok(())
    }

    fn assemble(
        &self,
        body: String,
        sources: &[Source],
        style: CitationStyle,
        degraded: bool,
    ) -> CitedOutput {
        let indices = anchor_indices(&body, style);
        let unique: HashSet<usize> = indices.iter().copied().collect();
        let stats = CitationStats {
            total_anchors: indices.len(),
            unique_anchors: unique.len(),
            uncited_sources: (1..=sources.len()).filter(|i| !unique.contains(i)).count(),
        };
        CitedOutput {
            body,
            references: references_section(sources, style),
            style,
            stats,
            degraded,
        }
    }

    fn publish_complete(&self, output: &CitedOutput) {
        info!(
            anchors = output.stats.total_anchors,
            unique = output.stats.unique_anchors,
            uncited = output.stats.uncited_sources,
            "citation pass complete"
        );
        self.bus.publish(
            None,
            EventKind::CitationComplete {
                total_anchors: output.stats.total_anchors,
                unique_anchors: output.stats.unique_anchors,
                uncited_sources: output.stats.uncited_sources,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn source(url: &str, title: &str) -> Source {
        Source {
            url: url.into(),
            title: title.into(),
            snippet: String::new(),
            first_seen_by: "sub-1".into(),
            first_seen_at: Utc::now(),
        }
    }

    #[test]
    fn test_strip_footnote_anchors() {
        let cited = "Paris is the capital of France[^1]. It has 2.1M people[^2].";
        let stripped = strip_anchors(cited, CitationStyle::Footnote);
        assert_eq!(stripped, "Paris is the capital of France. It has 2.1M people.");
    }

    #[test]
    fn test_strip_numeric_anchors() {
        let cited = "Revenue grew 12%[1] in Q3[2].";
        assert_eq!(strip_anchors(cited, CitationStyle::Numeric), "Revenue grew 12% in Q3.");
    }

    #[test]
    fn test_footnote_strip_leaves_plain_brackets() {
        let text = "See [2023] report[^1].";
        assert_eq!(strip_anchors(text, CitationStyle::Footnote), "See [2023] report.");
    }

    #[test]
    fn test_anchor_indices() {
        let cited = "a[^2] b[^1] c[^2]";
        assert_eq!(anchor_indices(cited, CitationStyle::Footnote), vec![2, 1, 2]);
    }

    #[test]
    fn test_references_section() {
        let sources = vec![
            source("https://a.example", "A Title"),
            source("https://b.example", ""),
        ];
        let refs = references_section(&sources, CitationStyle::Footnote);
        assert!(refs.starts_with("## References"));
        assert!(refs.contains("[^1]: [A Title](https://a.example)"));
        assert!(refs.contains("[^2]: https://b.example"));
    }

    #[test]
    fn test_clean_candidate_unwraps_tags() {
        let raw = "Let me add citations.\n<exact_text_with_citation>Paris[^1].</exact_text_with_citation>";
        assert_eq!(clean_candidate(raw), "Paris[^1].");
        assert_eq!(clean_candidate("Plain text."), "Plain text.");
    }

    #[test]
    fn test_cited_output_text_joins_references() {
        let output = CitedOutput {
            body: "Body[^1].".into(),
            references: "## References\n\n[^1]: https://a.example".into(),
            style: CitationStyle::Footnote,
            stats: CitationStats::default(),
            degraded: false,
        };
        let text = output.text();
        assert!(text.starts_with("Body[^1]."));
        assert!(text.ends_with("[^1]: https://a.example"));
    }
}
