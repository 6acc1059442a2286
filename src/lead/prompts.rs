// ABOUTME: Prompt templates for the lead, subagents, and the citation pass.
// ABOUTME: Condensed instructions; query-type guidance tunes planning defaults.

use crate::config::CitationStyle;
use crate::session::QueryType;
use crate::source::Source;

/// Injected when a budget or deadline trips mid-run.
pub const FINALIZE_NOW: &str = "Budget exhausted - finalize now. Call complete_task immediately \
with your best report from the findings you already have. Do not make any more tool calls.";

/// Injected once when the soft token budget crosses 80%.
pub const TOKEN_PRESSURE: &str = "You have used most of your token budget. Summarize what you \
have learned so far, then continue concisely and finish soon.";

/// Synthetic tool error for a completion attempt with zero searches.
pub const SEARCH_FLOOR: &str = "At least one web_search is required before completing this task. \
Search first, or set no_search_needed to true only if the task genuinely needs no research.";

/// Nudge for a turn that produced prose but no tool call.
pub const CONTINUE_OR_COMPLETE: &str = "Continue your research using the available tools, or \
call complete_task with your full report if you are done.";

/// Nudge for a lead that keeps answering in prose instead of delegating.
pub const DELEGATE_FIRST: &str = "Use the run_subagents tool to delegate research before \
answering, or call complete_task with your final report if research is already sufficient.";

/// Redirect after too many stray lead tool calls in one round.
pub const REDIRECT_TO_SUBAGENTS: &str = "Stop making direct tool calls. Dispatch your research \
plan now with a single run_subagents call.";

/// System prompt for one research subagent.
pub fn subagent_system(tool_call_budget: usize) -> String {
    format!(
        "You are a research subagent working as part of a team. Execute your assigned task \
using the available tools and report detailed findings to the lead researcher.\n\n\
Process:\n\
1. Plan a short research approach before your first tool call.\n\
2. Use web_search to find promising sources, then web_fetch to read the best ones in full.\n\
3. Run independent tool calls in parallel in a single turn when possible.\n\
4. Adapt queries based on results; never repeat the exact same query.\n\
5. Stop at diminishing returns and call complete_task with a detailed report.\n\n\
Guidelines:\n\
- Keep search queries short and moderately broad; refine based on result quality.\n\
- Prefer significant, precise, recent, high-quality information.\n\
- Distinguish facts from speculation and flag conflicting information.\n\
- Record source titles and URLs so the lead can cite them.\n\n\
You have a budget of {} tool calls. Finish before it runs out: call complete_task with \
everything you found, even if incomplete.",
        tool_call_budget
    )
}

/// Prompt asking the lead model to classify the query.
pub fn classify_prompt(query: &str) -> String {
    format!(
        "Analyze this research query and classify it.\n\n\
Query: {}\n\n\
Classify the query type as one of:\n\
- \"depth_first\": requires multiple perspectives on the same issue; benefits from \
parallel agents exploring different viewpoints or methodologies.\n\
- \"breadth_first\": breaks into distinct, independent sub-questions; benefits from \
parallel agents each handling a separate sub-topic.\n\
- \"straightforward\": focused and well-defined; a single focused investigation suffices.\n\n\
Respond with JSON only:\n\
{{\"query_type\": \"...\", \"rationale\": \"...\"}}",
        query
    )
}

/// System prompt for the lead controller.
pub fn lead_system() -> String {
    "You are an expert research lead. You plan research, delegate to parallel subagents, \
reflect on their findings, and write the final report.\n\n\
Rules:\n\
- Delegate all substantial information gathering with the run_subagents tool. Each task \
string must be a complete, self-contained assignment: one core objective, the specific \
facts to find, and the expected output format.\n\
- Avoid overlap between tasks; every subagent gets a clearly separate assignment.\n\
- After results arrive, identify gaps or conflicts and dispatch another round only when \
it will materially improve the answer.\n\
- When the findings are sufficient, call complete_task with the full report in Markdown. \
Write the report yourself; integrate findings from all subagents and keep factual accuracy. \
Do not include citations; they are added in a separate pass.\n\
- Stop at diminishing returns. Fewer, more capable subagents beat many narrow ones."
        .to_string()
}

/// Planning guidance block for a query type.
pub fn query_type_guidance(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::DepthFirst => {
            "This is a depth-first query: define 2-5 distinct methodological approaches or \
perspectives on the same core question, one subagent each, and plan how their findings \
will be synthesized."
        }
        QueryType::BreadthFirst => {
            "This is a breadth-first query: enumerate the distinct, independent sub-questions, \
one subagent each, with crisp boundaries so the tasks do not overlap."
        }
        QueryType::Straightforward => {
            "This is a straightforward query: dispatch a single comprehensive subagent with \
clear fact-finding and verification instructions."
        }
    }
}

/// The first user message the lead sees for a query.
pub fn lead_plan_prompt(query: &str, query_type: QueryType, default_tasks: usize) -> String {
    format!(
        "Research this query: {}\n\n\
{}\n\n\
Suggested number of subagents: {}. Create your research plan and dispatch it with one \
run_subagents call.",
        query,
        query_type_guidance(query_type),
        default_tasks
    )
}

/// User message carrying one round's aggregated results back to the lead.
pub fn reflection_prompt(results_summary: &str, source_summary: &str) -> String {
    format!(
        "All subagents have finished. Their findings:\n\n{}\n\n\
Sources gathered so far:\n{}\n\n\
Reflect: are there important gaps, conflicts, or missing perspectives? If yes, dispatch \
another run_subagents round targeting exactly those gaps. If the findings are sufficient, \
call complete_task with the final report.",
        results_summary,
        if source_summary.is_empty() { "(none)" } else { source_summary }
    )
}

/// Final forced-synthesis instruction; tools are disabled for this turn.
pub const SYNTHESIZE_NOW: &str = "Research is over. Using everything gathered above, write \
the final report now, directly answering the original query in Markdown. Do not include \
citations. Respond with the report text only.";

/// Prompt for the citation pass.
pub fn citation_prompt(
    draft: &str,
    sources: &[Source],
    style: CitationStyle,
    strict: bool,
) -> String {
    let anchor_example = match style {
        CitationStyle::Numeric => "[1], [2]",
        CitationStyle::Footnote => "[^1], [^2]",
    };
    let sources_block = sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            if s.title.is_empty() {
                format!("[{}] {}", i + 1, s.url)
            } else {
                format!("[{}] {} - {}", i + 1, s.title, s.url)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let strict_block = if strict {
        "\n\nYour previous attempt modified the text. This time, copy the report EXACTLY \
character for character, inserting only anchor tokens. Any other change will be rejected."
    } else {
        ""
    };

    format!(
        "You are adding citations to a research report. The report is inside \
<synthesized_text> tags; the numbered sources it was generated from are inside <sources> tags.\n\n\
<synthesized_text>\n{}\n</synthesized_text>\n\n<sources>\n{}\n</sources>\n\n\
Rules:\n\
- Do NOT modify the text in any way: no wording, whitespace, or punctuation changes. \
Only insert citation anchors in the form {}.\n\
- Cite substantive factual claims: numbers, named entities, dated events, quotes. \
Do not cite background or transitional prose.\n\
- Prefer one anchor at the end of a sentence; never repeat the same source twice in \
one sentence.\n\
- Only cite a source that directly supports the claim.\n\n\
Output the report with anchors inserted inside <exact_text_with_citation> tags and \
nothing else after the closing tag.{}",
        draft, sources_block, anchor_example, strict_block
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_subagent_system_mentions_budget() {
        let prompt = subagent_system(7);
        assert!(prompt.contains("budget of 7 tool calls"));
    }

    #[test]
    fn test_classify_prompt_lists_types() {
        let prompt = classify_prompt("why is the sky blue");
        assert!(prompt.contains("depth_first"));
        assert!(prompt.contains("breadth_first"));
        assert!(prompt.contains("straightforward"));
        assert!(prompt.contains("why is the sky blue"));
    }

    #[test]
    fn test_citation_prompt_numbers_sources() {
        let sources = vec![Source {
            url: "https://a.example".into(),
            title: "A".into(),
            snippet: String::new(),
            first_seen_by: "sub-1".into(),
            first_seen_at: Utc::now(),
        }];
        let prompt = citation_prompt("The draft.", &sources, CitationStyle::Footnote, false);
        assert!(prompt.contains("[1] A - https://a.example"));
        assert!(prompt.contains("[^1], [^2]"));
        assert!(!prompt.contains("EXACTLY"));

        let strict = citation_prompt("The draft.", &sources, CitationStyle::Footnote, true);
        assert!(strict.contains("EXACTLY"));
    }
}
