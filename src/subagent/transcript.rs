// ABOUTME: Append-only transcript for one agent run, with an LLM-visible window.
// ABOUTME: Old tool results are summarized in the window, never in the audit log.

use serde::{Deserialize, Serialize};

use crate::llm::{ContentBlock, Message};

/// Rough token estimate: four characters per token.
///
/// Exact counts arrive with `Usage` after each call; this estimate only
/// sizes the visible window before a call is made.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

const SUMMARY_KEEP_CHARS: usize = 400;

/// Append-only ordered log of one agent's conversation.
///
/// The audit log keeps every message verbatim. The LLM-visible window is
/// derived on demand: when the estimated token count exceeds the cap, the
/// oldest tool results are replaced by truncated summaries until the window
/// fits. No entry is ever removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
    context_token_cap: usize,
}

impl Transcript {
    /// Create an empty transcript with the given window cap.
    pub fn new(context_token_cap: usize) -> Self {
        Self {
            messages: Vec::new(),
            context_token_cap,
        }
    }

    /// Append a message. Entries are never mutated or removed.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The full audit log.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages in the audit log.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Estimated token size of the full log.
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(message_tokens).sum()
    }

    /// The LLM-visible window.
    ///
    /// Identical to the audit log while it fits the cap. When it does not,
    /// tool results are summarized oldest-first until it does; the most
    /// recent tool result is always left intact.
    pub fn visible(&self) -> Vec<Message> {
        if self.estimated_tokens() <= self.context_token_cap {
            return self.messages.clone();
        }

        let mut window = self.messages.clone();
        let last_tool_result_idx = window
            .iter()
            .rposition(|m| m.content.iter().any(is_tool_result));

        let mut total = self.estimated_tokens();
        for (idx, message) in window.iter_mut().enumerate() {
            if total <= self.context_token_cap {
                break;
            }
            if Some(idx) == last_tool_result_idx {
                continue;
            }
            for block in message.content.iter_mut() {
                if let ContentBlock::ToolResult { content, .. } = block {
                    if content.len() > SUMMARY_KEEP_CHARS {
                        let saved = estimate_tokens(content) - SUMMARY_KEEP_CHARS / 4;
                        *content = summarize(content);
                        total = total.saturating_sub(saved);
                    }
                }
            }
        }

        window
    }
}

fn is_tool_result(block: &ContentBlock) -> bool {
    matches!(block, ContentBlock::ToolResult { .. })
}

fn message_tokens(message: &Message) -> usize {
    message
        .content
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => estimate_tokens(text),
            ContentBlock::ToolUse { input, .. } => estimate_tokens(&input.to_string()),
            ContentBlock::ToolResult { content, .. } => estimate_tokens(content),
        })
        .sum()
}

fn summarize(content: &str) -> String {
    let cut = content
        .char_indices()
        .take_while(|(i, _)| *i < SUMMARY_KEEP_CHARS)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(content.len());
    format!(
        "{}\n[earlier tool result summarized; {} characters omitted]",
        &content[..cut],
        content.len().saturating_sub(cut)
    )
}
