// ABOUTME: Utility that folds StreamEvents into a finalized Response.
// ABOUTME: Handles text deltas, tool use JSON fragments, usage, and stop reason.

use super::{ContentBlock, Response, StopReason, StreamEvent, Usage};

/// Accumulates streaming events into a finalized [`Response`].
///
/// Feed events via [`handle_event`](Self::handle_event) and call
/// [`into_response`](Self::into_response) once the stream ends.
pub struct StreamAccumulator {
    message_id: String,
    model: String,
    content_blocks: Vec<ContentBlock>,
    current_text: String,
    current_tool_id: String,
    current_tool_name: String,
    current_tool_input: String,
    usage: Usage,
    stop_reason: Option<StopReason>,
}

impl StreamAccumulator {
    /// Create a new empty accumulator.
    pub fn new() -> Self {
        Self {
            message_id: String::new(),
            model: String::new(),
            content_blocks: Vec::new(),
            current_text: String::new(),
            current_tool_id: String::new(),
            current_tool_name: String::new(),
            current_tool_input: String::new(),
            usage: Usage::default(),
            stop_reason: None,
        }
    }

    /// Process a single stream event.
    pub fn handle_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::MessageStart { id, model } => {
                self.message_id = id.clone();
                self.model = model.clone();
            }
            StreamEvent::ContentBlockStart { block, .. } => match block {
                ContentBlock::Text { .. } => {
                    self.current_text = String::new();
                }
                ContentBlock::ToolUse { id, name, .. } => {
                    self.current_tool_id = id.clone();
                    self.current_tool_name = name.clone();
                    self.current_tool_input = String::new();
                }
                _ => {}
            },
            StreamEvent::ContentBlockDelta { text, .. } => {
                self.current_text.push_str(text);
            }
            StreamEvent::InputJsonDelta { partial_json, .. } => {
                self.current_tool_input.push_str(partial_json);
            }
            StreamEvent::ContentBlockStop { .. } => {
                if !self.current_tool_id.is_empty() {
                    // Finalize tool use block
                    let input = serde_json::from_str(&self.current_tool_input)
                        .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
                    self.content_blocks.push(ContentBlock::ToolUse {
                        id: std::mem::take(&mut self.current_tool_id),
                        name: std::mem::take(&mut self.current_tool_name),
                        input,
                    });
                    self.current_tool_input.clear();
                } else if !self.current_text.is_empty() {
                    // Finalize text block
                    self.content_blocks
                        .push(ContentBlock::text(std::mem::take(&mut self.current_text)));
                }
            }
            StreamEvent::MessageDelta { stop_reason, usage } => {
                if stop_reason.is_some() {
                    self.stop_reason = *stop_reason;
                }
                self.usage.add(usage);
            }
            StreamEvent::MessageStop => {}
        }
    }

    /// Returns true if the accumulator is currently inside a tool use block.
    pub fn in_tool_use(&self) -> bool {
        !self.current_tool_id.is_empty()
    }

    /// Usage reported so far.
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Consume the accumulator and return the assembled response.
    ///
    /// An unreported stop reason defaults to `EndTurn` unless tool use
    /// blocks are present.
    pub fn into_response(self) -> Response {
        let stop_reason = self.stop_reason.unwrap_or({
            if self
                .content_blocks
                .iter()
                .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
            {
                StopReason::ToolUse
            } else {
                StopReason::EndTurn
            }
        });
        Response {
            id: self.message_id,
            content: self.content_blocks,
            stop_reason,
            model: self.model,
            usage: self.usage,
        }
    }
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
