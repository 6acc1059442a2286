// ABOUTME: Defines the ChatModel trait - the abstraction that lets the
// ABOUTME: orchestrator work with any tool-calling, streaming LLM provider.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::{Request, Response};
use crate::error::LlmError;

/// Event types for streaming responses.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Message creation started.
    MessageStart { id: String, model: String },

    /// A content block started.
    ContentBlockStart {
        index: usize,
        block: super::ContentBlock,
    },

    /// Delta for a content block (text content only).
    /// Text deltas should be concatenated to build the complete text.
    ContentBlockDelta { index: usize, text: String },

    /// Delta for tool input JSON arguments.
    /// These arrive after `ContentBlockStart` for a `ToolUse` block.
    /// Accumulate `partial_json` values and parse as JSON at `ContentBlockStop`.
    InputJsonDelta { index: usize, partial_json: String },

    /// A content block finished.
    ContentBlockStop { index: usize },

    /// Message metadata update.
    MessageDelta {
        stop_reason: Option<super::StopReason>,
        usage: super::Usage,
    },

    /// Message complete.
    MessageStop,
}

/// Trait for LLM client implementations.
///
/// The orchestrator sends the full message history each turn and assumes
/// no server-side session state.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Create a completion (non-streaming).
    async fn complete(&self, req: &Request) -> Result<Response, LlmError>;

    /// Create a completion with a streamed response.
    fn stream_completion(
        &self,
        req: &Request,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>;
}
