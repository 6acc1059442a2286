// ABOUTME: Defines the ToolResult type - a unified structure for tool
// ABOUTME: execution outcomes with content, error state, and metadata.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::ErrorKind;

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// The output content.
    pub content: String,

    /// Whether this result represents an error.
    pub is_error: bool,

    /// Optional metadata about the execution.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    /// Create a successful text result.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            metadata: HashMap::new(),
        }
    }

    /// Create an error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
            metadata: HashMap::new(),
        }
    }

    /// Create a classified error result whose content is a structured
    /// `{error_kind, message}` object, observable to the calling agent.
    pub fn classified_error(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let content = serde_json::json!({
            "error_kind": kind,
            "message": message,
        })
        .to_string();
        Self {
            content,
            is_error: true,
            metadata: HashMap::new(),
        }
        .with_metadata("error_kind", kind)
    }

    /// Add metadata to the result.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), v);
        }
        self
    }

    /// The error kind attached to this result, if classified.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.metadata
            .get("error_kind")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl Default for ToolResult {
    fn default() -> Self {
        Self::text("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_result() {
        let result = ToolResult::text("hello");
        assert!(!result.is_error);
        assert_eq!(result.content, "hello");
        assert!(result.error_kind().is_none());
    }

    #[test]
    fn test_classified_error_is_structured() {
        let result = ToolResult::classified_error(ErrorKind::Transient, "connection reset");
        assert!(result.is_error);
        assert_eq!(result.error_kind(), Some(ErrorKind::Transient));

        let parsed: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(parsed["error_kind"], "transient");
        assert_eq!(parsed["message"], "connection reset");
    }

    #[test]
    fn test_with_metadata() {
        let result = ToolResult::text("ok").with_metadata("source_count", 3);
        assert_eq!(result.metadata["source_count"], 3);
    }
}
