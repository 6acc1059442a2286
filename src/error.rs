// ABOUTME: Defines all error types for the delve library using thiserror.
// ABOUTME: Each subsystem has its own error enum, unified under DelveError.

use serde::{Deserialize, Serialize};

/// Top-level error type for the delve library.
#[derive(Debug, thiserror::Error)]
pub enum DelveError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Errors from ChatModel client operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Stream closed unexpectedly")]
    StreamClosed,

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("LLM call timed out after {0}s")]
    Timeout(u64),
}

impl LlmError {
    /// Whether a fresh attempt at the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect(),
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::StreamClosed | LlmError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Errors from tool operations.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Execution failed: {0}")]
    Execution(#[source] anyhow::Error),
}

/// Errors from search/fetch providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Rate limited{}", retry_hint(.retry_after_ms))]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("HTTP error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Transient failures are retried with backoff; permanent ones surface
    /// to the agent as tool errors.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Unavailable(_)
                | ProviderError::Network(_)
                | ProviderError::Http { status: 500..=599, .. }
        )
    }
}

fn retry_hint(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(" (retry after {}ms)", ms),
        None => String::new(),
    }
}

/// Errors that fail an entire research session.
///
/// Subagent failures never reach this level; only an unreachable ChatModel
/// or a deadline expiry before any draft exists are user-visible failures.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("ChatModel unavailable: {0}")]
    LlmUnavailable(#[source] LlmError),

    #[error("Session deadline expired before a draft could be produced")]
    DeadlineExpired,

    #[error("Invalid session configuration: {0}")]
    Configuration(String),
}

/// Classification of tool-visible failures.
///
/// Failed tool calls are returned to the calling agent as structured
/// `{error_kind, message}` objects, never as exceptions; this enum is the
/// `error_kind` discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network error, rate limit, provider 5xx. Retried before surfacing.
    Transient,
    /// Malformed response, 4xx. Counts against budget.
    Permanent,
    /// Tool-call, token, or deadline budget tripped.
    BudgetExceeded,
    /// The run's cancellation signal fired.
    Cancelled,
    /// Arguments failed schema validation.
    InvalidArguments,
    /// Identical search query already issued by this agent.
    DuplicateQuery,
    /// The named tool is not registered or not allowed.
    UnknownTool,
    /// Tool call exceeded its per-call deadline.
    Timeout,
}
