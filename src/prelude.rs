// ABOUTME: Prelude module - convenient imports for common use cases.
// ABOUTME: Use `use delve::prelude::*;` to get started quickly.

pub use crate::budget::{Budget, BudgetHint, BudgetMeter};
pub use crate::citation::{CitationProcessor, CitationStats, CitedOutput};
pub use crate::config::{CitationStyle, SessionConfig};
pub use crate::error::{DelveError, ErrorKind, LlmError, ProviderError, SessionError, ToolError};
pub use crate::event::{Event, EventBus, EventKind, Subscription};
pub use crate::lead::{LeadController, SubagentDispatcher};
pub use crate::llm::{
    AnthropicClient, ChatModel, ContentBlock, Message, Request, Response, Role, StopReason,
    StreamEvent, ToolDefinition, Usage,
};
pub use crate::orchestrator::Orchestrator;
pub use crate::provider::{FetchProvider, FetchedPage, SearchHit, SearchProvider};
pub use crate::providers::{DuckDuckGoSearch, HttpFetcher};
pub use crate::session::{
    Plan, QueryType, Reflection, Round, Session, SessionStatus, TaskSpec,
};
pub use crate::source::{Source, SourceTable};
pub use crate::subagent::{SubagentResult, SubagentRunner, SubagentStatus, Transcript};
pub use crate::tool::{Invoker, Registry, Tool, ToolResult};
