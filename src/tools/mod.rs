// ABOUTME: Built-in tools exposed to research agents.
// ABOUTME: Web search/fetch, the terminal complete_task, and lead-only run_subagents.

mod complete_task;
mod recorder;
mod run_subagents;
mod web_fetch;
mod web_search;

pub use complete_task::CompleteTaskTool;
pub use recorder::SourceRecorder;
pub use run_subagents::RunSubagentsTool;
pub use web_fetch::WebFetchTool;
pub use web_search::WebSearchTool;
