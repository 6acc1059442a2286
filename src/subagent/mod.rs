// ABOUTME: Subagent module - autonomous research workers.
// ABOUTME: Transcript, terminal result types, and the OODA-loop runner.

mod result;
mod runner;
mod transcript;

pub use result::{SubagentResult, SubagentStatus};
pub use runner::{subagent_id, SubagentRunner};
pub use transcript::{estimate_tokens, Transcript};
