// ABOUTME: SubagentResult - the single record each subagent run produces.
// ABOUTME: Terminal statuses cover completion, budget, timeout, error, cancel.

use serde::{Deserialize, Serialize};

/// Terminal state of a subagent run. Failures are data, not errors; the
/// lead decides what to do with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Ok,
    BudgetExhausted,
    Timeout,
    Error,
    Cancelled,
}

/// Result from one subagent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentResult {
    /// Unique identifier for this run.
    pub id: String,

    /// The task prompt this subagent was given.
    pub task: String,

    /// How the run ended.
    pub status: SubagentStatus,

    /// The findings report (possibly partial for non-ok statuses).
    pub findings_text: String,

    /// Normalized URLs this subagent contributed to the SourceTable.
    pub sources: Vec<String>,

    /// Tool calls charged against the budget.
    pub tool_calls_made: usize,

    /// Total tokens across all LLM turns.
    pub tokens_used: u64,

    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

impl SubagentResult {
    /// Whether the run produced usable findings.
    pub fn has_findings(&self) -> bool {
        !self.findings_text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&SubagentStatus::BudgetExhausted).unwrap(),
            "\"budget_exhausted\""
        );
        assert_eq!(serde_json::to_string(&SubagentStatus::Ok).unwrap(), "\"ok\"");
    }

    #[test]
    fn test_has_findings() {
        let mut result = SubagentResult {
            id: "sub-1".into(),
            task: "t".into(),
            status: SubagentStatus::Ok,
            findings_text: "  ".into(),
            sources: vec![],
            tool_calls_made: 0,
            tokens_used: 0,
            duration_ms: 0,
        };
        assert!(!result.has_findings());
        result.findings_text = "Paris".into();
        assert!(result.has_findings());
    }
}
