// ABOUTME: Per-run session state - plans, rounds, transcripts, draft, cited output.
// ABOUTME: Serializable as a versioned record; snapshot accessors for observers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::BudgetHint;
use crate::citation::CitedOutput;
use crate::config::SessionConfig;
use crate::source::Source;
use crate::subagent::{SubagentResult, SubagentStatus, Transcript};

/// Version tag for persisted session records.
pub const SESSION_RECORD_VERSION: u32 = 1;

/// Advisory classification of the user's query. Affects only the default
/// subagent count and prompt template, never correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    DepthFirst,
    BreadthFirst,
    Straightforward,
}

/// One self-contained research assignment for a single subagent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// The full task prompt handed to the subagent.
    pub prompt: String,

    /// Optional effort hint; inferred from the prompt when absent.
    pub budget_hint: Option<BudgetHint>,
}

impl TaskSpec {
    /// Create a task with no explicit hint.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            budget_hint: None,
        }
    }

    /// The hint to use, falling back to keyword inference over the prompt.
    pub fn effective_hint(&self) -> BudgetHint {
        if let Some(hint) = self.budget_hint {
            return hint;
        }
        let lower = self.prompt.to_lowercase();
        if ["comprehensive", "detailed", "complete", "thorough", "all "]
            .iter()
            .any(|w| lower.contains(w))
        {
            BudgetHint::Heavy
        } else if ["compare", "analyze", "evaluate", "multiple"]
            .iter()
            .any(|w| lower.contains(w))
        {
            BudgetHint::Medium
        } else {
            BudgetHint::Light
        }
    }
}

/// The lead's plan for one round. Replaced, never mutated, between rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub query_type: QueryType,
    pub rationale: String,
    pub tasks: Vec<TaskSpec>,
}

/// What the lead decided after seeing a round's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reflection {
    /// Another round was dispatched.
    Continue,
    /// The lead moved to synthesis.
    Synthesize,
}

/// One lead iteration: a plan, its dispatch results, and the reflection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub round_index: usize,
    pub plan: Plan,
    pub results: Vec<SubagentResult>,
    pub reflection: Reflection,
}

/// How the session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Cancelled,
    Failed { message: String },
}

/// A task that did not finish with `ok`, surfaced in result metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTask {
    pub subagent_id: String,
    pub task: String,
    pub status: SubagentStatus,
}

/// The complete record of one research run.
///
/// Owned by the orchestrator while running; every field is plain data so
/// the whole session serializes for persistence drivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub query: String,
    pub config: SessionConfig,
    pub query_type: Option<QueryType>,
    pub rounds: Vec<Round>,
    /// Audit transcripts keyed by subagent id. Subagents never see each
    /// other's entries; isolation is structural.
    pub transcripts: BTreeMap<String, Transcript>,
    pub sources: Vec<Source>,
    pub draft: Option<String>,
    pub cited: Option<CitedOutput>,
    pub status: SessionStatus,
    pub failed_tasks: Vec<FailedTask>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a fresh session for a query.
    pub fn new(id: impl Into<String>, query: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            config,
            query_type: None,
            rounds: Vec::new(),
            transcripts: BTreeMap::new(),
            sources: Vec::new(),
            draft: None,
            cited: None,
            status: SessionStatus::Running,
            failed_tasks: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Number of rounds executed so far.
    pub fn rounds_executed(&self) -> usize {
        self.rounds.len()
    }

    /// Record a finished round and collect its failures into metadata.
    pub fn record_round(&mut self, round: Round) {
        for result in &round.results {
            if result.status != SubagentStatus::Ok {
                self.failed_tasks.push(FailedTask {
                    subagent_id: result.id.clone(),
                    task: result.task.clone(),
                    status: result.status,
                });
            }
        }
        self.rounds.push(round);
    }

    /// All findings text gathered across rounds, dispatch order preserved.
    pub fn all_findings(&self) -> Vec<&SubagentResult> {
        self.rounds.iter().flat_map(|r| r.results.iter()).collect()
    }

    /// Whether any subagent produced findings.
    pub fn has_findings(&self) -> bool {
        self.all_findings().iter().any(|r| r.has_findings())
    }

    /// Serialize into the versioned persistence record.
    pub fn to_record(&self) -> serde_json::Value {
        serde_json::json!({
            "version": SESSION_RECORD_VERSION,
            "session": self,
        })
    }

    /// Load a session from a persisted record.
    pub fn from_record(record: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let version = record.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
        if version != SESSION_RECORD_VERSION as u64 {
            return Err(serde::de::Error::custom(format!(
                "unsupported session record version {}",
                version
            )));
        }
        serde_json::from_value(record["session"].clone())
    }
}
