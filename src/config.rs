// ABOUTME: Session configuration - models, concurrency caps, budgets, deadlines.
// ABOUTME: Builder-style setters with defaults suitable for real research runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::BudgetHint;

/// How citation anchors are rendered in the final output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationStyle {
    /// `[1]` style anchors.
    Numeric,
    /// `[^1]` Markdown footnote anchors.
    Footnote,
}

/// Configuration for one research session.
///
/// All durations are stored in seconds so the config snapshot serializes
/// cleanly into the session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model identifier for the lead controller.
    pub lead_model: String,

    /// Model identifier for research subagents.
    pub subagent_model: String,

    /// Model identifier for the citation pass.
    pub citation_model: String,

    /// Upper bound on tasks in one `run_subagents` call.
    pub max_subagents: usize,

    /// Global cap on concurrently running subagents.
    pub max_concurrent: usize,

    /// Lead outer-loop iteration cap.
    pub max_rounds: usize,

    /// Stray tool calls the lead may make within one round before being
    /// redirected to `run_subagents`.
    pub max_lead_tool_calls_per_round: usize,

    /// Total wall-clock limit for the session.
    pub session_deadline_sec: u64,

    /// Wall-clock limit for one subagent run.
    pub subagent_deadline_sec: u64,

    /// Limit for a single tool call.
    pub tool_deadline_sec: u64,

    /// Limit for a single LLM call (lead or subagent turn).
    pub llm_deadline_sec: u64,

    /// Grace window for cancellation to complete before resources are
    /// abandoned.
    pub cancel_grace_sec: u64,

    /// Tool-call caps for light / medium / heavy budget hints.
    pub default_budget_light: usize,
    pub default_budget_medium: usize,
    pub default_budget_heavy: usize,

    /// Absolute ceiling on any subagent's tool-call budget.
    pub max_tool_call_budget: usize,

    /// Maximum sources one subagent may contribute to the run.
    pub source_cap_per_subagent: usize,

    /// Soft token budget per subagent; at 80% consumption the runner
    /// switches to summarize-then-continue mode. None disables it.
    pub token_budget_per_subagent: Option<u64>,

    /// Token cap for the LLM-visible transcript window.
    pub context_token_cap: usize,

    /// Anchor rendering for the citation processor.
    pub citation_style: CitationStyle,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lead_model: "claude-opus-4-20250514".to_string(),
            subagent_model: "claude-sonnet-4-20250514".to_string(),
            citation_model: "claude-sonnet-4-20250514".to_string(),
            max_subagents: 20,
            max_concurrent: 5,
            max_rounds: 5,
            max_lead_tool_calls_per_round: 3,
            session_deadline_sec: 30 * 60,
            subagent_deadline_sec: 5 * 60,
            tool_deadline_sec: 30,
            llm_deadline_sec: 5 * 60,
            cancel_grace_sec: 2,
            default_budget_light: 5,
            default_budget_medium: 10,
            default_budget_heavy: 15,
            max_tool_call_budget: 20,
            source_cap_per_subagent: 100,
            token_budget_per_subagent: None,
            context_token_cap: 24_000,
            citation_style: CitationStyle::Footnote,
        }
    }
}

impl SessionConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lead model.
    pub fn lead_model(mut self, model: impl Into<String>) -> Self {
        self.lead_model = model.into();
        self
    }

    /// Set the subagent model.
    pub fn subagent_model(mut self, model: impl Into<String>) -> Self {
        self.subagent_model = model.into();
        self
    }

    /// Set the maximum tasks per `run_subagents` call.
    pub fn max_subagents(mut self, max: usize) -> Self {
        self.max_subagents = max;
        self
    }

    /// Set the global concurrency cap.
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the lead iteration cap.
    pub fn max_rounds(mut self, max: usize) -> Self {
        self.max_rounds = max;
        self
    }

    /// Set the citation style.
    pub fn citation_style(mut self, style: CitationStyle) -> Self {
        self.citation_style = style;
        self
    }

    /// Tool-call cap for a budget hint, clamped to the absolute maximum.
    pub fn budget_for(&self, hint: BudgetHint) -> usize {
        let cap = match hint {
            BudgetHint::Light => self.default_budget_light,
            BudgetHint::Medium => self.default_budget_medium,
            BudgetHint::Heavy => self.default_budget_heavy,
        };
        cap.min(self.max_tool_call_budget)
    }

    pub fn session_deadline(&self) -> Duration {
        Duration::from_secs(self.session_deadline_sec)
    }

    pub fn subagent_deadline(&self) -> Duration {
        Duration::from_secs(self.subagent_deadline_sec)
    }

    pub fn tool_deadline(&self) -> Duration {
        Duration::from_secs(self.tool_deadline_sec)
    }

    pub fn llm_deadline(&self) -> Duration {
        Duration::from_secs(self.llm_deadline_sec)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_sec)
    }

    /// Validate internal consistency. Called once at session start.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_subagents == 0 {
            return Err("max_subagents must be at least 1".into());
        }
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be at least 1".into());
        }
        if self.max_rounds == 0 {
            return Err("max_rounds must be at least 1".into());
        }
        Ok(())
    }
}
