// ABOUTME: Per-subagent budgets - tool-call caps, source caps, deadlines, tokens.
// ABOUTME: BudgetMeter is the cooperative enforcement point checked before dispatch.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Relative effort hint attached to a task, mapped to a tool-call cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetHint {
    Light,
    Medium,
    Heavy,
}

/// The reason a budget check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetTrip {
    /// No tool calls remaining.
    Calls,
    /// Wall-clock deadline passed.
    Deadline,
    /// Token budget fully consumed.
    Tokens,
}

/// Immutable limits for one subagent run.
#[derive(Debug, Clone)]
pub struct Budget {
    /// Maximum tool calls this agent may dispatch.
    pub tool_call_budget: usize,

    /// Maximum sources this agent may contribute to the run.
    pub source_cap: usize,

    /// Wall-clock allowance from spawn.
    pub deadline: Duration,

    /// Soft token budget; None disables token tracking.
    pub token_budget: Option<u64>,
}

/// Tracks consumption against a [`Budget`].
///
/// All checks are cooperative: the runner consults the meter before every
/// tool dispatch, and tripping a limit triggers the finalize-now protocol
/// rather than an error.
pub struct BudgetMeter {
    budget: Budget,
    started: Instant,
    calls: AtomicUsize,
    tokens: AtomicU64,
}

impl BudgetMeter {
    /// Create a meter; the deadline clock starts now.
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            started: Instant::now(),
            calls: AtomicUsize::new(0),
            tokens: AtomicU64::new(0),
        }
    }

    /// The limits this meter enforces.
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Tool calls charged so far.
    pub fn calls_made(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Tokens recorded so far.
    pub fn tokens_used(&self) -> u64 {
        self.tokens.load(Ordering::SeqCst)
    }

    /// Time since the meter was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Remaining wall-clock allowance, zero once the deadline has passed.
    pub fn time_remaining(&self) -> Duration {
        self.budget.deadline.saturating_sub(self.started.elapsed())
    }

    /// Charge one tool call. Returns the trip reason if the call cannot be
    /// afforded; the call count is only incremented on success.
    pub fn charge_call(&self) -> Result<(), BudgetTrip> {
        if self.time_remaining().is_zero() {
            return Err(BudgetTrip::Deadline);
        }
        // Reserve-then-verify keeps the cap exact under concurrent charges.
        let prev = self.calls.fetch_add(1, Ordering::SeqCst);
        if prev >= self.budget.tool_call_budget {
            self.calls.fetch_sub(1, Ordering::SeqCst);
            return Err(BudgetTrip::Calls);
        }
        Ok(())
    }

    /// Record token usage from a completed LLM turn.
    pub fn record_tokens(&self, tokens: u64) {
        self.tokens.fetch_add(tokens, Ordering::SeqCst);
    }

    /// First tripped limit, if any. Checked by the runner between turns.
    pub fn tripped(&self) -> Option<BudgetTrip> {
        if self.time_remaining().is_zero() {
            return Some(BudgetTrip::Deadline);
        }
        if self.calls_made() >= self.budget.tool_call_budget {
            return Some(BudgetTrip::Calls);
        }
        if let Some(cap) = self.budget.token_budget {
            if self.tokens_used() >= cap {
                return Some(BudgetTrip::Tokens);
            }
        }
        None
    }

    /// Fraction of the token budget consumed, or 0.0 when untracked.
    ///
    /// At 0.8 the runner switches to summarize-then-continue mode.
    pub fn token_pressure(&self) -> f64 {
        match self.budget.token_budget {
            Some(cap) if cap > 0 => self.tokens_used() as f64 / cap as f64,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_budget(calls: usize) -> Budget {
        Budget {
            tool_call_budget: calls,
            source_cap: 100,
            deadline: Duration::from_secs(60),
            token_budget: None,
        }
    }

    #[test]
    fn test_charge_until_exhausted() {
        let meter = BudgetMeter::new(test_budget(2));
        assert!(meter.charge_call().is_ok());
        assert!(meter.charge_call().is_ok());
        assert_eq!(meter.charge_call(), Err(BudgetTrip::Calls));
        assert_eq!(meter.calls_made(), 2);
    }

    #[test]
    fn test_failed_charge_does_not_consume() {
        let meter = BudgetMeter::new(test_budget(1));
        meter.charge_call().unwrap();
        let _ = meter.charge_call();
        let _ = meter.charge_call();
        assert_eq!(meter.calls_made(), 1);
    }

    #[test]
    fn test_zero_budget_rejects_first_call() {
        let meter = BudgetMeter::new(test_budget(0));
        assert_eq!(meter.charge_call(), Err(BudgetTrip::Calls));
        assert_eq!(meter.tripped(), Some(BudgetTrip::Calls));
    }

    #[test]
    fn test_deadline_trips() {
        let mut budget = test_budget(5);
        budget.deadline = Duration::ZERO;
        let meter = BudgetMeter::new(budget);
        assert_eq!(meter.charge_call(), Err(BudgetTrip::Deadline));
        assert_eq!(meter.tripped(), Some(BudgetTrip::Deadline));
    }

    #[test]
    fn test_token_pressure() {
        let mut budget = test_budget(5);
        budget.token_budget = Some(1000);
        let meter = BudgetMeter::new(budget);
        assert_eq!(meter.token_pressure(), 0.0);
        meter.record_tokens(800);
        assert!((meter.token_pressure() - 0.8).abs() < f64::EPSILON);
        meter.record_tokens(300);
        assert_eq!(meter.tripped(), Some(BudgetTrip::Tokens));
    }

    #[test]
    fn test_untracked_tokens_never_trip() {
        let meter = BudgetMeter::new(test_budget(5));
        meter.record_tokens(1_000_000);
        assert_eq!(meter.tripped(), None);
        assert_eq!(meter.token_pressure(), 0.0);
    }
}
