// ABOUTME: Subagent dispatcher - bounded-parallel execution of one round's tasks.
// ABOUTME: Spawns runners under the global semaphore; aggregates in dispatch order.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::event::EventBus;
use crate::llm::ChatModel;
use crate::provider::{FetchProvider, SearchProvider};
use crate::session::TaskSpec;
use crate::source::SourceTable;
use crate::subagent::{subagent_id, SubagentResult, SubagentRunner, SubagentStatus, Transcript};

/// Executes `run_subagents` calls: spawns one runner per task, bounded by
/// the global concurrency semaphore, and blocks until every child reaches
/// a terminal state.
///
/// Results come back in dispatch order regardless of completion order, so
/// downstream prompting is deterministic.
pub struct SubagentDispatcher {
    model: Arc<dyn ChatModel>,
    search: Arc<dyn SearchProvider>,
    fetch: Arc<dyn FetchProvider>,
    table: Arc<SourceTable>,
    bus: EventBus,
    semaphore: Arc<Semaphore>,
    config: Arc<SessionConfig>,
}

impl SubagentDispatcher {
    pub fn new(
        model: Arc<dyn ChatModel>,
        search: Arc<dyn SearchProvider>,
        fetch: Arc<dyn FetchProvider>,
        table: Arc<SourceTable>,
        bus: EventBus,
        config: Arc<SessionConfig>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            model,
            search,
            fetch,
            table,
            bus,
            semaphore,
            config,
        }
    }

    /// Run one batch of tasks to completion.
    ///
    /// Each child gets its own cancellation token derived from the round's;
    /// cancelling the round cancels every in-flight child.
    pub async fn run_tasks(
        &self,
        tasks: Vec<TaskSpec>,
        cancel: &CancellationToken,
    ) -> Vec<(SubagentResult, Transcript)> {
        info!(count = tasks.len(), "dispatching subagents");

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let model = Arc::clone(&self.model);
            let search = Arc::clone(&self.search);
            let fetch = Arc::clone(&self.fetch);
            let table = Arc::clone(&self.table);
            let bus = self.bus.clone();
            let config = Arc::clone(&self.config);
            let semaphore = Arc::clone(&self.semaphore);
            let child_cancel = cancel.child_token();
            let task_prompt = task.prompt.clone();

            let handle = tokio::spawn(async move {
                // The permit bounds how many runners are active; waiting
                // here keeps spawn order deterministic while completion
                // order is not.
                let permit = tokio::select! {
                    _ = child_cancel.cancelled() => None,
                    acquired = semaphore.acquire_owned() => acquired.ok(),
                };
                let Some(_permit) = permit else {
                    return cancelled_before_start(task_prompt);
                };

                let runner = SubagentRunner::new(
                    task,
                    model,
                    search,
                    fetch,
                    table,
                    bus,
                    child_cancel,
                    config,
                )
                .await;
                runner.run().await
            });
            handles.push(handle);
        }

        // Aggregate in dispatch order. After a cancellation, children get a
        // shared grace window to reach a terminal state; stragglers are
        // aborted and reported as cancelled.
        let mut grace_deadline: Option<tokio::time::Instant> = None;
        let mut results = Vec::with_capacity(handles.len());
        for mut handle in handles {
            let joined = tokio::select! {
                joined = &mut handle => Some(joined),
                _ = cancel.cancelled() => None,
            };
            let pair = match joined {
                Some(joined) => unwrap_join(joined),
                None => {
                    let deadline = *grace_deadline.get_or_insert_with(|| {
                        tokio::time::Instant::now() + self.config.cancel_grace()
                    });
                    match tokio::time::timeout_at(deadline, &mut handle).await {
                        Ok(joined) => unwrap_join(joined),
                        Err(_) => {
                            warn!("subagent did not stop within the grace window, abandoning");
                            handle.abort();
                            cancelled_before_start(String::new())
                        }
                    }
                }
            };
            results.push(pair);
        }
        results
    }
}

fn unwrap_join(
    joined: Result<(SubagentResult, Transcript), tokio::task::JoinError>,
) -> (SubagentResult, Transcript) {
    match joined {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "subagent task panicked");
            crashed_runner(e.to_string())
        }
    }
}

fn cancelled_before_start(task: String) -> (SubagentResult, Transcript) {
    (
        SubagentResult {
            id: subagent_id(),
            task,
            status: SubagentStatus::Cancelled,
            findings_text: String::new(),
            sources: Vec::new(),
            tool_calls_made: 0,
            tokens_used: 0,
            duration_ms: 0,
        },
        Transcript::new(0),
    )
}

fn crashed_runner(message: String) -> (SubagentResult, Transcript) {
    (
        SubagentResult {
            id: subagent_id(),
            task: String::new(),
            status: SubagentStatus::Error,
            findings_text: message,
            sources: Vec::new(),
            tool_calls_made: 0,
            tokens_used: 0,
            duration_ms: 0,
        },
        Transcript::new(0),
    )
}
