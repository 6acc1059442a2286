// ABOUTME: Subagent runner - executes the OODA loop for one research task.
// ABOUTME: LLM-driven turns with budget, diversity, and termination enforced around them.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::result::{SubagentResult, SubagentStatus};
use super::transcript::Transcript;
use crate::budget::{Budget, BudgetMeter, BudgetTrip};
use crate::config::SessionConfig;
use crate::error::LlmError;
use crate::event::{EventBus, EventKind};
use crate::lead::prompts;
use crate::llm::{
    ChatModel, ContentBlock, Message, Request, Response, StreamAccumulator, StreamEvent,
};
use crate::provider::{FetchProvider, SearchProvider};
use crate::session::TaskSpec;
use crate::source::SourceTable;
use crate::tool::{Invoker, Registry};
use crate::tools::{CompleteTaskTool, SourceRecorder, WebFetchTool, WebSearchTool};

/// Generate a short subagent id.
pub fn subagent_id() -> String {
    format!("sub-{}", &Uuid::new_v4().simple().to_string()[..8])
}

/// Why the runner entered finalize mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalizeCause {
    Budget,
    Deadline,
}

enum TurnError {
    Cancelled,
    Timeout,
    Llm(LlmError),
}

/// Executes one research task autonomously and produces a [`SubagentResult`].
///
/// The loop shape: observe (visible transcript) -> orient/decide (streamed
/// LLM turn) -> act (dispatch the turn's tool calls concurrently) -> record.
/// Termination: the model calls `complete_task`, the budget or deadline
/// trips, or the run is cancelled. Failures become terminal statuses; this
/// function does not return errors.
pub struct SubagentRunner {
    id: String,
    task: TaskSpec,
    model: Arc<dyn ChatModel>,
    invoker: Invoker,
    meter: Arc<BudgetMeter>,
    recorder: Arc<SourceRecorder>,
    bus: EventBus,
    cancel: CancellationToken,
    config: Arc<SessionConfig>,
    transcript: Transcript,
}

impl SubagentRunner {
    /// Wire up a runner for one task: per-agent budget, recorder, and a
    /// registry holding this agent's tool instances.
    pub async fn new(
        task: TaskSpec,
        model: Arc<dyn ChatModel>,
        search: Arc<dyn SearchProvider>,
        fetch: Arc<dyn FetchProvider>,
        table: Arc<SourceTable>,
        bus: EventBus,
        cancel: CancellationToken,
        config: Arc<SessionConfig>,
    ) -> Self {
        let id = subagent_id();

        let budget = Budget {
            tool_call_budget: config.budget_for(task.effective_hint()),
            source_cap: config.source_cap_per_subagent,
            deadline: config.subagent_deadline(),
            token_budget: config.token_budget_per_subagent,
        };
        let meter = Arc::new(BudgetMeter::new(budget));

        let recorder = Arc::new(SourceRecorder::new(
            Arc::clone(&table),
            id.clone(),
            config.source_cap_per_subagent,
        ));

        let registry = Registry::new();
        registry
            .register(WebSearchTool::new(search, Arc::clone(&recorder)))
            .await;
        registry
            .register(WebFetchTool::new(fetch, Arc::clone(&recorder)))
            .await;
        registry.register(CompleteTaskTool).await;

        let invoker = Invoker::new(
            registry,
            Arc::clone(&meter),
            bus.clone(),
            id.clone(),
            config.tool_deadline(),
            cancel.clone(),
        );

        let transcript = Transcript::new(config.context_token_cap);

        Self {
            id,
            task,
            model,
            invoker,
            meter,
            recorder,
            bus,
            cancel,
            config,
            transcript,
        }
    }

    /// This runner's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the task to a terminal state.
    pub async fn run(mut self) -> (SubagentResult, Transcript) {
        let started = Instant::now();
        self.bus.publish(
            Some(&self.id),
            EventKind::SubagentSpawned { task: self.task.prompt.clone() },
        );
        info!(subagent = %self.id, "subagent started");

        self.transcript.push(Message::user(self.task.prompt.clone()));

        let mut finalize: Option<FinalizeCause> = None;
        let mut finalize_attempts = 0u32;
        let mut nudged_for_completion = false;
        let mut pressure_noted = false;

        let (status, findings) = loop {
            if self.cancel.is_cancelled() {
                break (SubagentStatus::Cancelled, self.accumulated_findings());
            }

            if finalize.is_none() {
                if let Some(trip) = self.meter.tripped() {
                    let cause = match trip {
                        BudgetTrip::Deadline => FinalizeCause::Deadline,
                        BudgetTrip::Calls | BudgetTrip::Tokens => FinalizeCause::Budget,
                    };
                    debug!(subagent = %self.id, ?trip, "budget tripped, forcing finalize");
                    finalize = Some(cause);
                    self.transcript.push(Message::user(prompts::FINALIZE_NOW));
                } else if self.meter.token_pressure() >= 0.8 && !pressure_noted {
                    pressure_noted = true;
                    self.transcript.push(Message::user(prompts::TOKEN_PRESSURE));
                }
            }

            let request = self.build_request(finalize.is_some()).await;
            let response = match self.stream_turn(&request).await {
                Ok(response) => response,
                Err(TurnError::Cancelled) => {
                    break (SubagentStatus::Cancelled, self.accumulated_findings());
                }
                Err(TurnError::Timeout) => {
                    break (SubagentStatus::Timeout, self.accumulated_findings());
                }
                Err(TurnError::Llm(e)) => {
                    warn!(subagent = %self.id, error = %e, "LLM turn failed");
                    self.bus
                        .publish(Some(&self.id), EventKind::Error { message: e.to_string() });
                    break (SubagentStatus::Error, self.accumulated_findings());
                }
            };

            self.meter.record_tokens(response.usage.total());
            self.transcript.push(Message {
                role: crate::llm::Role::Assistant,
                content: response.content.clone(),
            });

            // Explicit completion wins over everything else in the turn.
            if let Some((call_id, args)) = find_complete_task(&response) {
                let report = args
                    .get("report")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let no_search_needed = args
                    .get("no_search_needed")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);

                if self.invoker.searches_made() == 0 && !no_search_needed && finalize.is_none() {
                    // Minimum-effort floor: no free early exits.
                    self.transcript.push(Message::tool_results(vec![
                        ContentBlock::tool_error(call_id, prompts::SEARCH_FLOOR),
                    ]));
                    continue;
                }

                let status = match finalize {
                    None => SubagentStatus::Ok,
                    Some(FinalizeCause::Budget) => SubagentStatus::BudgetExhausted,
                    Some(FinalizeCause::Deadline) => SubagentStatus::Timeout,
                };
                break (status, report);
            }

            let calls = tool_calls(&response);
            if !calls.is_empty() {
                if finalize.is_some() {
                    // The directive was ignored; one retry, then fabricate.
                    finalize_attempts += 1;
                    if finalize_attempts >= 2 {
                        break (
                            finalize_status(finalize.unwrap()),
                            self.accumulated_findings(),
                        );
                    }
                    self.transcript.push(Message::tool_results(
                        calls
                            .iter()
                            .map(|(id, _, _)| {
                                ContentBlock::tool_error(id.clone(), prompts::FINALIZE_NOW)
                            })
                            .collect(),
                    ));
                    continue;
                }

                // Independent calls from one turn execute concurrently.
                let futures = calls
                    .iter()
                    .map(|(id, name, input)| self.invoker.invoke(id, name, input.clone()));
                let results = join_all(futures).await;

                let blocks = calls
                    .iter()
                    .zip(results)
                    .map(|((id, _, _), result)| {
                        if result.is_error {
                            ContentBlock::tool_error(id.clone(), result.content)
                        } else {
                            ContentBlock::tool_result(id.clone(), result.content)
                        }
                    })
                    .collect();
                self.transcript.push(Message::tool_results(blocks));
                continue;
            }

            // Plain text, no tool call.
            if finalize.is_some() {
                finalize_attempts += 1;
                let text = response.text();
                if finalize_attempts >= 2 || !text.trim().is_empty() {
                    let findings = if text.trim().is_empty() {
                        self.accumulated_findings()
                    } else {
                        text
                    };
                    break (finalize_status(finalize.unwrap()), findings);
                }
                self.transcript.push(Message::user(prompts::FINALIZE_NOW));
                continue;
            }

            let text = response.text();
            if nudged_for_completion && !text.trim().is_empty() {
                // Second text-only turn: accept it as the report.
                break (SubagentStatus::Ok, text);
            }
            nudged_for_completion = true;
            self.transcript.push(Message::user(prompts::CONTINUE_OR_COMPLETE));
        };

        let result = SubagentResult {
            id: self.id.clone(),
            task: self.task.prompt.clone(),
            status,
            findings_text: findings,
            sources: self.recorder.contributed(),
            tool_calls_made: self.meter.calls_made(),
            tokens_used: self.meter.tokens_used(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.bus.publish(
            Some(&self.id),
            EventKind::SubagentFinished {
                status: result.status,
                tool_calls_made: result.tool_calls_made,
            },
        );
        info!(subagent = %self.id, status = ?result.status, calls = result.tool_calls_made, "subagent finished");

        (result, self.transcript)
    }

    async fn build_request(&self, finalizing: bool) -> Request {
        let system = prompts::subagent_system(self.meter.budget().tool_call_budget);
        let mut request = Request::new(&self.config.subagent_model)
            .system(system)
            .messages(self.transcript.visible())
            .max_tokens(4096)
            .temperature(0.3);

        if finalizing {
            request = request.tools(vec![tool_definition_of(&CompleteTaskTool)]);
        } else {
            request = request.tools(self.invoker_definitions().await);
        }
        request
    }

    async fn invoker_definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        self.invoker.registry().to_definitions().await
    }

    /// One streamed LLM turn, bounded by the per-call deadline and the
    /// cancellation token. Token deltas are published as they arrive.
    async fn stream_turn(&self, request: &Request) -> Result<Response, TurnError> {
        let mut stream = self.model.stream_completion(request);
        let mut acc = StreamAccumulator::new();
        let deadline = tokio::time::sleep(self.config.llm_deadline());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TurnError::Cancelled),
                _ = &mut deadline => return Err(TurnError::Timeout),
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        if let StreamEvent::ContentBlockDelta { text, .. } = &event {
                            self.bus.publish(
                                Some(&self.id),
                                EventKind::TokenDelta { text: text.clone() },
                            );
                        }
                        let stop = matches!(event, StreamEvent::MessageStop);
                        acc.handle_event(&event);
                        if stop {
                            break;
                        }
                    }
                    Some(Err(e)) => return Err(TurnError::Llm(e)),
                    None => break,
                }
            }
        }

        Ok(acc.into_response())
    }

    /// Assistant text gathered so far, used to fabricate a terminal result
    /// when the model never completes cleanly.
    fn accumulated_findings(&self) -> String {
        self.transcript
            .messages()
            .iter()
            .filter(|m| m.role == crate::llm::Role::Assistant)
            .map(|m| m.text())
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn finalize_status(cause: FinalizeCause) -> SubagentStatus {
    match cause {
        FinalizeCause::Budget => SubagentStatus::BudgetExhausted,
        FinalizeCause::Deadline => SubagentStatus::Timeout,
    }
}

/// First `complete_task` call in a response, if any.
fn find_complete_task(response: &Response) -> Option<(String, serde_json::Value)> {
    response.content.iter().find_map(|block| match block {
        ContentBlock::ToolUse { id, name, input } if name == "complete_task" => {
            Some((id.clone(), input.clone()))
        }
        _ => None,
    })
}

/// All non-terminal tool calls in a response, in emission order.
fn tool_calls(response: &Response) -> Vec<(String, String, serde_json::Value)> {
    response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } if name != "complete_task" => {
                Some((id.clone(), name.clone(), input.clone()))
            }
            _ => None,
        })
        .collect()
}

fn tool_definition_of(tool: &dyn crate::tool::Tool) -> crate::llm::ToolDefinition {
    crate::llm::ToolDefinition {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        input_schema: tool.schema(),
    }
}
