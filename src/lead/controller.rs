// ABOUTME: Lead controller - classify, plan, dispatch, reflect, synthesize.
// ABOUTME: Owns the outer research loop and produces the session's draft.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatch::SubagentDispatcher;
use super::prompts;
use crate::budget::{Budget, BudgetMeter};
use crate::config::SessionConfig;
use crate::error::{LlmError, SessionError};
use crate::event::{EventBus, EventKind};
use crate::llm::{
    ChatModel, ContentBlock, Message, Request, Response, StreamAccumulator, StreamEvent,
};
use crate::provider::{FetchProvider, SearchProvider};
use crate::session::{Plan, QueryType, Reflection, Round, Session, SessionStatus, TaskSpec};
use crate::source::SourceTable;
use crate::tool::{Invoker, Registry};
use crate::tools::{CompleteTaskTool, RunSubagentsTool, SourceRecorder, WebSearchTool};

enum TurnError {
    Cancelled,
    Timeout,
    Llm(LlmError),
}

/// The outer controller for one research run.
///
/// Single-threaded within a run: one outstanding LLM call at a time, with
/// all parallelism delegated to the dispatcher.
pub struct LeadController {
    model: Arc<dyn ChatModel>,
    dispatcher: SubagentDispatcher,
    invoker: Invoker,
    table: Arc<SourceTable>,
    bus: EventBus,
    cancel: CancellationToken,
    config: Arc<SessionConfig>,
}

impl LeadController {
    pub async fn new(
        lead_model: Arc<dyn ChatModel>,
        subagent_model: Arc<dyn ChatModel>,
        search: Arc<dyn SearchProvider>,
        fetch: Arc<dyn FetchProvider>,
        table: Arc<SourceTable>,
        bus: EventBus,
        cancel: CancellationToken,
        config: Arc<SessionConfig>,
    ) -> Self {
        let dispatcher = SubagentDispatcher::new(
            subagent_model,
            Arc::clone(&search),
            Arc::clone(&fetch),
            Arc::clone(&table),
            bus.clone(),
            Arc::clone(&config),
        );

        // The lead's own tools: delegation, completion, and the occasional
        // direct search. Sources it finds are attributed to "lead".
        let recorder = Arc::new(SourceRecorder::new(
            Arc::clone(&table),
            "lead",
            config.source_cap_per_subagent,
        ));
        let registry = Registry::new();
        registry.register(WebSearchTool::new(search, recorder)).await;
        registry.register(CompleteTaskTool).await;
        registry.register(RunSubagentsTool::new(config.max_subagents)).await;

        // Generous meter: per-round stray-call limits are enforced in the
        // loop, not here.
        let meter = Arc::new(BudgetMeter::new(Budget {
            tool_call_budget: config.max_lead_tool_calls_per_round * config.max_rounds + 1,
            source_cap: config.source_cap_per_subagent,
            deadline: config.session_deadline(),
            token_budget: None,
        }));
        let invoker = Invoker::new(
            registry,
            meter,
            bus.clone(),
            "lead",
            config.tool_deadline(),
            cancel.clone(),
        );

        Self {
            model: lead_model,
            dispatcher,
            invoker,
            table,
            bus,
            cancel,
            config,
        }
    }

    /// Drive the session to a draft. Subagent failures are tolerated; only
    /// an unreachable ChatModel or deadline-with-nothing fails the run.
    pub async fn run(&self, session: &mut Session) -> Result<(), SessionError> {
        let query_type = self.classify(&session.query).await?;
        session.query_type = Some(query_type);
        self.bus.publish(None, EventKind::QueryClassified { query_type });
        info!(?query_type, "query classified");

        let default_tasks = self.default_task_count(query_type);
        let session_deadline = Instant::now() + self.config.session_deadline();

        let mut messages = vec![Message::user(prompts::lead_plan_prompt(
            &session.query,
            query_type,
            default_tasks,
        ))];
        let mut draft: Option<String> = None;
        let mut stray_calls_this_round = 0usize;
        let mut delegate_nudged = false;

        while draft.is_none() {
            if self.cancel.is_cancelled() {
                session.status = SessionStatus::Cancelled;
                return Ok(());
            }
            if Instant::now() >= session_deadline
                || session.rounds_executed() >= self.config.max_rounds
            {
                break;
            }

            let request = Request::new(&self.config.lead_model)
                .system(prompts::lead_system())
                .messages(messages.clone())
                .tools(self.invoker.registry().to_definitions().await)
                .max_tokens(8192)
                .temperature(0.5);

            let response = match self.lead_turn(&request).await {
                Ok(response) => response,
                Err(TurnError::Cancelled) => {
                    session.status = SessionStatus::Cancelled;
                    return Ok(());
                }
                Err(TurnError::Timeout) => break,
                Err(TurnError::Llm(e)) => return Err(SessionError::LlmUnavailable(e)),
            };

            messages.push(Message {
                role: crate::llm::Role::Assistant,
                content: response.content.clone(),
            });

            if let Some((_, args)) = find_tool_call(&response, "complete_task") {
                let report = args
                    .get("report")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if let Some(last) = session.rounds.last_mut() {
                    last.reflection = Reflection::Synthesize;
                }
                self.bus.publish(None, EventKind::SynthesisStarted);
                draft = Some(report);
                break;
            }

            if let Some((call_id, args)) = find_tool_call(&response, "run_subagents") {
                match parse_tasks(args, self.config.max_subagents) {
                    Ok(tasks) => {
                        let round_index = session.rounds_executed();
                        let plan = Plan {
                            query_type,
                            rationale: response.text(),
                            tasks: tasks.clone(),
                        };
                        self.bus.publish(
                            None,
                            EventKind::PlanCreated { round_index, task_count: tasks.len() },
                        );

                        let outcomes = self.dispatcher.run_tasks(tasks, &self.cancel).await;
                        let mut results = Vec::with_capacity(outcomes.len());
                        for (result, transcript) in outcomes {
                            session.transcripts.insert(result.id.clone(), transcript);
                            results.push(result);
                        }

                        let results_block = results_summary(&results);
                        self.bus.publish(
                            None,
                            EventKind::RoundComplete { round_index, result_count: results.len() },
                        );
                        session.record_round(Round {
                            round_index,
                            plan,
                            results,
                            reflection: Reflection::Continue,
                        });

                        messages.push(Message {
                            role: crate::llm::Role::User,
                            content: vec![
                                ContentBlock::tool_result(call_id, results_block.clone()),
                                ContentBlock::text(prompts::reflection_prompt(
                                    &results_block,
                                    &self.table.summary(),
                                )),
                            ],
                        });
                        stray_calls_this_round = 0;
                        continue;
                    }
                    Err(message) => {
                        messages.push(Message::tool_results(vec![ContentBlock::tool_error(
                            call_id, message,
                        )]));
                        continue;
                    }
                }
            }

            // Stray tool calls (e.g. a direct web_search): execute and
            // re-ask, bounded per round.
            let calls = other_tool_calls(&response);
            if !calls.is_empty() {
                stray_calls_this_round += calls.len();
                if stray_calls_this_round > self.config.max_lead_tool_calls_per_round {
                    debug!("lead exceeded stray tool calls, redirecting");
                    messages.push(Message::tool_results(
                        calls
                            .iter()
                            .map(|(id, _, _)| {
                                ContentBlock::tool_error(
                                    id.clone(),
                                    prompts::REDIRECT_TO_SUBAGENTS,
                                )
                            })
                            .collect(),
                    ));
                    continue;
                }

                let mut blocks = Vec::with_capacity(calls.len());
                for (id, name, input) in &calls {
                    let result = self.invoker.invoke(id, name, input.clone()).await;
                    blocks.push(if result.is_error {
                        ContentBlock::tool_error(id.clone(), result.content)
                    } else {
                        ContentBlock::tool_result(id.clone(), result.content)
                    });
                }
                messages.push(Message::tool_results(blocks));
                continue;
            }

            // Plain prose before any delegation: nudge once, then accept.
            let text = response.text();
            if delegate_nudged && !text.trim().is_empty() {
                self.bus.publish(None, EventKind::SynthesisStarted);
                draft = Some(text);
                break;
            }
            delegate_nudged = true;
            messages.push(Message::user(prompts::DELEGATE_FIRST));
        }

        let draft = match draft {
            Some(draft) => draft,
            None => {
                // Max rounds or deadline: one last turn with tools disabled.
                self.bus.publish(None, EventKind::SynthesisStarted);
                self.forced_synthesis(session, &mut messages).await?
            }
        };

        self.bus.publish(
            None,
            EventKind::SynthesisComplete { draft_chars: draft.chars().count() },
        );
        session.draft = Some(draft);
        Ok(())
    }

    /// Classify the query; advisory only, lenient on malformed output.
    async fn classify(&self, query: &str) -> Result<QueryType, SessionError> {
        let request = Request::new(&self.config.lead_model)
            .message(Message::user(prompts::classify_prompt(query)))
            .max_tokens(512)
            .temperature(0.3);

        let response = match self.model.complete(&request).await {
            Ok(response) => response,
            Err(e) if e.is_transient() => self
                .model
                .complete(&request)
                .await
                .map_err(SessionError::LlmUnavailable)?,
            Err(e) => return Err(SessionError::LlmUnavailable(e)),
        };

        Ok(parse_classification(&response.text()))
    }

    fn default_task_count(&self, query_type: QueryType) -> usize {
        let count = match query_type {
            QueryType::Straightforward => 1,
            QueryType::DepthFirst => 4,
            QueryType::BreadthFirst => 10,
        };
        count.min(self.config.max_subagents)
    }

    /// Final "synthesize now" turn with tools disabled.
    async fn forced_synthesis(
        &self,
        session: &Session,
        messages: &mut Vec<Message>,
    ) -> Result<String, SessionError> {
        messages.push(Message::user(prompts::SYNTHESIZE_NOW));

        let request = Request::new(&self.config.lead_model)
            .system(prompts::lead_system())
            .messages(messages.clone())
            .max_tokens(8192)
            .temperature(0.5);

        let response = match self.lead_turn(&request).await {
            Ok(response) => response,
            Err(TurnError::Llm(e)) => return Err(SessionError::LlmUnavailable(e)),
            Err(TurnError::Cancelled) | Err(TurnError::Timeout) => {
                return fallback_draft(session).ok_or(SessionError::DeadlineExpired);
            }
        };

        let text = response.text();
        if text.trim().is_empty() {
            fallback_draft(session).ok_or(SessionError::DeadlineExpired)
        } else {
            Ok(text)
        }
    }

    /// One streamed lead LLM turn bounded by the per-call deadline.
    async fn lead_turn(&self, request: &Request) -> Result<Response, TurnError> {
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
                            self.bus.publish(None, EventKind::TokenDelta { text: text.clone() });
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
}

/// Last-resort draft assembled mechanically from subagent findings.
fn fallback_draft(session: &Session) -> Option<String> {
    if !session.has_findings() {
        return None;
    }
    warn!("assembling fallback draft from raw findings");
    let sections: Vec<String> = session
        .all_findings()
        .iter()
        .filter(|r| r.has_findings())
        .map(|r| format!("## {}\n\n{}", r.task, r.findings_text))
        .collect();
    Some(format!(
        "# Research findings for: {}\n\n{}",
        session.query,
        sections.join("\n\n")
    ))
}

fn find_tool_call<'a>(
    response: &'a Response,
    tool: &str,
) -> Option<(String, &'a serde_json::Value)> {
    response.content.iter().find_map(|block| match block {
        ContentBlock::ToolUse { id, name, input } if name == tool => Some((id.clone(), input)),
        _ => None,
    })
}

fn other_tool_calls(response: &Response) -> Vec<(String, String, serde_json::Value)> {
    response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input }
                if name != "complete_task" && name != "run_subagents" =>
            {
                Some((id.clone(), name.clone(), input.clone()))
            }
            _ => None,
        })
        .collect()
}

/// Parse and bound the task list of a `run_subagents` call.
fn parse_tasks(args: &serde_json::Value, max_subagents: usize) -> Result<Vec<TaskSpec>, String> {
    let tasks = args
        .get("tasks")
        .and_then(|t| t.as_array())
        .ok_or("run_subagents requires a 'tasks' array of strings")?;

    if tasks.is_empty() {
        return Err("tasks must contain at least one task".into());
    }
    if tasks.len() > max_subagents {
        return Err(format!(
            "too many tasks: {} exceeds the limit of {}; consolidate related tasks",
            tasks.len(),
            max_subagents
        ));
    }

    tasks
        .iter()
        .map(|t| {
            t.as_str()
                .map(TaskSpec::new)
                .ok_or_else(|| "every task must be a string".to_string())
        })
        .collect()
}

/// Aggregated, dispatch-ordered results block handed back to the lead.
fn results_summary(results: &[crate::subagent::SubagentResult]) -> String {
    let entries: Vec<serde_json::Value> = results
        .iter()
        .map(|r| {
            serde_json::json!({
                "subagent_id": r.id,
                "status": r.status,
                "tool_calls_made": r.tool_calls_made,
                "sources": r.sources,
                "findings": r.findings_text,
            })
        })
        .collect();
    serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
}

/// Lenient JSON classification parse; defaults to straightforward.
fn parse_classification(text: &str) -> QueryType {
    let Some(start) = text.find('{') else {
        return QueryType::Straightforward;
    };
    let Some(end) = text.rfind('}') else {
        return QueryType::Straightforward;
    };
    let parsed: serde_json::Value = match serde_json::from_str(&text[start..=end]) {
        Ok(v) => v,
        Err(_) => return QueryType::Straightforward,
    };
    match parsed.get("query_type").and_then(|v| v.as_str()) {
        Some("depth_first") | Some("depth-first") => QueryType::DepthFirst,
        Some("breadth_first") | Some("breadth-first") => QueryType::BreadthFirst,
        _ => QueryType::Straightforward,
    }
}
