// ABOUTME: The Invoker - single choke point for every agent tool call.
// ABOUTME: Validates arguments, charges budget before dispatch, enforces timeouts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Registry, ToolResult};
use crate::budget::{BudgetMeter, BudgetTrip};
use crate::error::ErrorKind;
use crate::event::{EventBus, EventKind};

/// Routes validated tool calls to registered tools on behalf of one agent.
///
/// Every call is charged against the agent's budget before dispatch, and
/// every failure comes back as a structured error result, never as an Err.
pub struct Invoker {
    registry: Registry,
    meter: Arc<BudgetMeter>,
    bus: EventBus,
    agent_id: String,
    tool_timeout: Duration,
    cancel: CancellationToken,
    seen_queries: Mutex<HashSet<String>>,
    searches_made: AtomicUsize,
}

impl Invoker {
    pub fn new(
        registry: Registry,
        meter: Arc<BudgetMeter>,
        bus: EventBus,
        agent_id: impl Into<String>,
        tool_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            meter,
            bus,
            agent_id: agent_id.into(),
            tool_timeout,
            cancel,
            seen_queries: Mutex::new(HashSet::new()),
            searches_made: AtomicUsize::new(0),
        }
    }

    /// Successful `web_search` dispatches so far. The runner uses this for
    /// the minimum-effort floor.
    pub fn searches_made(&self) -> usize {
        self.searches_made.load(Ordering::SeqCst)
    }

    /// The registry this invoker routes to.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Invoke a tool by name.
    ///
    /// Order matters: the duplicate-query check consumes no budget, the
    /// budget charge happens before dispatch, and validation failures have
    /// already been charged (a malformed call still spent the attempt).
    pub async fn invoke(&self, call_id: &str, name: &str, args: serde_json::Value) -> ToolResult {
        if self.cancel.is_cancelled() {
            return ToolResult::classified_error(ErrorKind::Cancelled, "run cancelled");
        }

        // Identical repeated searches are rejected for free.
        let normalized_query = if name == "web_search" {
            let query = args
                .get("query")
                .and_then(|v| v.as_str())
                .map(normalize_query);
            if let Some(ref q) = query {
                if self.seen_queries.lock().unwrap().contains(q) {
                    return ToolResult::classified_error(
                        ErrorKind::DuplicateQuery,
                        "duplicate query - rephrase and try a different angle",
                    );
                }
            }
            query
        } else {
            None
        };

        if let Err(trip) = self.meter.charge_call() {
            let reason = match trip {
                BudgetTrip::Calls => "tool-call budget exhausted",
                BudgetTrip::Deadline => "deadline reached; no new tool calls",
                BudgetTrip::Tokens => "token budget exhausted",
            };
            return ToolResult::classified_error(ErrorKind::BudgetExceeded, reason);
        }

        let Some(tool) = self.registry.get(name).await else {
            return ToolResult::classified_error(
                ErrorKind::UnknownTool,
                format!("tool '{}' not found or not allowed", name),
            );
        };

        if let Err(message) = validate_args(&tool.schema(), &args) {
            return ToolResult::classified_error(ErrorKind::InvalidArguments, message);
        }

        self.bus.publish(
            Some(&self.agent_id),
            EventKind::ToolCallStarted { tool: name.to_string(), call_id: call_id.to_string() },
        );
        debug!(agent = %self.agent_id, tool = name, call_id, "dispatching tool call");

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                ToolResult::classified_error(ErrorKind::Cancelled, "run cancelled")
            }
            outcome = tokio::time::timeout(self.tool_timeout, tool.execute(args)) => {
                match outcome {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => ToolResult::classified_error(ErrorKind::Permanent, e.to_string()),
                    Err(_) => ToolResult::classified_error(
                        ErrorKind::Timeout,
                        format!("tool call exceeded {}s", self.tool_timeout.as_secs()),
                    ),
                }
            }
        };

        if name == "web_search" {
            if let Some(q) = normalized_query {
                self.seen_queries.lock().unwrap().insert(q);
            }
            if !result.is_error {
                self.searches_made.fetch_add(1, Ordering::SeqCst);
            }
        }

        self.bus.publish(
            Some(&self.agent_id),
            EventKind::ToolCallFinished {
                tool: name.to_string(),
                call_id: call_id.to_string(),
                is_error: result.is_error,
            },
        );

        result
    }
}

/// Case- and whitespace-normalize a search query for dedup.
fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Validate arguments against a tool's declared JSON schema.
///
/// Checks that every `required` property is present and that declared
/// property types match. Unknown properties pass through untouched.
fn validate_args(schema: &serde_json::Value, args: &serde_json::Value) -> Result<(), String> {
    if !args.is_object() {
        return Err("arguments must be a JSON object".into());
    }

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required {
            let Some(name) = field.as_str() else { continue };
            if args.get(name).is_none() {
                return Err(format!("missing required parameter: {}", name));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, spec) in props {
            let Some(value) = args.get(name) else { continue };
            let Some(expected) = spec.get("type").and_then(|t| t.as_str()) else { continue };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(format!("parameter '{}' must be of type {}", name, expected));
            }
        }
    }

    Ok(())
}
