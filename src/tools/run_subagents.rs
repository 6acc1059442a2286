// ABOUTME: RunSubagentsTool - the lead-only tool that spawns parallel researchers.
// ABOUTME: Declares the schema; execution is routed to the dispatcher by the lead.

use async_trait::async_trait;

use crate::tool::{Tool, ToolResult};

/// Lead-only tool for dispatching parallel research subagents.
///
/// This type carries the schema the lead model sees. The lead controller
/// intercepts calls and hands them to the dispatcher, which blocks until
/// every spawned subagent reaches a terminal state.
pub struct RunSubagentsTool {
    max_subagents: usize,
}

impl RunSubagentsTool {
    pub fn new(max_subagents: usize) -> Self {
        Self { max_subagents }
    }
}

#[async_trait]
impl Tool for RunSubagentsTool {
    fn name(&self) -> &str {
        "run_subagents"
    }

    fn description(&self) -> &str {
        "Deploy multiple research subagents in parallel. Each task string must be a complete, self-contained research assignment for one subagent. Blocks until all subagents finish and returns their findings."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": format!(
                        "Research task prompts, one per subagent (1 to {})",
                        self.max_subagents
                    )
                }
            },
            "required": ["tasks"]
        })
    }

    async fn execute(&self, _params: serde_json::Value) -> Result<ToolResult, anyhow::Error> {
        // Reached only if dispatched outside the lead loop.
        Ok(ToolResult::error(
            "run_subagents is executed by the lead controller, not directly",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_cap() {
        let tool = RunSubagentsTool::new(20);
        let schema = tool.schema();
        let desc = schema["properties"]["tasks"]["description"].as_str().unwrap();
        assert!(desc.contains("20"));
    }
}
