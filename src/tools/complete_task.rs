// ABOUTME: CompleteTaskTool - the terminal tool every agent calls to finish.
// ABOUTME: Intercepted by the agent loop; the report becomes the agent's output.

use async_trait::async_trait;

use crate::tool::{Tool, ToolResult};

/// Terminal tool that ends an agent's loop.
///
/// The runner and the lead controller intercept calls to this tool before
/// dispatch; `execute` only runs if something routes a call here directly.
pub struct CompleteTaskTool;

#[async_trait]
impl Tool for CompleteTaskTool {
    fn name(&self) -> &str {
        "complete_task"
    }

    fn description(&self) -> &str {
        "Finish your task and hand back your findings. Call this exactly once, when your research is complete, with the full report in the 'report' parameter."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "report": {
                    "type": "string",
                    "description": "The complete findings or final report"
                },
                "no_search_needed": {
                    "type": "boolean",
                    "description": "Set true only when the task is answerable without any web research",
                    "default": false
                }
            },
            "required": ["report"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolResult, anyhow::Error> {
        let report = params
            .get("report")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(ToolResult::text(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_echoes_report() {
        let tool = CompleteTaskTool;
        let result = tool
            .execute(serde_json::json!({"report": "All done."}))
            .await
            .unwrap();
        assert_eq!(result.content, "All done.");
    }

    #[test]
    fn test_schema_requires_report() {
        let schema = CompleteTaskTool.schema();
        assert_eq!(schema["required"][0], "report");
        assert!(schema["properties"]["no_search_needed"].is_object());
    }
}
