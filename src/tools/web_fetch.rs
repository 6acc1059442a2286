// ABOUTME: WebFetchTool - the agent-facing page fetch tool.
// ABOUTME: Bridges a FetchProvider to the loop and records the page as a source.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::recorder::SourceRecorder;
use crate::error::ErrorKind;
use crate::provider::{with_retry, FetchProvider};
use crate::tool::{Tool, ToolResult};

/// Tool for fetching page content from URLs.
pub struct WebFetchTool {
    provider: Arc<dyn FetchProvider>,
    recorder: Arc<SourceRecorder>,
}

impl WebFetchTool {
    pub fn new(provider: Arc<dyn FetchProvider>, recorder: Arc<SourceRecorder>) -> Self {
        Self { provider, recorder }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch content from a URL. Returns the page title and extracted text. Use after web_search to read promising results in full."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolResult, anyhow::Error> {
        #[derive(Deserialize)]
        struct Params {
            url: String,
        }

        let params: Params = serde_json::from_value(params)?;

        let page = match with_retry("web_fetch", || self.provider.fetch(&params.url)).await {
            Ok(page) => page,
            Err(e) => {
                let kind = if e.is_transient() { ErrorKind::Transient } else { ErrorKind::Permanent };
                return Ok(ToolResult::classified_error(kind, format!("fetch failed: {}", e)));
            }
        };

        self.recorder.record(&params.url, &page.title, "");

        let output = if page.title.is_empty() {
            page.text.clone()
        } else {
            format!("Title: {}\n\n{}", page.title, page.text)
        };

        Ok(ToolResult::text(output).with_metadata("url", &params.url))
    }
}
