// ABOUTME: WebSearchTool - the agent-facing search tool.
// ABOUTME: Bridges a SearchProvider to the loop and records hits as sources.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::recorder::SourceRecorder;
use crate::error::ErrorKind;
use crate::provider::{with_retry, SearchProvider};
use crate::tool::{Tool, ToolResult};

const MAX_RESULTS_CEILING: usize = 10;

/// Tool for performing web searches.
///
/// Every returned hit is dedup-joined into the run's SourceTable via the
/// agent's recorder, so citation indices exist before synthesis begins.
pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
    recorder: Arc<SourceRecorder>,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, recorder: Arc<SourceRecorder>) -> Self {
        Self { provider, recorder }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns a list of search results with titles, URLs, and snippets."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default 10, max 10)",
                    "default": 10
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolResult, anyhow::Error> {
        #[derive(Deserialize)]
        struct Params {
            query: String,
            #[serde(default = "default_max_results")]
            max_results: usize,
        }

        fn default_max_results() -> usize {
            MAX_RESULTS_CEILING
        }

        let params: Params = serde_json::from_value(params)?;
        let max_results = params.max_results.min(MAX_RESULTS_CEILING);

        let hits = match with_retry("web_search", || {
            self.provider.search(&params.query, max_results)
        })
        .await
        {
            Ok(hits) => hits,
            Err(e) => {
                let kind = if e.is_transient() { ErrorKind::Transient } else { ErrorKind::Permanent };
                return Ok(ToolResult::classified_error(kind, format!("search failed: {}", e)));
            }
        };

        if hits.is_empty() {
            return Ok(ToolResult::text("No results found.").with_metadata("result_count", 0));
        }

        let mut output = format!("Found {} results for \"{}\":\n\n", hits.len(), params.query);
        for (i, hit) in hits.iter().enumerate() {
            self.recorder.record(&hit.url, &hit.title, &hit.snippet);
            output.push_str(&format!(
                "{}. {}\n   {}\n   {}\n\n",
                i + 1,
                hit.title,
                hit.url,
                if hit.snippet.is_empty() { "(no snippet)" } else { &hit.snippet }
            ));
        }

        Ok(ToolResult::text(output).with_metadata("result_count", hits.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::SearchHit;
    use crate::source::SourceTable;

    struct CannedSearch {
        hits: Vec<SearchHit>,
    }

    #[async_trait]
    impl SearchProvider for CannedSearch {
        async fn search(
            &self,
            _query: &str,
            max_results: usize,
        ) -> Result<Vec<SearchHit>, ProviderError> {
            Ok(self.hits.iter().take(max_results).cloned().collect())
        }
    }

    struct FailingSearch;

    #[async_trait]
    impl SearchProvider for FailingSearch {
        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
        ) -> Result<Vec<SearchHit>, ProviderError> {
            Err(ProviderError::Malformed("not json".into()))
        }
    }

    fn recorder(table: &Arc<SourceTable>) -> Arc<SourceRecorder> {
        Arc::new(SourceRecorder::new(Arc::clone(table), "sub-1", 100))
    }

    #[tokio::test]
    async fn test_search_records_sources() {
        let table = Arc::new(SourceTable::new());
        let tool = WebSearchTool::new(
            Arc::new(CannedSearch {
                hits: vec![SearchHit {
                    url: "https://example.com/paris".into(),
                    title: "Paris".into(),
                    snippet: "Capital of France".into(),
                }],
            }),
            recorder(&table),
        );

        let result = tool
            .execute(serde_json::json!({"query": "capital of france"}))
            .await
            .unwrap();

        assert!(!result.is_error);
        assert!(result.content.contains("https://example.com/paris"));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_results_is_success() {
        let table = Arc::new(SourceTable::new());
        let tool = WebSearchTool::new(Arc::new(CannedSearch { hits: vec![] }), recorder(&table));

        let result = tool.execute(serde_json::json!({"query": "xyzzy"})).await.unwrap();
        assert!(!result.is_error);
        assert!(result.content.contains("No results"));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_classified() {
        let table = Arc::new(SourceTable::new());
        let tool = WebSearchTool::new(Arc::new(FailingSearch), recorder(&table));

        let result = tool.execute(serde_json::json!({"query": "q"})).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.error_kind(), Some(ErrorKind::Permanent));
    }

    #[tokio::test]
    async fn test_max_results_clamped() {
        let hits: Vec<SearchHit> = (0..20)
            .map(|i| SearchHit {
                url: format!("https://example.com/{}", i),
                title: format!("Hit {}", i),
                snippet: String::new(),
            })
            .collect();
        let table = Arc::new(SourceTable::new());
        let tool = WebSearchTool::new(Arc::new(CannedSearch { hits }), recorder(&table));

        let result = tool
            .execute(serde_json::json!({"query": "q", "max_results": 50}))
            .await
            .unwrap();
        assert_eq!(result.metadata["result_count"], 10);
    }
}
