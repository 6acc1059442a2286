// ABOUTME: DuckDuckGo HTML search provider.
// ABOUTME: Scrapes the html.duckduckgo.com endpoint into ranked SearchHits.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::provider::{SearchHit, SearchProvider};

/// SearchProvider backed by DuckDuckGo's HTML endpoint.
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    base_url: String,
}

impl Default for DuckDuckGoSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl DuckDuckGoSearch {
    /// Create a provider with default settings.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; delve/0.1)")
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: "https://html.duckduckgo.com/html/".to_string(),
        }
    }

    /// Create with a custom reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: "https://html.duckduckgo.com/html/".to_string(),
        }
    }

    /// Override the endpoint (test servers).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Parse DuckDuckGo HTML search results.
    fn parse_results(html: &str) -> Vec<SearchHit> {
        let mut results = Vec::new();
        let mut remaining = html;

        while let Some(result_start) = remaining.find("class=\"result__a\"") {
            remaining = &remaining[result_start..];

            // Extract URL from href
            let url = if let Some(href_start) = remaining.find("href=\"") {
                let href_content = &remaining[href_start + 6..];
                if let Some(href_end) = href_content.find('"') {
                    let raw_url = &href_content[..href_end];
                    // DDG wraps destinations in a uddg= redirect parameter
                    if let Some(uddg_pos) = raw_url.find("uddg=") {
                        let encoded = &raw_url[uddg_pos + 5..];
                        let encoded = match encoded.find('&') {
                            Some(amp_pos) => &encoded[..amp_pos],
                            None => encoded,
                        };
                        urlencoding::decode(encoded).unwrap_or_default().to_string()
                    } else {
                        raw_url.to_string()
                    }
                } else {
                    remaining = &remaining[1..];
                    continue;
                }
            } else {
                remaining = &remaining[1..];
                continue;
            };

            // Extract title (text between > and </a>)
            let title = if let Some(gt_pos) = remaining.find('>') {
                let after_gt = &remaining[gt_pos + 1..];
                if let Some(end_a) = after_gt.find("</a>") {
                    Self::strip_tags(&after_gt[..end_a])
                } else {
                    String::new()
                }
            } else {
                String::new()
            };

            // Extract snippet from result__snippet class
            let snippet = if let Some(snippet_start) = remaining.find("class=\"result__snippet\"") {
                let snippet_content = &remaining[snippet_start..];
                if let Some(gt_pos) = snippet_content.find('>') {
                    let after_gt = &snippet_content[gt_pos + 1..];
                    if let Some(end_div) = after_gt.find("</") {
                        Self::strip_tags(&after_gt[..end_div])
                    } else {
                        String::new()
                    }
                } else {
                    String::new()
                }
            } else {
                String::new()
            };

            if !url.is_empty() && !title.is_empty() {
                results.push(SearchHit {
                    title: title.trim().to_string(),
                    url,
                    snippet: snippet.trim().to_string(),
                });
            }

            match remaining.get(1..) {
                Some(next) => remaining = next,
                None => break,
            }
        }

        results
    }

    fn strip_tags(html: &str) -> String {
        let mut text = String::new();
        let mut in_tag = false;
        for ch in html.chars() {
            match ch {
                '<' => in_tag = true,
                '>' => in_tag = false,
                _ if !in_tag => text.push(ch),
                _ => {}
            }
        }
        text.replace("&nbsp;", " ")
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let url = format!("{}?q={}", self.base_url, urlencoding::encode(query));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited { retry_after_ms: None });
        }
        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let results = Self::parse_results(&html);
        Ok(results.into_iter().take(max_results).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE: &str = r##"
        <div class="result">
          <a class="result__a" href="/l/?uddg=https%3A%2F%2Fexample.com%2Frust&rut=x">The <b>Rust</b> Language</a>
          <a class="result__snippet" href="#">A language empowering everyone.</a>
        </div>
        <div class="result">
          <a class="result__a" href="https://other.example/page">Other Page</a>
        </div>
    "##;

    #[test]
    fn test_parse_unwraps_uddg_redirects() {
        let results = DuckDuckGoSearch::parse_results(SAMPLE);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://example.com/rust");
        assert_eq!(results[0].title, "The Rust Language");
        assert_eq!(results[0].snippet, "A language empowering everyone.");
        assert_eq!(results[1].url, "https://other.example/page");
    }

    #[test]
    fn test_parse_empty_results() {
        let results = DuckDuckGoSearch::parse_results("<html><body>No results</body></html>");
        assert!(results.is_empty());
    }

    #[test]
    fn test_strip_tags() {
        let text = DuckDuckGoSearch::strip_tags("<b>Bold</b> &amp; <i>italic</i>");
        assert_eq!(text, "Bold & italic");
    }

    #[tokio::test]
    async fn test_search_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE))
            .mount(&server)
            .await;

        let provider = DuckDuckGoSearch::new().base_url(format!("{}/html/", server.uri()));
        let hits = provider.search("rust language", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://example.com/rust");
    }

    #[tokio::test]
    async fn test_search_rate_limit_maps_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = DuckDuckGoSearch::new().base_url(format!("{}/html/", server.uri()));
        let err = provider.search("anything", 5).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }
}
