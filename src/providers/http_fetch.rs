// ABOUTME: HTTP page fetch provider with HTML-to-text extraction.
// ABOUTME: Strips scripts and tags, decodes entities, collapses whitespace.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::ProviderError;
use crate::provider::{FetchProvider, FetchedPage};

const MAX_TEXT_LEN: usize = 50_000;

/// FetchProvider backed by a plain HTTP GET.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    /// Create a fetcher with default settings.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("delve/0.1")
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    /// Create with a custom reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Extract the contents of the <title> element, if present.
    fn extract_title(html: &str) -> String {
        // ASCII lowering keeps byte offsets aligned with the original.
        let lower = html.to_ascii_lowercase();
        let Some(start) = lower.find("<title") else {
            return String::new();
        };
        let Some(gt) = lower[start..].find('>') else {
            return String::new();
        };
        let after = &html[start + gt + 1..];
        let end = lower[start + gt + 1..].find("</title>").unwrap_or(0);
        after[..end].trim().to_string()
    }

    /// Simple HTML to text conversion - strips tags and decodes entities.
    fn html_to_text(html: &str) -> String {
        let mut result = html.to_string();

        // Remove script tags with their contents
        while let Some(start) = result.find("<script") {
            if let Some(end) = result[start..].find("</script>") {
                result = format!("{}{}", &result[..start], &result[start + end + 9..]);
            } else {
                break;
            }
        }

        // Remove style tags with their contents
        while let Some(start) = result.find("<style") {
            if let Some(end) = result[start..].find("</style>") {
                result = format!("{}{}", &result[..start], &result[start + end + 8..]);
            } else {
                break;
            }
        }

        // Replace common block elements with newlines
        for tag in &[
            "</p>", "</div>", "</h1>", "</h2>", "</h3>", "</h4>", "</h5>", "</h6>", "<br>",
            "<br/>", "</li>", "</tr>",
        ] {
            result = result.replace(tag, &format!("{}\n", tag));
        }

        // Strip remaining HTML tags
        let mut text = String::new();
        let mut in_tag = false;
        for ch in result.chars() {
            match ch {
                '<' => in_tag = true,
                '>' => in_tag = false,
                _ if !in_tag => text.push(ch),
                _ => {}
            }
        }

        // Decode common HTML entities
        let text = text
            .replace("&nbsp;", " ")
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&apos;", "'");

        // Collapse whitespace and trim
        let mut collapsed = String::new();
        let mut prev_whitespace = false;
        let mut prev_newline = false;

        for ch in text.chars() {
            if ch == '\n' {
                if !prev_newline {
                    collapsed.push('\n');
                    prev_newline = true;
                }
                prev_whitespace = true;
            } else if ch.is_whitespace() {
                if !prev_whitespace {
                    collapsed.push(' ');
                    prev_whitespace = true;
                }
                prev_newline = false;
            } else {
                collapsed.push(ch);
                prev_whitespace = false;
                prev_newline = false;
            }
        }

        collapsed.trim().to_string()
    }
}

#[async_trait]
impl FetchProvider for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ProviderError> {
        let url = if !url.starts_with("http://") && !url.starts_with("https://") {
            format!("https://{}", url)
        } else {
            url.to_string()
        };

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

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let (title, text) = if content_type.contains("text/html") {
            (Self::extract_title(&body), Self::html_to_text(&body))
        } else {
            (String::new(), body)
        };

        let text = if text.len() > MAX_TEXT_LEN {
            let cut = text
                .char_indices()
                .take_while(|(i, _)| *i < MAX_TEXT_LEN)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            format!("{}...\n\n[Content truncated at {} characters]", &text[..cut], MAX_TEXT_LEN)
        } else {
            text
        };

        Ok(FetchedPage {
            title,
            text,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_html_to_text() {
        let html = "<html><body><h1>Title</h1><p>Hello <b>world</b>!</p></body></html>";
        let text = HttpFetcher::html_to_text(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Hello world!"));
        assert!(!text.contains("<"));
    }

    #[test]
    fn test_html_to_text_strips_scripts() {
        let html = "<html><script>alert('xss')</script><body>Content</body></html>";
        let text = HttpFetcher::html_to_text(html);
        assert!(text.contains("Content"));
        assert!(!text.contains("alert"));
    }

    #[test]
    fn test_extract_title() {
        let html = "<html><head><title>  My Page </title></head><body>x</body></html>";
        assert_eq!(HttpFetcher::extract_title(html), "My Page");
        assert_eq!(HttpFetcher::extract_title("<html><body>none</body></html>"), "");
    }

    #[test]
    fn test_html_entities() {
        let text = HttpFetcher::html_to_text("&lt;tag&gt; &amp; &quot;quoted&quot;");
        assert!(text.contains("<tag>"));
        assert!(text.contains("&"));
        assert!(text.contains("\"quoted\""));
    }

    #[tokio::test]
    async fn test_fetch_html_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    "<html><head><title>Paris</title></head><body><p>Paris is the capital of France.</p></body></html>",
                    "text/html",
                ),
            )
            .mount(&server)
            .await;

        let page = HttpFetcher::new().fetch(&server.uri()).await.unwrap();
        assert_eq!(page.title, "Paris");
        assert!(page.text.contains("capital of France"));
    }

    #[tokio::test]
    async fn test_fetch_404_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = HttpFetcher::new().fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Http { status: 404, .. }));
    }
}
