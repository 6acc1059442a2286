// ABOUTME: Anthropic Claude API client implementation.
// ABOUTME: Implements the ChatModel trait with SSE streaming support.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use super::{ChatModel, ContentBlock, Request, Response, StopReason, StreamEvent, Usage};
use crate::error::LlmError;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic API request format.
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

/// Anthropic message format.
#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContent>,
}

/// Anthropic content block.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContent {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    ToolResult { tool_use_id: String, content: String, #[serde(default)] is_error: bool },
}

/// Anthropic tool definition.
#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

/// Anthropic API response format.
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    model: String,
    usage: AnthropicUsage,
}

/// Anthropic usage stats.
#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Anthropic API error response.
#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

/// One SSE data payload from the streaming Messages API.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SsePayload {
    MessageStart { message: SseMessageStart },
    ContentBlockStart { index: usize, content_block: AnthropicContent },
    ContentBlockDelta { index: usize, delta: SseDelta },
    ContentBlockStop { index: usize },
    MessageDelta {
        delta: SseMessageDelta,
        #[serde(default)]
        usage: AnthropicUsage,
    },
    MessageStop,
    Ping,
    Error { error: AnthropicErrorDetail },
}

#[derive(Debug, Deserialize)]
struct SseMessageStart {
    id: String,
    model: String,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct SseMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

fn parse_stop_reason(raw: Option<&str>) -> StopReason {
    match raw {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

fn convert_request(req: &Request, stream: bool) -> AnthropicRequest {
    AnthropicRequest {
        model: req.model.clone(),
        messages: req
            .messages
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    super::Role::User => "user".to_string(),
                    super::Role::Assistant => "assistant".to_string(),
                },
                content: m.content.iter().map(convert_block).collect(),
            })
            .collect(),
        max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: req.system.clone(),
        temperature: req.temperature,
        tools: req
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect(),
        stream: stream.then_some(true),
    }
}

fn convert_block(block: &ContentBlock) -> AnthropicContent {
    match block {
        ContentBlock::Text { text } => AnthropicContent::Text { text: text.clone() },
        ContentBlock::ToolUse { id, name, input } => AnthropicContent::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentBlock::ToolResult { tool_use_id, content, is_error } => {
            AnthropicContent::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: content.clone(),
                is_error: *is_error,
            }
        }
    }
}

fn convert_content(content: AnthropicContent) -> ContentBlock {
    match content {
        AnthropicContent::Text { text } => ContentBlock::Text { text },
        AnthropicContent::ToolUse { id, name, input } => {
            ContentBlock::ToolUse { id, name, input }
        }
        AnthropicContent::ToolResult { tool_use_id, content, is_error } => {
            ContentBlock::ToolResult { tool_use_id, content, is_error }
        }
    }
}

/// ChatModel implementation for the Anthropic Messages API.
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl AnthropicClient {
    /// Create a client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            http,
        }
    }

    /// Override the API endpoint (proxies, test servers).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn api_error(response: reqwest::Response) -> LlmError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<AnthropicError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        LlmError::Api { status, message }
    }
}

#[async_trait]
impl ChatModel for AnthropicClient {
    async fn complete(&self, req: &Request) -> Result<Response, LlmError> {
        let body = convert_request(req, false);

        let response = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let parsed: AnthropicResponse = response.json().await?;
        Ok(Response {
            id: parsed.id,
            content: parsed.content.into_iter().map(convert_content).collect(),
            stop_reason: parse_stop_reason(parsed.stop_reason.as_deref()),
            model: parsed.model,
            usage: Usage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            },
        })
    }

    fn stream_completion(
        &self,
        req: &Request,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        let body = convert_request(req, true);
        let api_key = self.api_key.clone();
        let base_url = self.base_url.clone();
        let http = self.http.clone();

        Box::pin(async_stream::try_stream! {
            let response = http
                .post(&base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                Err(Self::api_error(response).await)?;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = futures::StreamExt::next(&mut stream).await {
                let chunk = chunk?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE frames are separated by a blank line.
                while let Some(pos) = buffer.find("\n\n") {
                    let frame = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);

                    for line in frame.lines() {
                        let data = match line.strip_prefix("data: ") {
                            Some(data) => data,
                            None => continue,
                        };
                        let payload: SsePayload = serde_json::from_str(data)?;
                        match payload {
                            SsePayload::MessageStart { message } => {
                                yield StreamEvent::MessageStart {
                                    id: message.id,
                                    model: message.model,
                                };
                                yield StreamEvent::MessageDelta {
                                    stop_reason: None,
                                    usage: Usage {
                                        input_tokens: message.usage.input_tokens,
                                        output_tokens: 0,
                                    },
                                };
                            }
                            SsePayload::ContentBlockStart { index, content_block } => {
                                yield StreamEvent::ContentBlockStart {
                                    index,
                                    block: convert_content(content_block),
                                };
                            }
                            SsePayload::ContentBlockDelta { index, delta } => match delta {
                                SseDelta::TextDelta { text } => {
                                    yield StreamEvent::ContentBlockDelta { index, text };
                                }
                                SseDelta::InputJsonDelta { partial_json } => {
                                    yield StreamEvent::InputJsonDelta { index, partial_json };
                                }
                            },
                            SsePayload::ContentBlockStop { index } => {
                                yield StreamEvent::ContentBlockStop { index };
                            }
                            SsePayload::MessageDelta { delta, usage } => {
                                yield StreamEvent::MessageDelta {
                                    stop_reason: delta
                                        .stop_reason
                                        .as_deref()
                                        .map(|r| parse_stop_reason(Some(r))),
                                    usage: Usage {
                                        input_tokens: usage.input_tokens,
                                        output_tokens: usage.output_tokens,
                                    },
                                };
                            }
                            SsePayload::MessageStop => {
                                yield StreamEvent::MessageStop;
                            }
                            SsePayload::Ping => {}
                            SsePayload::Error { error } => {
                                Err(LlmError::Api { status: 0, message: error.message })?;
                            }
                        }
                    }
                }
            }
        })
    }
}
