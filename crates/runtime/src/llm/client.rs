//! Chat-completion client for OpenAI-compatible and Anthropic APIs
//!
//! Auto-detects the provider from environment variables and provides a
//! unified request/response interface with JSON-mode support and token
//! usage accounting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenRouter,
    OpenAI,
    Anthropic,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::OpenRouter => write!(f, "OpenRouter"),
            LlmProvider::OpenAI => write!(f, "OpenAI"),
            LlmProvider::Anthropic => write!(f, "Anthropic"),
        }
    }
}

/// Desired response format from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free-form text response
    Text,
    /// JSON object response (model is instructed to return valid JSON)
    JsonObject,
}

/// A single chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub response_format: ResponseFormat,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Token usage for a completed request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Response from a chat-completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Usage,
    /// The model ID that actually served the request
    pub model: String,
}

/// Errors that can occur during an LLM call.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request failed: {0}")]
    Connection(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("Response parse error: {0}")]
    ParseError(String),
}

impl LlmError {
    /// Whether the error is worth retrying with backoff. Rate limits,
    /// 5xx responses, connection failures, and timeouts qualify;
    /// schema violations and other 4xx responses fail fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Provider { .. }
                | LlmError::RateLimited { .. }
                | LlmError::Connection(_)
                | LlmError::Timeout(_)
        )
    }
}

/// Unified trait for chat-completion backends.
///
/// The production implementation is [`HttpChatClient`]; tests substitute
/// scripted clients.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Run a single completion.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Default model ID for logging.
    fn model(&self) -> &str;
}

/// HTTP chat client covering OpenRouter, OpenAI, and Anthropic.
pub struct HttpChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    provider: LlmProvider,
    timeout: Duration,
}

impl HttpChatClient {
    /// Auto-detect the provider from environment variables.
    ///
    /// Checks in order:
    /// 1. `OPENROUTER_API_KEY` → OpenRouter (model from `OPENROUTER_MODEL`)
    /// 2. `OPENAI_API_KEY` → OpenAI (model from `CHAT_MODEL`)
    /// 3. `ANTHROPIC_API_KEY` → Anthropic (model from `ANTHROPIC_MODEL`)
    ///
    /// Returns `None` if no API key is found.
    pub fn from_env(timeout_seconds: u64) -> Option<Self> {
        if let Ok(api_key) = std::env::var("OPENROUTER_API_KEY") {
            let model = std::env::var("OPENROUTER_MODEL")
                .unwrap_or_else(|_| "anthropic/claude-sonnet-4".to_string());
            let base_url = std::env::var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());
            return Self::new(LlmProvider::OpenRouter, api_key, base_url, model, timeout_seconds);
        }

        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            let model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
            let base_url = std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
            return Self::new(LlmProvider::OpenAI, api_key, base_url, model, timeout_seconds);
        }

        if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
            let model = std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5-20250514".to_string());
            let base_url = std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1".to_string());
            return Self::new(LlmProvider::Anthropic, api_key, base_url, model, timeout_seconds);
        }

        tracing::info!("No LLM API key found in environment");
        None
    }

    /// Create a client for an explicit provider.
    pub fn new(
        provider: LlmProvider,
        api_key: String,
        base_url: String,
        model: String,
        timeout_seconds: u64,
    ) -> Option<Self> {
        let timeout = Duration::from_secs(timeout_seconds);
        let client = reqwest::Client::builder().timeout(timeout).build().ok()?;
        tracing::info!("LLM client initialized: provider={} model={}", provider, model);
        Some(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            provider,
            timeout,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    /// Build the request body for OpenAI-compatible APIs (OpenAI, OpenRouter).
    fn build_openai_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user }
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        if request.response_format == ResponseFormat::JsonObject {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        body
    }

    /// Build the request body for the Anthropic Messages API.
    ///
    /// Anthropic has no `response_format` field; JSON mode is enforced by
    /// the prompt contract and post-hoc validation instead.
    fn build_anthropic_body(&self, request: &ChatRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system,
            "messages": [
                { "role": "user", "content": request.user }
            ]
        })
    }

    fn parse_openai_response(&self, resp: &serde_json::Value) -> Result<ChatResponse, LlmError> {
        let content = resp
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmError::ParseError("No content in response choices".into()))?
            .to_string();

        let usage = resp
            .get("usage")
            .map(|u| Usage {
                input_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                output_tokens: u
                    .get("completion_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
            })
            .unwrap_or_default();

        let model = resp
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.model)
            .to_string();

        Ok(ChatResponse {
            content,
            usage,
            model,
        })
    }

    fn parse_anthropic_response(&self, resp: &serde_json::Value) -> Result<ChatResponse, LlmError> {
        let blocks = resp
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| LlmError::ParseError("No content in response".into()))?;

        let mut content = String::new();
        for block in blocks {
            if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(text);
                }
            }
        }

        let usage = resp
            .get("usage")
            .map(|u| Usage {
                input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                output_tokens: u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            })
            .unwrap_or_default();

        let model = resp
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.model)
            .to_string();

        Ok(ChatResponse {
            content,
            usage,
            model,
        })
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let is_anthropic = self.provider == LlmProvider::Anthropic;

        let (url, body) = if is_anthropic {
            (
                format!("{}/messages", self.base_url),
                self.build_anthropic_body(request),
            )
        } else {
            (
                format!("{}/chat/completions", self.base_url),
                self.build_openai_body(request),
            )
        };

        let request_builder = if is_anthropic {
            self.client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .json(&body)
        } else {
            self.client
                .post(&url)
                .header("authorization", format!("Bearer {}", self.api_key))
                .header("content-type", "application/json")
                .json(&body)
        };

        let start = std::time::Instant::now();
        let response = request_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.timeout)
            } else {
                LlmError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(LlmError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            if status.is_client_error() {
                return Err(LlmError::InvalidRequest {
                    status: status.as_u16(),
                    message,
                });
            }
            return Err(LlmError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("JSON parse error: {}", e)))?;

        let parsed = if is_anthropic {
            self.parse_anthropic_response(&resp_json)?
        } else {
            self.parse_openai_response(&resp_json)?
        };

        tracing::debug!(
            provider = %self.provider,
            model = %parsed.model,
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            latency = ?start.elapsed(),
            "LLM completion"
        );

        Ok(parsed)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(provider: LlmProvider) -> HttpChatClient {
        HttpChatClient::new(
            provider,
            "test-key".into(),
            "https://example.invalid/v1".into(),
            "test-model".into(),
            30,
        )
        .unwrap()
    }

    #[test]
    fn test_openai_body_includes_json_mode() {
        let client = test_client(LlmProvider::OpenAI);
        let request = ChatRequest {
            system: "sys".into(),
            user: "usr".into(),
            response_format: ResponseFormat::JsonObject,
            temperature: 0.3,
            max_tokens: 1024,
        };
        let body = client.build_openai_body(&request);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
    }

    #[test]
    fn test_openai_body_omits_format_for_text() {
        let client = test_client(LlmProvider::OpenAI);
        let request = ChatRequest {
            system: "sys".into(),
            user: "usr".into(),
            response_format: ResponseFormat::Text,
            temperature: 0.3,
            max_tokens: 1024,
        };
        let body = client.build_openai_body(&request);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_anthropic_body_shape() {
        let client = test_client(LlmProvider::Anthropic);
        let request = ChatRequest {
            system: "sys".into(),
            user: "usr".into(),
            response_format: ResponseFormat::JsonObject,
            temperature: 0.1,
            max_tokens: 512,
        };
        let body = client.build_anthropic_body(&request);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_parse_openai_response() {
        let client = test_client(LlmProvider::OpenAI);
        let resp = serde_json::json!({
            "choices": [{
                "message": { "role": "assistant", "content": "Hello!" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 },
            "model": "gpt-4o"
        });
        let parsed = client.parse_openai_response(&resp).unwrap();
        assert_eq!(parsed.content, "Hello!");
        assert_eq!(parsed.usage.input_tokens, 10);
        assert_eq!(parsed.usage.output_tokens, 5);
        assert_eq!(parsed.model, "gpt-4o");
    }

    #[test]
    fn test_parse_anthropic_response_joins_text_blocks() {
        let client = test_client(LlmProvider::Anthropic);
        let resp = serde_json::json!({
            "content": [
                {"type": "text", "text": "part one"},
                {"type": "text", "text": "part two"}
            ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 15, "output_tokens": 20 },
            "model": "claude-sonnet-4-5-20250514"
        });
        let parsed = client.parse_anthropic_response(&resp).unwrap();
        assert_eq!(parsed.content, "part one\npart two");
        assert_eq!(parsed.usage.input_tokens, 15);
    }

    #[test]
    fn test_parse_openai_response_without_content_errors() {
        let client = test_client(LlmProvider::OpenAI);
        let resp = serde_json::json!({"choices": []});
        assert!(matches!(
            client.parse_openai_response(&resp),
            Err(LlmError::ParseError(_))
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::RateLimited { retry_after_ms: 500 }.is_retryable());
        assert!(LlmError::Provider {
            status: 503,
            message: "overloaded".into()
        }
        .is_retryable());
        assert!(LlmError::Connection("reset".into()).is_retryable());
        assert!(!LlmError::InvalidRequest {
            status: 400,
            message: "bad schema".into()
        }
        .is_retryable());
        assert!(!LlmError::ParseError("garbage".into()).is_retryable());
    }
}
