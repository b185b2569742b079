//! OpenAI-compatible LLM provider.
//!
//! Supports OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any
//! endpoint that follows the OpenAI chat completions API format.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::providers::LlmProvider;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};

/// OpenAI-compatible LLM provider.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiCompatibleProvider {
    /// Create a new provider with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    /// Convert messages to OpenAI JSON format.
    fn messages_to_json(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| json!({ "role": msg.role.as_str(), "content": msg.content }))
            .collect()
    }

    fn parse_response(body: &Value, model: &str) -> Result<CompletionResponse, LlmError> {
        let choice =
            body.get("choices")
                .and_then(|c| c.get(0))
                .ok_or_else(|| LlmError::ResponseParse {
                    message: "No choices in response".to_string(),
                })?;

        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No message in choice".to_string(),
            })?;

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Message has no text content".to_string(),
            })?;

        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .map(|s| s.to_string());

        let usage = body
            .get("usage")
            .map(|u| TokenUsage {
                input_tokens: u.get("prompt_tokens").and_then(|t| t.as_u64()).unwrap_or(0)
                    as usize,
                output_tokens: u
                    .get("completion_tokens")
                    .and_then(|t| t.as_u64())
                    .unwrap_or(0) as usize,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            message: Message::assistant(content),
            usage,
            model: body
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(model)
                .to_string(),
            finish_reason,
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed");
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                // Try to extract the wait from "Rate limit... try again in Xs"
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ").last().and_then(|s| {
                            s.trim_end_matches('.')
                                .trim_end_matches('s')
                                .parse::<u64>()
                                .ok()
                        })
                    })
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            408 | 504 => LlmError::Timeout { timeout_secs: 0 },
            s if s >= 500 => LlmError::Connection {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }

    fn map_transport_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else if e.is_connect() || e.is_request() {
            LlmError::Connection {
                message: e.to_string(),
            }
        } else {
            LlmError::ApiRequest {
                message: format!("Request failed: {}", e),
            }
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": Self::messages_to_json(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        debug!(url = %url, model = %self.model, "Sending OpenAI completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        Self::parse_response(&json, &self.model)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
