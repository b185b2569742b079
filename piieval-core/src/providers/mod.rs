//! LLM provider abstraction.
//!
//! Defines the `LlmProvider` trait that the judge and the redactor are built
//! on, an OpenAI-compatible HTTP implementation, and a scripted mock for
//! tests and offline runs.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatibleProvider;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Create a provider for the given configuration and API key.
pub fn create_provider(
    config: &LlmConfig,
    api_key: String,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "openai" | "openai_compat" | "ollama" | "vllm" | "azure" => Ok(Arc::new(
            OpenAiCompatibleProvider::new_with_key(config, api_key)?,
        )),
        other => Err(LlmError::ApiRequest {
            message: format!("Unsupported provider: {other}"),
        }),
    }
}

/// A provider that replays scripted outcomes in order.
///
/// Once the script is exhausted the last response is repeated, so a mock with
/// a single response can serve any number of calls. Every request is kept
/// for inspection.
pub struct MockLlmProvider {
    model: String,
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Mutex<Option<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let provider = Self::new();
        provider.queue_response(text);
        provider
    }

    /// Queue a successful response.
    pub fn queue_response(&self, text: &str) {
        self.lock_script().push_back(Ok(text.to_string()));
    }

    /// Queue an error.
    pub fn queue_error(&self, error: LlmError) {
        self.lock_script().push_back(Err(error));
    }

    /// Number of `complete` calls received so far.
    pub fn call_count(&self) -> usize {
        self.lock_requests().len()
    }

    /// The messages of every request received so far.
    pub fn received_messages(&self) -> Vec<Vec<Message>> {
        self.lock_requests()
            .iter()
            .map(|r| r.messages.clone())
            .collect()
    }

    /// Create a simple text response.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, LlmError>>> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<CompletionRequest>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.lock_requests().push(request);

        let next = self.lock_script().pop_front();
        let mut fallback = self.fallback.lock().unwrap_or_else(|e| e.into_inner());
        match next {
            Some(Ok(text)) => {
                *fallback = Some(text.clone());
                Ok(Self::text_response(&text))
            }
            Some(Err(e)) => Err(e),
            None => match fallback.as_deref() {
                Some(text) => Ok(Self::text_response(text)),
                None => Err(LlmError::Connection {
                    message: "mock script exhausted".to_string(),
                }),
            },
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replays_script_then_repeats_last() {
        let mock = MockLlmProvider::new();
        mock.queue_error(LlmError::Timeout { timeout_secs: 1 });
        mock.queue_response("ok");

        assert!(mock.complete(CompletionRequest::default()).await.is_err());
        for _ in 0..3 {
            let response = mock.complete(CompletionRequest::default()).await.unwrap();
            assert_eq!(response.message.content, "ok");
        }
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test]
    async fn test_mock_without_script_fails() {
        let mock = MockLlmProvider::new();
        assert!(matches!(
            mock.complete(CompletionRequest::default()).await,
            Err(LlmError::Connection { .. })
        ));
    }

    #[test]
    fn test_create_provider_rejects_unknown() {
        let config = LlmConfig {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        assert!(create_provider(&config, "key".to_string()).is_err());
    }

    #[test]
    fn test_create_provider_openai() {
        let provider = create_provider(&LlmConfig::default(), "key".to_string()).unwrap();
        assert_eq!(provider.model_name(), "gpt-4o");
    }
}
