//! LLM client abstraction.
//!
//! The report narrative comes from one chat-completion call per run. The
//! [`LlmClient`] trait hides the backend so the pipeline can run against the
//! HTTP gateway in production and [`MockLlmClient`] in tests.
//!
//! # Architecture
//!
//! The trait is designed to be:
//!
//! - **Object-safe**: the pipeline holds a `Box<dyn LlmClient>`
//! - **Thread-safe**: `Send + Sync` bounds for use across await points
//! - **Async-first**: completion is a network call
//!
//! # Example
//!
//! ```rust,ignore
//! use qreport::llm::{CompletionRequest, GenerationParams, LlmClient, MockLlmClient};
//!
//! let client: Box<dyn LlmClient> = Box::new(MockLlmClient::new().with_response("# Report"));
//! let request = CompletionRequest::new("Summarise the week", GenerationParams::default());
//! let completion = client.complete(&request).await?;
//! ```

pub mod gateway;

pub use gateway::{calculate_backoff, GatewayClient, GatewayError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// System message sent with every report request.
pub const SYSTEM_PROMPT: &str = "You are a senior quality engineer creating comprehensive quality \
reports for software teams. Provide actionable insights and clear summaries.";

/// Sampling parameters for one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 2000,
            temperature: 0.3,
            top_p: 0.9,
        }
    }
}

/// A prompt plus the parameters to generate with.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Optional system message.
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    pub params: GenerationParams,
}

impl CompletionRequest {
    /// Request with the default report system message.
    #[must_use]
    pub fn new(prompt: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            system: Some(SYSTEM_PROMPT.to_string()),
            prompt: prompt.into(),
            params,
        }
    }

    /// Drop or replace the system message.
    #[must_use]
    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }
}

/// Text returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Model reported by the backend, or the requested one.
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// Abstraction for chat-completion backends.
///
/// Implementations must be `Send + Sync`. Errors are always
/// [`GatewayError`]s so the CLI can print a remediation hint.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send `request` and return the generated text.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] when credentials are missing, the backend
    /// rejects them, the network fails, the call times out, the server errors
    /// or the response cannot be understood.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError>;

    /// Human-readable backend identifier.
    fn model_name(&self) -> &str;
}

/// Mock LLM client for testing.
///
/// Returns a canned response, optionally failing the first N calls, and
/// records every prompt it receives.
///
/// ```rust,ignore
/// let client = MockLlmClient::new()
///     .with_response("Test response")
///     .with_fail_count(1, GatewayError::Timeout { timeout_secs: 1 });
/// ```
#[derive(Debug)]
pub struct MockLlmClient {
    /// Response to return from `complete`.
    response: String,
    /// Error to return on every call (if set).
    error: Option<GatewayError>,
    model: String,
    call_count: AtomicU32,
    /// Number of calls to fail before succeeding.
    fail_count: AtomicU32,
    fail_error: Option<GatewayError>,
    prompts: Mutex<Vec<String>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self {
            response: String::new(),
            error: None,
            model: "mock-llm".to_string(),
            call_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(0),
            fail_error: None,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

impl MockLlmClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response to return.
    #[must_use]
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Fail every call with `error`.
    #[must_use]
    pub fn with_error(mut self, error: GatewayError) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn with_model_name(mut self, name: &str) -> Self {
        self.model = name.to_string();
        self
    }

    /// Fail the first `count` calls with `error`, then succeed.
    #[must_use]
    pub fn with_fail_count(mut self, count: u32, error: GatewayError) -> Self {
        self.fail_count = AtomicU32::new(count);
        self.fail_error = Some(error);
        self
    }

    /// Number of times `complete` was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }

        let remaining = self.fail_count.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_count.fetch_sub(1, Ordering::SeqCst);
            return Err(self.fail_error.clone().unwrap_or(GatewayError::Connection {
                message: "mock failure".to_string(),
            }));
        }

        if let Some(ref error) = self.error {
            return Err(error.clone());
        }

        Ok(Completion {
            text: self.response.clone(),
            model: self.model.clone(),
            prompt_tokens: None,
            completion_tokens: None,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest::new("weekly data", GenerationParams::default())
    }

    #[test]
    fn test_default_generation_params() {
        let params = GenerationParams::default();
        assert_eq!(params.max_tokens, 2000);
        assert!((params.temperature - 0.3).abs() < f32::EPSILON);
        assert!((params.top_p - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_request_carries_system_prompt() {
        let req = request();
        assert_eq!(req.system.as_deref(), Some(SYSTEM_PROMPT));
        assert!(req.with_system(None).system.is_none());
    }

    #[tokio::test]
    async fn test_mock_returns_response_and_records_prompt() {
        let client = MockLlmClient::new().with_response("# Report");
        let completion = client.complete(&request()).await.unwrap();
        assert_eq!(completion.text, "# Report");
        assert_eq!(completion.model, "mock-llm");
        assert_eq!(client.call_count(), 1);
        assert_eq!(client.prompts(), vec!["weekly data".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_fail_count_then_success() {
        let client = MockLlmClient::new()
            .with_response("ok")
            .with_fail_count(2, GatewayError::Timeout { timeout_secs: 1 });

        assert!(client.complete(&request()).await.is_err());
        assert!(client.complete(&request()).await.is_err());
        assert_eq!(client.complete(&request()).await.unwrap().text, "ok");
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_permanent_error() {
        let client = MockLlmClient::new().with_error(GatewayError::AuthenticationFailed {
            message: "bad key".to_string(),
        });
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationFailed { .. }));
    }

    #[test]
    fn test_trait_is_object_safe() {
        let client: Box<dyn LlmClient> = Box::new(MockLlmClient::new().with_model_name("m"));
        assert_eq!(client.model_name(), "m");
    }
}
