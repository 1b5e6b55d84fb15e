//! Chat-completions gateway client.
//!
//! [`GatewayClient`] posts an OpenAI-style chat-completions body to the
//! configured endpoint with a bearer key read from the environment. Transient
//! failures (connection, timeout, 5xx, 429) are retried with exponential
//! backoff up to `max_retries` times; authentication, request and
//! response-shape errors fail immediately.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Completion, CompletionRequest, LlmClient};
use crate::config::LlmSettings;

/// Upper bound on any single backoff delay.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Multiplier between consecutive delays.
pub const BACKOFF_MULTIPLIER: u64 = 2;

// =============================================================================
// Gateway Errors
// =============================================================================

/// Errors from the LLM gateway. Any of these aborts the run without
/// writing a report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The key variable is unset or empty.
    #[error("LLM gateway key not found in environment variable '{env_var}'")]
    MissingCredentials { env_var: String },

    /// 401/403 from the gateway.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// 429 from the gateway.
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// 4xx other than auth and rate limiting.
    #[error("Gateway rejected the request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    /// 5xx from the gateway.
    #[error("Gateway server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// 200 with a body that has no completion text.
    #[error("Malformed gateway response: {message}")]
    MalformedResponse { message: String },
}

impl GatewayError {
    /// True for failures worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::Timeout { .. }
                | Self::Connection { .. }
        )
    }

    /// Delay requested by the server, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// Classify a non-success HTTP response.
    #[must_use]
    pub fn from_response(status: u16, body: &str, retry_after_secs: Option<u64>) -> Self {
        let message = error_message(body);
        match status {
            401 | 403 => Self::AuthenticationFailed { message },
            429 => Self::RateLimited {
                message,
                retry_after_secs,
            },
            500..=599 => Self::ServerError { status, message },
            _ => Self::InvalidRequest { status, message },
        }
    }

    /// Operator-facing fix for the failure.
    #[must_use]
    pub fn remediation(&self) -> String {
        match self {
            Self::MissingCredentials { env_var } => {
                format!("Set {env_var} in the environment or in the project's .env file")
            }
            Self::AuthenticationFailed { .. } => {
                "The gateway rejected the key: refresh LLM_GW_EXPRESS_KEY (or the variable named by `llm.api_key_env`)".to_string()
            }
            Self::RateLimited { .. } => {
                "The gateway is rate limiting this key; wait a few minutes and retry".to_string()
            }
            Self::InvalidRequest { .. } => {
                "Check `llm.model` and `llm.max_tokens`, or lower `prompt.max_chars`".to_string()
            }
            Self::ServerError { .. } | Self::MalformedResponse { .. } => {
                "The gateway is unhealthy; retry later".to_string()
            }
            Self::Connection { .. } => {
                "Check network access to `llm.endpoint` (VPN, proxy, QREPORT_LLM_ENDPOINT)".to_string()
            }
            Self::Timeout { .. } => {
                "Raise `llm.timeout_secs` or lower `prompt.max_chars`".to_string()
            }
        }
    }
}

/// Pull `error.message` out of a JSON error body, else the body itself.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error").and_then(|e| {
                e.get("message")
                    .and_then(|m| m.as_str())
                    .or_else(|| e.as_str())
                    .map(str::to_string)
            })
        })
        .unwrap_or_else(|| body.chars().take(300).collect())
}

// =============================================================================
// Backoff
// =============================================================================

/// Delay before retry `attempt` (1-indexed): `base * 2^(attempt-1)`, capped
/// at [`MAX_BACKOFF_MS`].
///
/// ```rust
/// use qreport::llm::calculate_backoff;
/// use std::time::Duration;
///
/// assert_eq!(calculate_backoff(1, 2000), Duration::from_millis(2000));
/// assert_eq!(calculate_backoff(3, 2000), Duration::from_millis(8000));
/// ```
#[must_use]
pub fn calculate_backoff(attempt: u32, base_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let multiplier = BACKOFF_MULTIPLIER.saturating_pow(exponent);
    let delay = base_ms.saturating_mul(multiplier);
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

// =============================================================================
// Gateway Client
// =============================================================================

/// HTTP client for the chat-completions gateway.
#[derive(Debug)]
pub struct GatewayClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    user_id: Option<String>,
    timeout_secs: u64,
    max_retries: u32,
    retry_base_ms: u64,
}

impl GatewayClient {
    /// Build a client from settings, reading the key (and optional user id)
    /// from the variables the settings name.
    ///
    /// # Errors
    ///
    /// [`GatewayError::MissingCredentials`] when the key variable is unset
    /// or empty; [`GatewayError::Connection`] if the HTTP client cannot be
    /// built.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, GatewayError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GatewayError::MissingCredentials {
                env_var: settings.api_key_env.clone(),
            })?;
        let user_id = std::env::var(&settings.user_id_env)
            .ok()
            .filter(|u| !u.trim().is_empty());
        Self::new(settings, api_key, user_id)
    }

    /// Build a client with an explicit key.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Connection`] if the HTTP client cannot be built.
    pub fn new(
        settings: &LlmSettings,
        api_key: impl Into<String>,
        user_id: Option<String>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("qreport/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Connection {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            endpoint: settings.endpoint.clone(),
            api_key: api_key.into(),
            user_id,
            timeout_secs: settings.timeout_secs,
            max_retries: settings.max_retries,
            retry_base_ms: settings.retry_base_ms,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });
        let body = ChatCompletionBody {
            model: &request.params.model,
            messages,
            max_tokens: request.params.max_tokens,
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            user: self.user_id.as_deref(),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response
            .text()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        if !status.is_success() {
            return Err(GatewayError::from_response(
                status.as_u16(),
                &text,
                retry_after_secs,
            ));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|e| GatewayError::MalformedResponse {
                message: e.to_string(),
            })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| GatewayError::MalformedResponse {
                message: "response has no completion text".to_string(),
            })?;

        Ok(Completion {
            text: content,
            model: parsed.model.unwrap_or_else(|| request.params.model.clone()),
            prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }

    fn map_send_error(&self, err: &reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            GatewayError::Connection {
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl LlmClient for GatewayClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        debug!(
            "Sending {} chars to {} (model {})",
            request.prompt.chars().count(),
            self.endpoint,
            request.params.model
        );

        let mut attempt = 0u32;
        loop {
            match self.send_once(request).await {
                Ok(completion) => {
                    info!(
                        "Gateway returned {} chars after {} attempt(s)",
                        completion.text.chars().count(),
                        attempt + 1
                    );
                    return Ok(completion);
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = err
                        .retry_after()
                        .unwrap_or_else(|| calculate_backoff(attempt, self.retry_base_ms))
                        .min(Duration::from_millis(MAX_BACKOFF_MS));
                    warn!(
                        "Gateway call failed ({}); retry {}/{} in {:?}",
                        err, attempt, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn model_name(&self) -> &str {
        "llm-gateway"
    }
}
