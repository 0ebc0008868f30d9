//! LLM HTTP client
//!
//! reqwest client for OpenAI-compatible chat-completion APIs. Two providers
//! may be configured; a rate-limited primary fails over to the fallback for
//! the current call. All calls request a JSON object response and honor the
//! request's cancellation token.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::models::{LlmError, ProviderConfig};

pub struct LlmClient {
    http_client: Client,
    primary: ProviderConfig,
    fallback: Option<ProviderConfig>,
}

impl LlmClient {
    pub fn new(primary: ProviderConfig, fallback: Option<ProviderConfig>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build LLM HTTP client: {}. Using defaults.", e);
                Client::default()
            });
        Self { http_client, primary, fallback }
    }

    pub fn provider_name(&self) -> &str {
        &self.primary.name
    }

    /// One chat completion returning the raw JSON-object content string.
    /// Rate limits on the primary provider fail over to the fallback.
    pub async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        match self.call_provider(&self.primary, system_prompt, user_prompt, cancel).await {
            Err(e) if e.is_rate_limit() => {
                let Some(fallback) = &self.fallback else {
                    return Err(e);
                };
                tracing::warn!(
                    "Provider {} rate limited, switching to fallback {}",
                    self.primary.name,
                    fallback.name
                );
                self.call_provider(fallback, system_prompt, user_prompt, cancel).await
            },
            other => other,
        }
    }

    /// Structured completion with the engine-wide repair policy: parse the
    /// reply, and on a validation failure re-ask once with the parser error
    /// attached. The second failure is the caller's problem (they fall back
    /// to their deterministic path).
    pub async fn complete_structured<T: DeserializeOwned>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<T, LlmError> {
        let content = self.complete_json(system_prompt, user_prompt, cancel).await?;
        match serde_json::from_str::<T>(&content) {
            Ok(parsed) => Ok(parsed),
            Err(parse_err) => {
                tracing::warn!("LLM reply failed validation ({}), asking for repair", parse_err);
                let repair_prompt = format!(
                    "Your previous reply was rejected by the JSON validator.\n\
                     Validator error: {parse_err}\n\
                     Previous reply:\n{content}\n\n\
                     Reply again with ONLY the corrected JSON object, no prose."
                );
                let repaired = self.complete_json(system_prompt, &repair_prompt, cancel).await?;
                serde_json::from_str::<T>(&repaired)
                    .map_err(|e| LlmError::ParseError(e.to_string()))
            },
        }
    }

    async fn call_provider(
        &self,
        provider: &ProviderConfig,
        system_prompt: &str,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let chat_request = ChatCompletionRequest {
            model: provider.model_name.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system_prompt.to_string() },
                ChatMessage { role: "user".to_string(), content: user_prompt.to_string() },
            ],
            max_tokens: Some(provider.max_tokens),
            temperature: Some(provider.temperature),
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = format!("{}/chat/completions", provider.api_base.trim_end_matches('/'));
        tracing::debug!("Calling LLM API: {} with model {}", url, provider.model_name);

        let send = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", provider.api_key))
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(provider.timeout_seconds))
            .json(&chat_request)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = send => result.map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(provider.timeout_seconds)
                } else {
                    LlmError::ApiError(e.to_string())
                }
            })?,
        };

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError(format!("API error {}: {}", status, error_text)));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::ParseError("Empty response from LLM".to_string()))
    }
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
