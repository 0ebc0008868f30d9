//! LLM provider configuration and error types

use serde::{Deserialize, Serialize};

/// One configured OpenAI-compatible provider. The engine can carry two
/// (primary + fallback) and switches on rate-limit responses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub name: String,
    pub api_base: String,
    pub model_name: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_max_tokens() -> u32 {
    2048
}
fn default_temperature() -> f64 {
    0.1
}
fn default_timeout() -> u64 {
    60
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("no LLM provider configured")]
    NoProviderConfigured,

    #[error("LLM API error: {0}")]
    ApiError(String),

    #[error("LLM response parsing error: {0}")]
    ParseError(String),

    #[error("LLM timeout after {0}s")]
    Timeout(u64),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}
