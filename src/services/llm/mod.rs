//! LLM capability
//!
//! Provider-agnostic access to OpenAI-compatible chat-completion APIs. The
//! engine treats the LLM as an optional collaborator: every caller has a
//! deterministic path and uses the model only where the config enables it.
//!
//! # Scenarios
//! - Intent classification (fallback behind the keyword layer)
//! - Catalog query selection (ids only, never SQL)
//! - Dashboard narrative (optional alternative to the rule-based narrative)

mod client;
mod models;
mod scenarios;

pub use client::LlmClient;
pub use models::{LlmError, ProviderConfig};
pub use scenarios::classify::{ClassifyRequest, ClassifyResponse, SYSTEM_PROMPT as CLASSIFY_PROMPT};
pub use scenarios::narrative::{
    NarrativeRequest, NarrativeResponse, SYSTEM_PROMPT as NARRATIVE_PROMPT,
};
pub use scenarios::select_queries::{
    MAX_SELECTED_QUERIES, SYSTEM_PROMPT as SELECT_QUERIES_PROMPT, SelectionRequest,
    SelectionResponse,
};
