//! Routing decision produced by the intent classifier
//!
//! The decision drives which pipeline stages execute: conversational and
//! clarification answers short-circuit the pipeline, data/dashboard requests
//! continue into the data agent.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// What the pipeline should do with the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    /// Greeting / small talk — answered directly, no data stages run.
    Conversational,
    /// Numbers only, no visualization requested.
    DataOnly,
    /// Full dashboard with charts and narrative.
    Dashboard,
    /// The question is too ambiguous to act on.
    Clarification,
}

impl RouteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversational => "conversational",
            Self::DataOnly => "data_only",
            Self::Dashboard => "dashboard",
            Self::Clarification => "clarification",
        }
    }
}

/// Business domain the question is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Sales,
    Inventory,
    Conversations,
    Unknown,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Inventory => "inventory",
            Self::Conversations => "conversations",
            Self::Unknown => "unknown",
        }
    }
}

/// Output of the intent classifier.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoutingDecision {
    pub kind: RouteKind,
    pub domain: Domain,
    /// Confidence in [0, 1]. Deterministic matches score high, LLM fallback
    /// defaults score low.
    pub confidence: f64,
    pub rationale: String,
    /// Pre-baked reply for `conversational` decisions and the prompt text
    /// for `clarification` decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_answer: Option<String>,
}

impl RoutingDecision {
    pub fn needs_data(&self) -> bool {
        matches!(self.kind, RouteKind::DataOnly | RouteKind::Dashboard)
    }
}
