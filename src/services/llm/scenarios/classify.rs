//! Intent classification scenario
//!
//! Fallback for questions the deterministic keyword layer could not place.
//! The model returns the same schema the keyword layer produces, so the
//! synthesis step downstream does not care which path classified.

use serde::{Deserialize, Serialize};

use crate::models::{Domain, RouteKind};

pub const SYSTEM_PROMPT: &str = r#"You classify business questions for a commerce analytics assistant.
Questions arrive in Spanish or English.

Return ONLY a JSON object with exactly these fields:
{
  "kind": "conversational" | "data_only" | "dashboard" | "clarification",
  "domain": "sales" | "inventory" | "conversations" | "unknown",
  "confidence": <number between 0 and 1>,
  "rationale": "<one short sentence>"
}

Rules:
- "conversational": greetings, thanks, questions about the assistant itself.
- "dashboard": the user wants to SEE data (trends, charts, comparisons, "how is X going").
- "data_only": the user wants a number or a fact, no visualization.
- "clarification": the question cannot be answered without more detail.
- "domain" is the business area the question is about; use "unknown" only
  when none fits."#;

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyRequest<'a> {
    pub question: &'a str,
    pub chat_context: &'a str,
}

impl ClassifyRequest<'_> {
    pub fn user_prompt(&self) -> String {
        if self.chat_context.is_empty() {
            format!("Question: {}", self.question)
        } else {
            format!(
                "Recent conversation:\n{}\n\nQuestion: {}",
                self.chat_context, self.question
            )
        }
    }
}

/// Structured classification reply; mirrors the deterministic layer's
/// routing decision fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub kind: RouteKind,
    pub domain: Domain,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_from_model_shaped_json() {
        let json = r#"{"kind":"dashboard","domain":"sales","confidence":0.85,
                       "rationale":"asks how sales are going"}"#;
        let parsed: ClassifyResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kind, RouteKind::Dashboard);
        assert_eq!(parsed.domain, Domain::Sales);
    }

    #[test]
    fn malformed_kind_is_a_parse_error() {
        let json = r#"{"kind":"chart","domain":"sales","confidence":0.9}"#;
        assert!(serde_json::from_str::<ClassifyResponse>(json).is_err());
    }
}
