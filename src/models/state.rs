//! Per-request pipeline working memory
//!
//! A plain record threaded through the stage functions. Created per request,
//! never shared across requests; the orchestrator mutates it as stages run
//! and freezes it once a terminal state is reached.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::dashboard::DashboardSpec;
use super::payload::DataPayload;
use super::routing::RoutingDecision;

/// Status of one recorded pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Start,
    Progress,
    Done,
    Error,
}

/// One entry of the execution trace. Serialized verbatim into
/// `data-agent_step` stream events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub step: String,
    pub status: StepStatus,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl AgentStep {
    pub fn new(step: impl Into<String>, status: StepStatus) -> Self {
        Self { step: step.into(), status, ts: Utc::now(), message: None, detail: None }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Mutable state carried through the pipeline for one request.
#[derive(Debug, Clone)]
pub struct ConversationState {
    // Input
    pub question: String,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    /// Rendered transcript of the last N turns, empty for a fresh thread.
    pub chat_context: String,
    pub thread_id: String,
    pub trace_id: String,
    /// True when the previous assistant turn already asked for
    /// clarification; the classifier then proceeds with a best guess.
    pub prev_turn_was_clarification: bool,

    // Intermediate
    pub routing_decision: Option<RoutingDecision>,
    pub data_payload: Option<DataPayload>,
    pub dashboard_spec: Option<DashboardSpec>,

    // Control
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub agent_steps: Vec<AgentStep>,
    /// Query ids that failed in the latest fetch attempt.
    pub failed_query_ids: Vec<String>,
    /// Query ids excluded by reflection; the data agent skips these.
    pub excluded_query_ids: Vec<String>,
}

impl ConversationState {
    pub fn new(
        question: impl Into<String>,
        date_from: NaiveDate,
        date_to: NaiveDate,
        thread_id: impl Into<String>,
        trace_id: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            question: question.into(),
            date_from,
            date_to,
            chat_context: String::new(),
            thread_id: thread_id.into(),
            trace_id: trace_id.into(),
            prev_turn_was_clarification: false,
            routing_decision: None,
            data_payload: None,
            dashboard_spec: None,
            retry_count: 0,
            max_retries,
            error: None,
            agent_steps: Vec::new(),
            failed_query_ids: Vec::new(),
            excluded_query_ids: Vec::new(),
        }
    }

    pub fn record_step(&mut self, step: AgentStep) {
        self.agent_steps.push(step);
    }

    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_bounded_by_max() {
        let mut state = ConversationState::new(
            "como van las ventas",
            NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 30).unwrap(),
            "t-1",
            "trace-1",
            3,
        );
        assert!(state.retries_remaining());
        state.retry_count = 3;
        assert!(!state.retries_remaining());
        assert!(state.retry_count <= state.max_retries);
    }

    #[test]
    fn agent_step_serializes_snake_case_status() {
        let step = AgentStep::new("classify", StepStatus::Done).with_message("dashboard/sales");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["status"], "done");
        assert_eq!(json["step"], "classify");
    }
}
