//! Stream event wire types
//!
//! Event type names, field names and their ordering are a wire contract with
//! existing clients (the Vercel AI UI message stream). Do not rename or
//! reorder without a client version bump.

use serde::{Deserialize, Serialize};

use super::dashboard::DashboardSpec;
use super::payload::DataPayload;
use super::state::AgentStep;

/// Why the response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Complete,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceData {
    pub trace_id: String,
}

/// One event on the long-lived response, serialized as a `data: <JSON>`
/// line. The final `[DONE]` terminator is framing, not an event, and is
/// appended by the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "start", rename_all = "camelCase")]
    Start { message_id: String },

    #[serde(rename = "text-start", rename_all = "camelCase")]
    TextStart { text_id: String },

    #[serde(rename = "text-delta", rename_all = "camelCase")]
    TextDelta { text_id: String, delta: String },

    #[serde(rename = "text-end", rename_all = "camelCase")]
    TextEnd { text_id: String },

    #[serde(rename = "data-trace")]
    Trace { data: TraceData },

    #[serde(rename = "data-agent_step")]
    AgentStep { data: AgentStep },

    #[serde(rename = "data-dashboard")]
    Dashboard { data: Box<DashboardSpec> },

    #[serde(rename = "data-payload")]
    Payload { data: Box<DataPayload> },

    #[serde(rename = "finish", rename_all = "camelCase")]
    Finish { finish_reason: FinishReason, message_id: String },
}

impl StreamEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::Trace { .. } => "data-trace",
            Self::AgentStep { .. } => "data-agent_step",
            Self::Dashboard { .. } => "data-dashboard",
            Self::Payload { .. } => "data-payload",
            Self::Finish { .. } => "finish",
        }
    }
}
