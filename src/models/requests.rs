//! Inbound request and REST response types

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::dashboard::DashboardSpec;
use super::payload::DataPayload;

/// Body of `POST /v1/chat/stream` and `POST /api/insights/run`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ChatStreamRequest {
    #[validate(length(min = 1, max = 2000, message = "question must be 1..=2000 characters"))]
    pub question: String,
    /// Thread id; a fresh one is generated when absent.
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Result of the non-streaming `POST /api/insights/run` endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InsightsRunResponse {
    pub success: bool,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_spec: Option<DashboardSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_payload: Option<DataPayload>,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /api/health` response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database_status: String,
}
