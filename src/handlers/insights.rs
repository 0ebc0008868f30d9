//! Non-streaming insights endpoint
//!
//! `POST /api/insights/run` runs the same pipeline as the streaming route
//! and collects the events into one final response object.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use validator::Validate;

use crate::AppState;
use crate::models::{ChatStreamRequest, FinishReason, InsightsRunResponse, StreamEvent};
use crate::utils::{ApiError, ApiResult};

/// Run the pipeline to completion and return the final dashboard + payload.
#[utoipa::path(
    post,
    path = "/api/insights/run",
    request_body = ChatStreamRequest,
    responses(
        (status = 200, description = "Pipeline result", body = InsightsRunResponse),
        (status = 400, description = "Malformed request")
    ),
    tag = "Insights"
)]
pub async fn run_insights(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatStreamRequest>,
) -> ApiResult<impl IntoResponse> {
    request
        .validate()
        .map_err(|e| ApiError::bad_request(format!("invalid request: {e}")))?;

    let (conv, emitter, mut rx, cancel) =
        super::chat::prepare_request(&state, &request).await;
    let trace_id = conv.trace_id.clone();
    let started = std::time::Instant::now();

    let orchestrator = Arc::clone(&state.orchestrator);
    let pipeline = tokio::spawn(async move {
        orchestrator.execute(conv, emitter, cancel).await;
    });

    // Drain the event stream; the last dashboard/payload/finish win.
    let mut dashboard_spec = None;
    let mut data_payload = None;
    let mut finish_reason = None;
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Dashboard { data } => dashboard_spec = Some(*data),
            StreamEvent::Payload { data } => data_payload = Some(*data),
            StreamEvent::Finish { finish_reason: reason, .. } => finish_reason = Some(reason),
            _ => {},
        }
    }
    if let Err(e) = pipeline.await {
        tracing::error!(trace_id, "pipeline task failed: {}", e);
    }

    let success = matches!(finish_reason, Some(FinishReason::Complete));
    Ok(Json(InsightsRunResponse {
        success,
        trace_id,
        dashboard_spec,
        data_payload,
        execution_time_ms: started.elapsed().as_millis() as u64,
        error: match finish_reason {
            Some(FinishReason::Complete) | None => None,
            Some(FinishReason::Error) => Some("pipeline finished with error".to_string()),
            Some(FinishReason::Cancelled) => Some("pipeline cancelled".to_string()),
        },
    }))
}
