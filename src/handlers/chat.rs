//! Streaming chat endpoint
//!
//! `POST /v1/chat/stream` runs the pipeline and streams its events as
//! `data: <JSON>` lines over a long-lived response, terminated by
//! `data: [DONE]`. Status is 200 even for in-band errors; only a malformed
//! body is rejected up front with 400, before the stream opens.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderValue, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use chrono::{Duration as ChronoDuration, Utc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{self as stream, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::models::{ChatStreamRequest, ConversationState, StreamEvent};
use crate::services::emitter::StreamEmitter;
use crate::utils::ApiError;

/// Default analysis window when the question names no period.
const DEFAULT_RANGE_DAYS: i64 = 29;

pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatStreamRequest>,
) -> Response {
    if let Err(e) = request.validate() {
        return ApiError::bad_request(format!("invalid request: {e}")).into_response();
    }

    let (conv, emitter, rx, cancel) = prepare_request(&state, &request).await;
    let trace_id = conv.trace_id.clone();
    tracing::info!(trace_id, question_len = request.question.len(), "chat stream request");

    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        orchestrator.execute(conv, emitter, cancel).await;
    });

    let event_stream = ReceiverStream::new(rx)
        .map(|event: StreamEvent| {
            let json = serde_json::to_string(&event).unwrap_or_else(|e| {
                tracing::error!("failed to serialize stream event: {}", e);
                "{\"type\":\"finish\",\"finishReason\":\"error\"}".to_string()
            });
            Ok::<Event, Infallible>(Event::default().data(json))
        })
        .chain(stream::once(Ok(Event::default().data("[DONE]"))));

    let mut response = Sse::new(event_stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.insert("x-vercel-ai-ui-message-stream", HeaderValue::from_static("v1"));
    response
}

/// Shared request setup for the streaming and non-streaming surfaces:
/// thread resolution, memory context, conversation state, emitter wiring.
pub(crate) async fn prepare_request(
    state: &AppState,
    request: &ChatStreamRequest,
) -> (
    ConversationState,
    StreamEmitter,
    tokio::sync::mpsc::Receiver<StreamEvent>,
    CancellationToken,
) {
    let trace_id = Uuid::new_v4().to_string();
    let message_id = format!("msg-{}", Uuid::new_v4());
    let thread_id = request
        .conversation_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let chat_context = state
        .memory
        .render_context(&thread_id, state.engine.context_messages)
        .await;
    let prev_turn_was_clarification = state.memory.last_turn_was_clarification(&thread_id).await;

    let date_to = Utc::now().date_naive();
    let date_from = date_to - ChronoDuration::days(DEFAULT_RANGE_DAYS);

    let mut conv = ConversationState::new(
        request.question.trim(),
        date_from,
        date_to,
        thread_id,
        trace_id,
        state.engine.max_retries,
    );
    conv.chat_context = chat_context;
    conv.prev_turn_was_clarification = prev_turn_was_clarification;

    let (emitter, rx) = StreamEmitter::channel(message_id);
    let cancel = CancellationToken::new();
    (conv, emitter, rx, cancel)
}
