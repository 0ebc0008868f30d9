//! Pipeline orchestrator
//!
//! Directed state machine over the conversation state:
//! `classify → fetch_data → present → end`, with an inline `reflect` step
//! between a failing stage and its retry. Errors never escape without a
//! `finish` event; the emitter's disconnect signal and the cancellation
//! token both abort work at the next stage boundary.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::models::{
    AgentStep, ConversationState, FinishReason, RouteKind, StepStatus,
};
use crate::services::classifier::IntentClassifier;
use crate::services::data_agent::{AgentError, DataAgent};
use crate::services::emitter::StreamEmitter;
use crate::services::memory::{ChatMemory, MemoryRole};
use crate::services::presenter::{PresentError, PresentationBuilder};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("data unavailable after retries")]
    DataUnavailable,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled")]
    Cancelled,
}

pub struct Orchestrator {
    classifier: Arc<IntentClassifier>,
    data_agent: Arc<DataAgent>,
    presenter: Arc<PresentationBuilder>,
    memory: Arc<ChatMemory>,
    deadline: Duration,
}

impl Orchestrator {
    pub fn new(
        classifier: Arc<IntentClassifier>,
        data_agent: Arc<DataAgent>,
        presenter: Arc<PresentationBuilder>,
        memory: Arc<ChatMemory>,
        request_deadline_seconds: u64,
    ) -> Self {
        Self {
            classifier,
            data_agent,
            presenter,
            memory,
            deadline: Duration::from_secs(request_deadline_seconds),
        }
    }

    /// Run one request to completion. Guarantees exactly one `start` and one
    /// `finish` on the emitter, whatever happens in between; the terminal
    /// state is returned for the non-streaming surface.
    pub async fn execute(
        &self,
        mut state: ConversationState,
        emitter: StreamEmitter,
        cancel: CancellationToken,
    ) -> ConversationState {
        let trace_id = state.trace_id.clone();

        if emitter.start().await.is_err() {
            tracing::debug!(trace_id, "client gone before start; aborting");
            cancel.cancel();
            return state;
        }
        let _ = emitter.trace(&trace_id).await;

        // A disconnecting client cancels in-flight database and LLM work.
        let disconnect_watcher = emitter.cancel_on_disconnect(cancel.clone());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            run = tokio::time::timeout(self.deadline, self.run(&mut state, &emitter, &cancel)) => {
                match run {
                    Ok(inner) => inner,
                    Err(_) => {
                        // Deadline: abandon in-flight work via the token.
                        cancel.cancel();
                        Err(EngineError::DeadlineExceeded)
                    },
                }
            },
        };

        let reason = match result {
            Ok(()) => FinishReason::Complete,
            Err(EngineError::Cancelled) => FinishReason::Cancelled,
            Err(e) => {
                tracing::warn!(trace_id, error = %e, "pipeline ended with error");
                state.error = Some(e.to_string());
                FinishReason::Error
            },
        };
        let _ = emitter.finish(reason).await;
        disconnect_watcher.abort();
        state
    }

    async fn run(
        &self,
        state: &mut ConversationState,
        emitter: &StreamEmitter,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        // ------------------------------------------------------------------
        // classify
        // ------------------------------------------------------------------
        self.emit_step(state, emitter, AgentStep::new("classify", StepStatus::Start))
            .await?;

        self.memory
            .append(&state.thread_id, MemoryRole::User, &state.question, None);

        let decision = self
            .classifier
            .classify(
                &state.question,
                &state.chat_context,
                state.prev_turn_was_clarification,
                cancel,
            )
            .await;
        state.routing_decision = Some(decision.clone());

        self.emit_step(
            state,
            emitter,
            AgentStep::new("classify", StepStatus::Done)
                .with_message(format!("{}/{}", decision.kind.as_str(), decision.domain.as_str()))
                .with_detail(serde_json::json!({
                    "confidence": decision.confidence,
                    "rationale": decision.rationale,
                })),
        )
        .await?;

        match decision.kind {
            RouteKind::Conversational | RouteKind::Clarification => {
                let text = decision.direct_answer.clone().unwrap_or_else(|| {
                    "¿En qué datos de tu negocio te puedo ayudar?".to_string()
                });
                self.say(state, emitter, &text).await?;
                return Ok(());
            },
            RouteKind::DataOnly | RouteKind::Dashboard => {},
        }

        // ------------------------------------------------------------------
        // fetch_data (with reflect/retry)
        // ------------------------------------------------------------------
        state.retry_count = 0;
        let payload = loop {
            self.emit_step(state, emitter, AgentStep::new("fetch_data", StepStatus::Start))
                .await?;

            match self.data_agent.fetch(state, emitter, cancel).await {
                Ok(payload) => {
                    self.emit_step(
                        state,
                        emitter,
                        AgentStep::new("fetch_data", StepStatus::Done).with_detail(
                            serde_json::json!({ "available_refs": payload.available_refs }),
                        ),
                    )
                    .await?;
                    break payload;
                },
                Err(AgentError::Cancelled) => return Err(EngineError::Cancelled),
                Err(AgentError::DataUnavailable) => {
                    self.emit_step(
                        state,
                        emitter,
                        AgentStep::new("fetch_data", StepStatus::Error)
                            .with_message("data_unavailable"),
                    )
                    .await?;

                    if state.retries_remaining() {
                        self.reflect(state, emitter, "fetch_data").await?;
                        continue;
                    }

                    // Best-effort narrative before the error finish.
                    let text = self
                        .presenter
                        .conclusion_for(&state.question, &Default::default());
                    self.say(state, emitter, &text).await?;
                    return Err(EngineError::DataUnavailable);
                },
            }
        };
        state.data_payload = Some(payload.clone());

        // ------------------------------------------------------------------
        // present (dashboard) or answer directly (data_only)
        // ------------------------------------------------------------------
        if decision.kind == RouteKind::DataOnly {
            emitter
                .payload(&payload)
                .await
                .map_err(|_| EngineError::Cancelled)?;
            let text = self.presenter.conclusion_for(&state.question, &payload);
            self.say(state, emitter, &text).await?;
            return Ok(());
        }

        state.retry_count = 0;
        let mut reduced = false;
        let spec = loop {
            self.emit_step(state, emitter, AgentStep::new("present", StepStatus::Start))
                .await?;

            match self.presenter.build(state, &payload, reduced, cancel).await {
                Ok(spec) => {
                    self.emit_step(state, emitter, AgentStep::new("present", StepStatus::Done))
                        .await?;
                    break Some(spec);
                },
                Err(PresentError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    self.emit_step(
                        state,
                        emitter,
                        AgentStep::new("present", StepStatus::Error)
                            .with_message(e.to_string()),
                    )
                    .await?;

                    if state.retries_remaining() {
                        self.reflect(state, emitter, "present").await?;
                        // Retry with a reduced slot set.
                        reduced = true;
                        continue;
                    }
                    break None;
                },
            }
        };

        match spec {
            Some(spec) => {
                state.dashboard_spec = Some(spec.clone());
                // Contract: the dashboard precedes the payload so the client
                // can initialize its view before data binds.
                emitter
                    .dashboard(&spec)
                    .await
                    .map_err(|_| EngineError::Cancelled)?;
                emitter
                    .payload(&payload)
                    .await
                    .map_err(|_| EngineError::Cancelled)?;

                let conclusion = spec
                    .conclusion
                    .clone()
                    .unwrap_or_else(|| self.presenter.conclusion_for(&state.question, &payload));
                self.say(state, emitter, &conclusion).await?;
            },
            None => {
                // Presentation exhausted its retries: payload-only partial
                // result, still a completed stream.
                emitter
                    .payload(&payload)
                    .await
                    .map_err(|_| EngineError::Cancelled)?;
                let text = self.presenter.conclusion_for(&state.question, &payload);
                self.say(state, emitter, &text).await?;
            },
        }

        Ok(())
    }

    /// Inline reflection: record the failure, adjust the next attempt
    /// (exclude the queries that failed, widen the range by one day), and
    /// count the retry.
    async fn reflect(
        &self,
        state: &mut ConversationState,
        emitter: &StreamEmitter,
        from_stage: &str,
    ) -> Result<(), EngineError> {
        state.retry_count += 1;

        let failed = std::mem::take(&mut state.failed_query_ids);
        for id in &failed {
            if !state.excluded_query_ids.contains(id) {
                state.excluded_query_ids.push(id.clone());
            }
        }
        state.date_from = state.date_from - chrono::Duration::days(1);

        self.emit_step(
            state,
            emitter,
            AgentStep::new("reflect", StepStatus::Progress)
                .with_message(format!("retry {} of {}", state.retry_count, state.max_retries))
                .with_detail(serde_json::json!({
                    "from_stage": from_stage,
                    "excluded_query_ids": state.excluded_query_ids,
                    "widened_date_from": state.date_from.to_string(),
                })),
        )
        .await
    }

    /// Stream a text block and remember it as the assistant turn.
    async fn say(
        &self,
        state: &ConversationState,
        emitter: &StreamEmitter,
        text: &str,
    ) -> Result<(), EngineError> {
        emitter
            .text_block(text)
            .await
            .map_err(|_| EngineError::Cancelled)?;
        self.memory
            .append(&state.thread_id, MemoryRole::Assistant, text, None);
        Ok(())
    }

    async fn emit_step(
        &self,
        state: &mut ConversationState,
        emitter: &StreamEmitter,
        step: AgentStep,
    ) -> Result<(), EngineError> {
        state.record_step(step.clone());
        emitter
            .agent_step(&step)
            .await
            .map_err(|_| EngineError::Cancelled)
    }
}
