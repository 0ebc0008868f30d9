//! Stream emitter
//!
//! Frames typed events into the per-request channel the transport drains in
//! order. The emitter owns the protocol invariants: exactly one `start`
//! first, well-nested text blocks, `data-dashboard` strictly before
//! `data-payload`, exactly one `finish`, and nothing after `finish`.
//!
//! A send failure means the client went away; callers treat that as the
//! cancellation signal at the next stage boundary.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::{
    AgentStep, DashboardSpec, DataPayload, FinishReason, StreamEvent, TraceData,
};

/// Default channel capacity; a slow client applies backpressure through it.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("client disconnected")]
    Disconnected,
}

pub struct StreamEmitter {
    tx: mpsc::Sender<StreamEvent>,
    message_id: String,
    started: AtomicBool,
    finished: AtomicBool,
    dashboard_sent: AtomicBool,
    payload_sent: AtomicBool,
    text_counter: AtomicU64,
}

impl StreamEmitter {
    /// Create an emitter and the receiver the transport drains.
    pub fn channel(message_id: impl Into<String>) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                tx,
                message_id: message_id.into(),
                started: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                dashboard_sent: AtomicBool::new(false),
                payload_sent: AtomicBool::new(false),
                text_counter: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Cancel the given token when the receiver side goes away (client
    /// disconnect). In-flight database and LLM calls watch the same token.
    pub fn cancel_on_disconnect(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tx.closed().await;
            cancel.cancel();
        })
    }

    pub async fn start(&self) -> Result<(), EmitError> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::error!("start emitted twice; dropping duplicate");
            return Ok(());
        }
        self.send(StreamEvent::Start { message_id: self.message_id.clone() }).await
    }

    pub async fn trace(&self, trace_id: &str) -> Result<(), EmitError> {
        self.send(StreamEvent::Trace { data: TraceData { trace_id: trace_id.to_string() } })
            .await
    }

    pub async fn agent_step(&self, step: &AgentStep) -> Result<(), EmitError> {
        self.send(StreamEvent::AgentStep { data: step.clone() }).await
    }

    pub async fn dashboard(&self, spec: &DashboardSpec) -> Result<(), EmitError> {
        if self.payload_sent.load(Ordering::SeqCst) {
            debug_assert!(false, "data-dashboard must precede data-payload");
            tracing::error!("data-dashboard after data-payload; dropping event");
            return Ok(());
        }
        self.dashboard_sent.store(true, Ordering::SeqCst);
        self.send(StreamEvent::Dashboard { data: Box::new(spec.clone()) }).await
    }

    pub async fn payload(&self, payload: &DataPayload) -> Result<(), EmitError> {
        self.payload_sent.store(true, Ordering::SeqCst);
        self.send(StreamEvent::Payload { data: Box::new(payload.clone()) }).await
    }

    /// Emit a complete text block: `text-start`, word-sized deltas,
    /// `text-end`. Blocks never interleave because each call runs to
    /// completion before the next.
    pub async fn text_block(&self, text: &str) -> Result<(), EmitError> {
        let text_id = format!(
            "txt-{}-{}",
            self.message_id,
            self.text_counter.fetch_add(1, Ordering::SeqCst)
        );
        self.send(StreamEvent::TextStart { text_id: text_id.clone() }).await?;
        for chunk in word_chunks(text) {
            self.send(StreamEvent::TextDelta { text_id: text_id.clone(), delta: chunk }).await?;
        }
        self.send(StreamEvent::TextEnd { text_id }).await
    }

    /// Terminal event. The first call wins; later events of any kind are
    /// silently discarded.
    pub async fn finish(&self, reason: FinishReason) -> Result<(), EmitError> {
        if self.finished.load(Ordering::SeqCst) {
            return Ok(());
        }
        let result = self
            .send(StreamEvent::Finish {
                finish_reason: reason,
                message_id: self.message_id.clone(),
            })
            .await;
        self.finished.store(true, Ordering::SeqCst);
        result
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    async fn send(&self, event: StreamEvent) -> Result<(), EmitError> {
        if self.finished.load(Ordering::SeqCst) {
            tracing::debug!("dropping {} event after finish", event.type_name());
            return Ok(());
        }
        self.tx.send(event).await.map_err(|_| EmitError::Disconnected)
    }
}

/// Split narrative text into streamable word groups.
fn word_chunks(text: &str) -> Vec<String> {
    const WORDS_PER_CHUNK: usize = 4;
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    words
        .chunks(WORDS_PER_CHUNK)
        .enumerate()
        .map(|(i, chunk)| {
            let mut s = if i == 0 { String::new() } else { String::from(" ") };
            s.push_str(&chunk.join(" "));
            s
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DashboardSpec;

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn start_is_emitted_exactly_once() {
        let (emitter, rx) = StreamEmitter::channel("msg-1");
        emitter.start().await.unwrap();
        emitter.start().await.unwrap();
        let events = drain(rx).await;
        assert_eq!(events.iter().filter(|e| e.type_name() == "start").count(), 1);
    }

    #[tokio::test]
    async fn text_blocks_are_well_nested() {
        let (emitter, rx) = StreamEmitter::channel("msg-1");
        emitter.text_block("hola que tal como va todo hoy").await.unwrap();
        let events = drain(rx).await;

        assert_eq!(events.first().map(StreamEvent::type_name), Some("text-start"));
        assert_eq!(events.last().map(StreamEvent::type_name), Some("text-end"));
        assert!(events[1..events.len() - 1]
            .iter()
            .all(|e| e.type_name() == "text-delta"));

        // Deltas reassemble the original text.
        let mut assembled = String::new();
        for event in &events {
            if let StreamEvent::TextDelta { delta, .. } = event {
                assembled.push_str(delta);
            }
        }
        assert_eq!(assembled, "hola que tal como va todo hoy");
    }

    #[tokio::test]
    async fn nothing_is_emitted_after_finish() {
        let (emitter, rx) = StreamEmitter::channel("msg-1");
        emitter.start().await.unwrap();
        emitter.finish(FinishReason::Complete).await.unwrap();
        emitter.payload(&DataPayload::default()).await.unwrap();
        emitter.finish(FinishReason::Error).await.unwrap();

        let events = drain(rx).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Finish { finish_reason: FinishReason::Complete, .. })
        ));
    }

    #[tokio::test]
    async fn disconnected_receiver_surfaces_as_emit_error() {
        let (emitter, rx) = StreamEmitter::channel("msg-1");
        drop(rx);
        assert!(matches!(emitter.start().await, Err(EmitError::Disconnected)));
    }

    #[tokio::test]
    async fn dashboard_after_payload_is_dropped_in_release() {
        // The ordering violation is a programmer error; in release builds
        // the emitter drops the event instead of corrupting the stream.
        if cfg!(debug_assertions) {
            return;
        }
        let (emitter, rx) = StreamEmitter::channel("msg-1");
        emitter.payload(&DataPayload::default()).await.unwrap();
        emitter.dashboard(&DashboardSpec::default()).await.unwrap();
        let events = drain(rx).await;
        assert!(events.iter().all(|e| e.type_name() != "data-dashboard"));
    }
}
