//! Telemetry events and the buffered emitter.
//!
//! Events describe every observable decision the engine makes. Emission is
//! fire-and-forget: a failing sink never surfaces into the decision path.
//! Failed writes land in a bounded retry buffer that is drained ahead of
//! newer events, so the sink sees the original order and nothing is dropped
//! without at least one retry.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::TelemetryConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{ItemId, TopicId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TelemetryEvent {
    #[serde(rename = "item_presented")]
    ItemPresented(ItemPresentedPayload),

    #[serde(rename = "item_response")]
    ItemResponse(ItemResponsePayload),

    #[serde(rename = "topic_transition")]
    TopicTransition(TopicTransitionPayload),

    #[serde(rename = "retention_event")]
    RetentionEvent(RetentionEventPayload),

    #[serde(rename = "degenerate_update")]
    DegenerateUpdate(DegenerateUpdatePayload),
}

impl TelemetryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TelemetryEvent::ItemPresented(_) => "item_presented",
            TelemetryEvent::ItemResponse(_) => "item_response",
            TelemetryEvent::TopicTransition(_) => "topic_transition",
            TelemetryEvent::RetentionEvent(_) => "retention_event",
            TelemetryEvent::DegenerateUpdate(_) => "degenerate_update",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            TelemetryEvent::ItemPresented(p) => Some(&p.session_id),
            TelemetryEvent::ItemResponse(p) => Some(&p.session_id),
            TelemetryEvent::TopicTransition(p) => Some(&p.session_id),
            TelemetryEvent::RetentionEvent(_) => None,
            TelemetryEvent::DegenerateUpdate(p) => Some(&p.session_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPresentedPayload {
    pub session_id: String,
    pub item_id: ItemId,
    pub topic_id: TopicId,
    pub system_id: String,
    pub theta_before: f64,
    pub se_before: f64,
    pub blueprint_share: f64,
    pub exposure_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResponsePayload {
    pub session_id: String,
    pub item_id: ItemId,
    pub score_fraction: f64,
    pub theta_after: f64,
    pub se_after: f64,
    pub mastery_probability: f64,
    pub latency_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionReason {
    Scheduler,
    Retention,
    Fatigue,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionReason::Scheduler => "scheduler",
            TransitionReason::Retention => "retention",
            TransitionReason::Fatigue => "fatigue",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicTransitionPayload {
    pub session_id: String,
    pub from_topic: Option<TopicId>,
    /// `None` when the transition closes the session instead of opening a
    /// new topic.
    pub to_topic: Option<TopicId>,
    pub reason: TransitionReason,
    pub expected_delta_se: f64,
    pub actual_delta_se: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionEventPayload {
    pub card_id: ItemId,
    pub due_at: i64,
    pub answered_at: i64,
    pub result: String,
    pub next_due: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegenerateUpdatePayload {
    pub session_id: String,
    pub topic_id: TopicId,
    pub item_id: ItemId,
}

/// Event plus the wall-clock instant of its first emission attempt. Retries
/// keep the original stamp.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event: TelemetryEvent,
    pub recorded_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: TelemetryEvent) -> Self {
        Self {
            event,
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only destination for telemetry.
pub trait TelemetrySink: Send + Sync {
    fn write(&self, envelope: &EventEnvelope) -> EngineResult<()>;
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for std::sync::Arc<S> {
    fn write(&self, envelope: &EventEnvelope) -> EngineResult<()> {
        (**self).write(envelope)
    }
}

/// In-memory sink; the default for tests and embedding hosts that drain
/// events themselves.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<EventEnvelope>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.records.lock().clone()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.records.lock().iter().map(|e| e.event.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Serializes the captured events as one JSON object per line.
    pub fn json_lines(&self) -> EngineResult<String> {
        let records = self.records.lock();
        let mut out = String::new();
        for envelope in records.iter() {
            let line = serde_json::to_string(envelope).map_err(|err| {
                EngineError::TelemetryWriteFailure {
                    reason: err.to_string(),
                }
            })?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}

impl TelemetrySink for MemorySink {
    fn write(&self, envelope: &EventEnvelope) -> EngineResult<()> {
        self.records.lock().push(envelope.clone());
        Ok(())
    }
}

struct EmitterInner {
    pending: VecDeque<EventEnvelope>,
    written: u64,
    dropped: u64,
}

/// Fire-and-forget emitter with a bounded retry buffer.
pub struct TelemetryEmitter {
    sink: Box<dyn TelemetrySink>,
    inner: Mutex<EmitterInner>,
    config: TelemetryConfig,
}

impl TelemetryEmitter {
    pub fn new(sink: Box<dyn TelemetrySink>, config: TelemetryConfig) -> Self {
        Self {
            sink,
            inner: Mutex::new(EmitterInner {
                pending: VecDeque::new(),
                written: 0,
                dropped: 0,
            }),
            config,
        }
    }

    /// Emits one event. Never fails and never panics; a failing sink only
    /// grows the retry buffer.
    pub fn emit(&self, event: TelemetryEvent) {
        let mut inner = self.inner.lock();
        self.retry_pending(&mut inner, self.config.retry_limit);

        let envelope = EventEnvelope::new(event);
        if !inner.pending.is_empty() {
            // The sink is behind; keep order by queueing behind the backlog.
            self.buffer(&mut inner, envelope);
            return;
        }
        match self.sink.write(&envelope) {
            Ok(()) => inner.written += 1,
            Err(err) => {
                warn!(
                    event_type = envelope.event.event_type(),
                    error = %err,
                    "telemetry write failed, buffering for retry"
                );
                self.buffer(&mut inner, envelope);
            }
        }
    }

    /// Retries everything in the buffer; returns how many events remain.
    pub fn flush(&self) -> usize {
        let mut inner = self.inner.lock();
        let backlog = inner.pending.len() as u32;
        self.retry_pending(&mut inner, backlog);
        inner.pending.len()
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn written(&self) -> u64 {
        self.inner.lock().written
    }

    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    fn retry_pending(&self, inner: &mut EmitterInner, limit: u32) {
        for _ in 0..limit {
            let envelope = match inner.pending.front() {
                Some(envelope) => envelope.clone(),
                None => return,
            };
            match self.sink.write(&envelope) {
                Ok(()) => {
                    inner.pending.pop_front();
                    inner.written += 1;
                }
                Err(_) => return,
            }
        }
    }

    fn buffer(&self, inner: &mut EmitterInner, envelope: EventEnvelope) {
        if inner.pending.len() >= self.config.buffer_capacity {
            // Oldest goes first; it has already been retried at least once.
            if let Some(evicted) = inner.pending.pop_front() {
                inner.dropped += 1;
                warn!(
                    event_type = evicted.event.event_type(),
                    dropped_total = inner.dropped,
                    "telemetry buffer full, dropping oldest event"
                );
            }
        }
        inner.pending.push_back(envelope);
    }
}
