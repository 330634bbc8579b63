use thiserror::Error;

/// Failures the engine can surface. All of them are recoverable at the
/// session level; none should terminate a study session.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("no eligible item for topic {topic_id} after relaxing filters")]
    NoEligibleItem { topic_id: String },

    #[error("no topic available for scheduling")]
    NoEligibleTopic,

    #[error("item {item_id} has no metadata record")]
    MissingItemMetadata { item_id: String },

    #[error("telemetry sink rejected event: {reason}")]
    TelemetryWriteFailure { reason: String },

    #[error("invalid blueprint: {reason}")]
    InvalidBlueprint { reason: String },

    #[error("response for {item_id} does not match the pending presentation")]
    UnexpectedResponse { item_id: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
