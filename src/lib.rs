//! Adaptive study engine: per-response ability estimation, blueprint-aware
//! item selection, Thompson-sampled topic scheduling and an FSRS retention
//! queue behind one session façade.
//!
//! The crate is embedded as a library. The host owns persistence and UI,
//! calls [`StudyEngine::next_action`] for the next presentation and
//! [`StudyEngine::submit_response`] with the learner's answer; everything
//! the engine learns about a person lives in the caller's [`LearnerState`].
//! Every probabilistic decision draws from a per-session seeded RNG, so a
//! session replays bit-for-bit from its seed and response stream.
//!
//! Module map:
//!
//! - [`ability`] - GPCM likelihoods, quadrature posterior, Elo cold start
//! - [`selection`] - Fisher-information item choice, exposure control, blueprint shares
//! - [`scheduling`] - Thompson topic arms, stop rules, fatigue
//! - [`retention`] - FSRS scheduling, due queue, handoff and lapse paths
//! - [`calibration`] - offline EM refit of item parameters
//! - [`engine`] / [`session`] - the orchestration façade and sitting state
//! - [`telemetry`] - decision events and the buffered emitter

pub mod ability;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod retention;
pub mod rng;
pub mod scheduling;
pub mod selection;
pub mod session;
pub mod telemetry;
pub mod types;

pub use calibration::ResponseLogEntry;
pub use config::EngineConfig;
pub use engine::{Explanation, NextAction, Presentation, ResponseOutcome, StudyEngine};
pub use error::{EngineError, EngineResult};
pub use session::{Lane, Session, SessionEndReason};
pub use telemetry::{
    EventEnvelope, MemorySink, TelemetryEmitter, TelemetryEvent, TelemetrySink,
};
pub use types::{
    Blueprint, ItemBank, ItemMetadata, LearnerState, RetentionCard, TopicAbilityState,
    TopicHistory,
};
