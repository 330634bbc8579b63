//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use tutor_engine::config::{EngineConfig, TelemetryConfig};
use tutor_engine::engine::{NextAction, Presentation, ResponseOutcome};
use tutor_engine::telemetry::{MemorySink, TelemetryEmitter};
use tutor_engine::types::{Blueprint, ItemBank, ItemMetadata, LearnerState};
use tutor_engine::{Session, StudyEngine};

pub const START_MS: i64 = 1_700_000_000_000;
pub const SECOND_MS: i64 = 1_000;
pub const MINUTE_MS: i64 = 60 * SECOND_MS;
pub const DAY_MS: i64 = 24 * 60 * MINUTE_MS;

/// A four-step partial-credit item with thresholds spread around its
/// difficulty, the common case in the production banks.
pub fn graded_item(id: &str, topic: &str, system: &str, difficulty: f64) -> ItemMetadata {
    ItemMetadata {
        item_id: id.to_string(),
        topic_id: topic.to_string(),
        system_id: system.to_string(),
        difficulty,
        category_thresholds: vec![-0.9, -0.3, 0.3, 0.9],
        median_time_sec: 60.0,
        score_categories: 4,
        calibration_count: 150,
    }
}

/// `per_topic` items per topic, difficulties evenly spread over
/// [-1.5, 1.5], all in one body system.
pub fn graded_bank(topics: &[&str], per_topic: usize) -> ItemBank {
    let mut items = Vec::new();
    for topic in topics {
        for i in 0..per_topic {
            let difficulty = -1.5 + 3.0 * i as f64 / (per_topic.max(2) - 1) as f64;
            items.push(graded_item(
                &format!("{topic}-{i:03}"),
                topic,
                "organ-systems",
                difficulty,
            ));
        }
    }
    ItemBank::new(items)
}

pub fn blueprint_for(targets: &[(&str, f64)]) -> Blueprint {
    let mut topic_targets = BTreeMap::new();
    for (topic, share) in targets {
        topic_targets.insert(topic.to_string(), *share);
    }
    Blueprint {
        topic_targets,
        system_targets: BTreeMap::new(),
    }
}

pub fn engine_with(bank: ItemBank, blueprint: &Blueprint) -> (StudyEngine, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let emitter = TelemetryEmitter::new(Box::new(sink.clone()), TelemetryConfig::default());
    let engine = StudyEngine::new(bank, blueprint, EngineConfig::default(), emitter)
        .expect("fixture blueprint is valid");
    (engine, sink)
}

/// One scripted engine step: ask for the next action and, when an item
/// comes back, answer it with `score` after `latency_ms`.
pub enum Step {
    Answered(Presentation, ResponseOutcome),
    Completed,
}

pub fn step(
    engine: &StudyEngine,
    learner: &mut LearnerState,
    session: &mut Session,
    now_ms: i64,
    score: f64,
    latency_ms: i64,
) -> Step {
    match engine
        .next_action(learner, session, now_ms)
        .expect("next_action succeeds")
    {
        NextAction::SessionComplete { .. } => Step::Completed,
        NextAction::PresentItem(presentation) => {
            let outcome = engine
                .submit_response(
                    learner,
                    session,
                    &presentation.item_id,
                    score,
                    latency_ms,
                    now_ms + latency_ms,
                )
                .expect("submit_response succeeds");
            Step::Answered(presentation, outcome)
        }
    }
}
