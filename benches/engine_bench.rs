//! Benchmark suite for tutor-engine
//!
//! Run with: cargo bench

use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, Criterion};

use tutor_engine::ability::quadrature;
use tutor_engine::config::{
    AbilityConfig, BlueprintConfig, EngineConfig, ExposureConfig, SelectionConfig, TelemetryConfig,
};
use tutor_engine::rng::SessionRng;
use tutor_engine::selection::{BlueprintPolicy, ExposurePolicy, ItemSelector, ShareTracker};
use tutor_engine::telemetry::{MemorySink, TelemetryEmitter};
use tutor_engine::types::{Blueprint, ItemBank, ItemMetadata, LearnerState, ResponseRecord};
use tutor_engine::{NextAction, StudyEngine};

const NOW_MS: i64 = 1_700_000_000_000;

fn response_history(n: usize) -> Vec<ResponseRecord> {
    (0..n)
        .map(|i| ResponseRecord {
            item_id: format!("i{i}"),
            category: (i % 2) as u32,
            max_category: 1,
            difficulty: (i % 5) as f64 * 0.4 - 0.8,
            thresholds: vec![0.0],
            calibrated: true,
            timestamp: NOW_MS + i as i64 * 60_000,
            se_after: 0.5,
        })
        .collect()
}

fn large_bank(topics: usize, per_topic: usize) -> ItemBank {
    let mut items = Vec::with_capacity(topics * per_topic);
    for t in 0..topics {
        for i in 0..per_topic {
            items.push(ItemMetadata {
                item_id: format!("t{t}-i{i:04}"),
                topic_id: format!("topic{t}"),
                system_id: format!("sys{}", t % 3),
                difficulty: (i % 9) as f64 * 0.4 - 1.6,
                category_thresholds: vec![0.0],
                median_time_sec: 45.0 + (i % 4) as f64 * 15.0,
                score_categories: 1,
                calibration_count: 200,
            });
        }
    }
    ItemBank::new(items)
}

fn blueprint(topics: usize) -> Blueprint {
    let share = 1.0 / topics as f64;
    Blueprint {
        topic_targets: (0..topics).map(|t| (format!("topic{t}"), share)).collect(),
        system_targets: BTreeMap::new(),
    }
}

fn bench_posterior_update(c: &mut Criterion) {
    let config = AbilityConfig::default();
    let responses = response_history(30);
    c.bench_function("posterior over 30 responses", |b| {
        b.iter(|| quadrature::posterior(&config, 0.0, 0.8, &responses))
    });
}

fn bench_selector_large_pool(c: &mut Criterion) {
    let bank = large_bank(8, 250);
    let policy = BlueprintPolicy::new(&blueprint(8), &bank, BlueprintConfig::default()).unwrap();
    let exposure = ExposurePolicy::new(ExposureConfig::default());
    let selector = ItemSelector::new(SelectionConfig::default());
    let learner = LearnerState::default();
    let tracker = ShareTracker::default();
    let candidates = bank.topic_items("topic3");
    let mut rng = SessionRng::seed_from(7);
    c.bench_function("selector over 250-item topic", |b| {
        b.iter(|| {
            selector.select_next(
                "topic3",
                0.2,
                &candidates,
                &learner,
                &exposure,
                &policy,
                &tracker,
                10.0,
                &mut rng,
                NOW_MS,
            )
        })
    });
}

fn bench_engine_steps(c: &mut Criterion) {
    let emitter = TelemetryEmitter::new(Box::new(MemorySink::new()), TelemetryConfig::default());
    let engine = StudyEngine::new(
        large_bank(4, 40),
        &blueprint(4),
        EngineConfig::default(),
        emitter,
    )
    .unwrap();
    c.bench_function("engine eight present/respond steps", |b| {
        b.iter(|| {
            let mut learner = LearnerState::default();
            let mut session = engine.begin_session(&learner, &[], 11, NOW_MS);
            let mut parity: BTreeMap<String, u32> = BTreeMap::new();
            for step in 0..8i64 {
                let now = NOW_MS + step * 30_000;
                match engine.next_action(&mut learner, &mut session, now).unwrap() {
                    NextAction::PresentItem(item) => {
                        let count = parity.entry(item.topic_id.clone()).or_insert(0);
                        let score = if *count % 2 == 0 { 1.0 } else { 0.0 };
                        *count += 1;
                        engine
                            .submit_response(
                                &mut learner,
                                &mut session,
                                &item.item_id,
                                score,
                                4_000,
                                now + 20_000,
                            )
                            .unwrap();
                    }
                    NextAction::SessionComplete { .. } => break,
                }
            }
            learner
        })
    });
}

criterion_group!(
    benches,
    bench_posterior_update,
    bench_selector_large_pool,
    bench_engine_steps
);
criterion_main!(benches);
