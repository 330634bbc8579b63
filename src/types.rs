use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub type TopicId = String;
pub type ItemId = String;
pub type SystemId = String;

/// Externally authored question metadata. The engine never mutates these
/// records; the calibration refit publishes a whole new bank instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    pub item_id: ItemId,
    pub topic_id: TopicId,
    pub system_id: SystemId,
    pub difficulty: f64,
    /// Partial-credit step thresholds, one per score step. An item with m
    /// thresholds is scored in categories 0..=m.
    pub category_thresholds: Vec<f64>,
    pub median_time_sec: f64,
    /// Number of score steps (m). Equals `category_thresholds.len()`.
    pub score_categories: u32,
    /// Platform-wide response count backing the current parameters.
    pub calibration_count: u32,
}

impl ItemMetadata {
    pub fn max_category(&self) -> u32 {
        self.score_categories.max(1)
    }
}

/// Immutable item snapshot for one session. Keys are sorted so every
/// iteration order is reproducible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemBank {
    items: BTreeMap<ItemId, ItemMetadata>,
}

impl ItemBank {
    pub fn new(items: Vec<ItemMetadata>) -> Self {
        Self {
            items: items
                .into_iter()
                .map(|item| (item.item_id.clone(), item))
                .collect(),
        }
    }

    pub fn get(&self, item_id: &str) -> Option<&ItemMetadata> {
        self.items.get(item_id)
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemMetadata> {
        self.items.values()
    }

    pub fn topic_items(&self, topic_id: &str) -> Vec<&ItemMetadata> {
        self.items
            .values()
            .filter(|item| item.topic_id == topic_id)
            .collect()
    }

    pub fn topic_ids(&self) -> BTreeSet<TopicId> {
        self.items
            .values()
            .map(|item| item.topic_id.clone())
            .collect()
    }

    pub fn system_ids(&self) -> BTreeSet<SystemId> {
        self.items
            .values()
            .map(|item| item.system_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Target content mix. Shares must sum to 1 within a grouping level;
/// topics or systems left out split the remaining mass equally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    pub topic_targets: BTreeMap<TopicId, f64>,
    pub system_targets: BTreeMap<SystemId, f64>,
}

impl Blueprint {
    pub fn validate(&self) -> Result<(), EngineError> {
        Self::validate_group("topic", &self.topic_targets)?;
        Self::validate_group("system", &self.system_targets)
    }

    fn validate_group(level: &str, targets: &BTreeMap<String, f64>) -> Result<(), EngineError> {
        let mut sum = 0.0;
        for (key, share) in targets {
            if !share.is_finite() || *share <= 0.0 || *share >= 1.0 {
                return Err(EngineError::InvalidBlueprint {
                    reason: format!("{level} share for {key} must be in (0,1), got {share}"),
                });
            }
            sum += share;
        }
        if sum > 1.0 + 1e-6 {
            return Err(EngineError::InvalidBlueprint {
                reason: format!("{level} shares sum to {sum:.4}, which exceeds 1"),
            });
        }
        Ok(())
    }
}

/// One scored response, kept per topic. The posterior is recomputed over
/// this history, so the record carries the item parameters it was scored
/// against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub item_id: ItemId,
    /// Score category achieved (k out of m).
    pub category: u32,
    /// Number of score steps (m).
    pub max_category: u32,
    pub difficulty: f64,
    pub thresholds: Vec<f64>,
    /// Whether the item had enough platform responses to trust its
    /// parameters when this response was recorded.
    pub calibrated: bool,
    pub timestamp: i64,
    pub se_after: f64,
}

impl ResponseRecord {
    pub fn score_fraction(&self) -> f64 {
        self.category as f64 / self.max_category.max(1) as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRecord {
    pub item_id: ItemId,
    pub succeeded: bool,
    pub latency_ms: i64,
    pub timestamp: i64,
}

/// Per-learner, per-topic ability state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicAbilityState {
    pub theta: f64,
    pub se: f64,
    pub response_count: u32,
    pub elo_rating: f64,
    /// Epoch milliseconds; 0 means never practiced.
    pub last_practiced_at: i64,
    pub responses: Vec<ResponseRecord>,
    pub probe_count: u32,
    pub last_probe: Option<ProbeRecord>,
}

impl Default for TopicAbilityState {
    fn default() -> Self {
        Self {
            theta: 0.0,
            se: 0.8,
            response_count: 0,
            elo_rating: crate::ability::elo::ANCHOR_RATING,
            last_practiced_at: 0,
            responses: Vec::new(),
            probe_count: 0,
            last_probe: None,
        }
    }
}

/// Sliding window of presentation timestamps for one item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureRecord {
    pub item_id: ItemId,
    pub presented_at: VecDeque<i64>,
}

/// Welford running mean/variance of a learner's scores on one item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningStats {
    pub count: u32,
    pub mean: f64,
    pub m2: f64,
}

impl RunningStats {
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        self.m2 / (self.count - 1) as f64
    }

    /// Standard error of the running mean; infinite until two samples exist.
    pub fn std_error(&self) -> f64 {
        if self.count < 2 {
            return f64::INFINITY;
        }
        (self.variance() / self.count as f64).sqrt()
    }
}

/// Spaced-repetition card for mastered material. Never deleted; a lapse
/// suspends it and returns the item to the training pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionCard {
    pub item_id: ItemId,
    pub topic_id: TopicId,
    pub stability: f64,
    pub difficulty_fsrs: f64,
    pub due_at: i64,
    pub last_reviewed_at: i64,
    pub lapse_count: u32,
    pub reps: u32,
    pub suspended: bool,
}

/// Historical per-topic learning-rate aggregate supplied at session start,
/// used to seed the scheduler's arms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicHistory {
    pub topic_id: TopicId,
    pub mean_se_drop_per_min: f64,
    pub observation_count: u32,
}

/// Everything the engine mutates for one learner. Passed explicitly into
/// every call; the engine holds no learner state of its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerState {
    pub abilities: BTreeMap<TopicId, TopicAbilityState>,
    pub exposure: BTreeMap<ItemId, ExposureRecord>,
    pub retention: BTreeMap<ItemId, RetentionCard>,
    pub mastered_topics: BTreeSet<TopicId>,
    /// Items held by the retention lane and hidden from the selector.
    pub frozen_items: BTreeSet<ItemId>,
    /// Topic id -> epoch ms when its stop rule fired.
    pub topic_cooldowns: BTreeMap<TopicId, i64>,
    pub item_score_stats: BTreeMap<ItemId, RunningStats>,
}

impl LearnerState {
    pub fn ability(&self, topic_id: &str) -> Option<&TopicAbilityState> {
        self.abilities.get(topic_id)
    }

    pub fn ability_mut(&mut self, topic_id: &str) -> &mut TopicAbilityState {
        self.abilities.entry(topic_id.to_string()).or_default()
    }
}
