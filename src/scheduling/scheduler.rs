//! Cross-topic scheduling via Thompson Sampling.
//!
//! Each topic carries a Gaussian posterior over its expected SE reduction
//! per minute. Choosing a topic samples every eligible arm once, shapes the
//! draw by staleness urgency and the blueprint multiplier, and takes the
//! best score. Arms are rebuilt from historical aggregates at session start
//! and updated online as topic visits complete.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SchedulerConfig;
use crate::error::EngineError;
use crate::rng::SessionRng;
use crate::selection::blueprint::{BlueprintPolicy, ShareTracker};
use crate::types::{LearnerState, TopicHistory, TopicId};

const DAY_MS: i64 = 86_400_000;
const HOUR_MS: i64 = 3_600_000;
const MIN_ARM_VARIANCE: f64 = 1e-6;

/// Gaussian belief over a topic's SE reduction per minute. Ephemeral per
/// session; rebuilt from history aggregates at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerArm {
    pub mean: f64,
    pub variance: f64,
    pub observations: u32,
}

#[derive(Debug, Clone)]
pub struct TopicChoice {
    pub topic_id: TopicId,
    /// Thompson draw of SE reduction per minute.
    pub sampled_gain: f64,
    pub urgency: f64,
    pub score: f64,
    /// True when the widest-gap fallback picked the topic.
    pub via_fallback: bool,
}

pub struct TopicScheduler {
    config: SchedulerConfig,
}

impl TopicScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Arms for every candidate topic, seeded from history where it exists
    /// and from the configured prior otherwise.
    pub fn init_arms(
        &self,
        topics: &BTreeSet<TopicId>,
        histories: &[TopicHistory],
    ) -> BTreeMap<TopicId, SchedulerArm> {
        let mut arms = BTreeMap::new();
        for topic_id in topics {
            let mut arm = SchedulerArm {
                mean: self.config.default_arm_mean,
                variance: self.config.default_arm_variance,
                observations: 0,
            };
            if let Some(history) = histories.iter().find(|h| &h.topic_id == topic_id) {
                if history.observation_count > 0 {
                    let obs_var = self.config.observation_noise_sd.powi(2);
                    let n = history.observation_count as f64;
                    let precision = 1.0 / arm.variance + n / obs_var;
                    arm.mean = (arm.mean / arm.variance
                        + n * history.mean_se_drop_per_min / obs_var)
                        / precision;
                    arm.variance = (1.0 / precision).max(MIN_ARM_VARIANCE);
                    arm.observations = history.observation_count;
                }
            }
            arms.insert(topic_id.clone(), arm);
        }
        arms
    }

    /// Folds one realized SE-reduction-per-minute observation into an arm.
    pub fn observe(&self, arm: &mut SchedulerArm, se_drop_per_min: f64) {
        let obs_var = self.config.observation_noise_sd.powi(2);
        let precision = 1.0 / arm.variance + 1.0 / obs_var;
        arm.mean = (arm.mean / arm.variance + se_drop_per_min / obs_var) / precision;
        arm.variance = (1.0 / precision).max(MIN_ARM_VARIANCE);
        arm.observations += 1;
    }

    /// Chooses the next topic among `candidates` (topics that still have
    /// selectable items and are not mastered). Topics under the 96-hour
    /// cooldown are skipped unless their blueprint deficit overrides it;
    /// when nothing is eligible the candidate furthest below its target
    /// wins instead of stalling.
    pub fn choose_next_topic(
        &self,
        arms: &BTreeMap<TopicId, SchedulerArm>,
        candidates: &BTreeSet<TopicId>,
        learner: &LearnerState,
        blueprint: &BlueprintPolicy,
        tracker: &ShareTracker,
        rng: &mut SessionRng,
        now_ms: i64,
    ) -> Result<TopicChoice, EngineError> {
        if candidates.is_empty() {
            return Err(EngineError::NoEligibleTopic);
        }

        let eligible: Vec<&TopicId> = candidates
            .iter()
            .filter(|topic_id| self.is_eligible(topic_id, learner, blueprint, tracker, now_ms))
            .collect();

        if eligible.is_empty() {
            let topic_id = self.largest_gap_fallback(candidates, blueprint, tracker);
            debug!(topic_id = %topic_id, "no eligible topic, falling back to widest gap");
            return Ok(TopicChoice {
                topic_id,
                sampled_gain: 0.0,
                urgency: 1.0,
                score: 0.0,
                via_fallback: true,
            });
        }

        // Sorted iteration: the draw order is part of the deterministic
        // decision sequence.
        let mut draws: Vec<(TopicId, f64, f64, f64)> = Vec::with_capacity(eligible.len());
        for topic_id in eligible {
            let arm = arms.get(topic_id);
            let (mean, variance) = arm
                .map(|a| (a.mean, a.variance))
                .unwrap_or((self.config.default_arm_mean, self.config.default_arm_variance));
            let sampled = rng.normal(mean, variance.sqrt());
            let urgency = self.urgency(learner, topic_id, now_ms);
            let score = sampled * urgency * blueprint.topic_multiplier(topic_id, tracker);
            draws.push((topic_id.clone(), sampled, urgency, score));
        }

        let best_score = draws
            .iter()
            .map(|(_, _, _, score)| *score)
            .fold(f64::NEG_INFINITY, f64::max);
        let tie_band = self.config.tie_epsilon * best_score.abs().max(1e-9);
        let mut tied: Vec<&(TopicId, f64, f64, f64)> = draws
            .iter()
            .filter(|(_, _, _, score)| (best_score - score) <= tie_band)
            .collect();

        // Within the tie band: highest blueprint deficit, then highest SE,
        // then longest time since practice, in that strict order.
        tied.sort_by(|a, b| {
            let deficit_a = blueprint.topic_deficit(&a.0, tracker);
            let deficit_b = blueprint.topic_deficit(&b.0, tracker);
            deficit_b
                .partial_cmp(&deficit_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let se_a = self.topic_se(learner, &a.0);
                    let se_b = self.topic_se(learner, &b.0);
                    se_b.partial_cmp(&se_a).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    let stale_a = self.staleness_days(learner, &a.0, now_ms);
                    let stale_b = self.staleness_days(learner, &b.0, now_ms);
                    stale_b
                        .partial_cmp(&stale_a)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.0.cmp(&b.0))
        });

        let (topic_id, sampled_gain, urgency, score) = tied[0].clone();
        Ok(TopicChoice {
            topic_id,
            sampled_gain,
            urgency,
            score,
            via_fallback: false,
        })
    }

    fn is_eligible(
        &self,
        topic_id: &str,
        learner: &LearnerState,
        blueprint: &BlueprintPolicy,
        tracker: &ShareTracker,
        now_ms: i64,
    ) -> bool {
        match learner.topic_cooldowns.get(topic_id) {
            Some(stopped_at) => {
                let cooled = now_ms - stopped_at >= self.config.topic_cooldown_hours * HOUR_MS;
                // A large enough blueprint deficit overrides the cooldown.
                cooled
                    || blueprint.topic_deficit(topic_id, tracker) > self.config.deficit_override
            }
            None => true,
        }
    }

    /// Candidate whose live share sits furthest below its blueprint target,
    /// so forced picks pull the mix toward the targets.
    fn largest_gap_fallback(
        &self,
        candidates: &BTreeSet<TopicId>,
        blueprint: &BlueprintPolicy,
        tracker: &ShareTracker,
    ) -> TopicId {
        candidates
            .iter()
            .min_by(|a, b| {
                let gap_a = blueprint.topic_gap(a, tracker);
                let gap_b = blueprint.topic_gap(b, tracker);
                gap_b
                    .partial_cmp(&gap_a)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.cmp(b))
            })
            .cloned()
            .unwrap_or_default()
    }

    fn urgency(&self, learner: &LearnerState, topic_id: &str, now_ms: i64) -> f64 {
        let days = self.practiced_days_ago(learner, topic_id, now_ms).unwrap_or(0.0);
        1.0 + (days - self.config.urgency_grace_days).max(0.0) / self.config.urgency_divisor_days
    }

    fn practiced_days_ago(
        &self,
        learner: &LearnerState,
        topic_id: &str,
        now_ms: i64,
    ) -> Option<f64> {
        let state = learner.ability(topic_id)?;
        if state.last_practiced_at <= 0 {
            return None;
        }
        Some((now_ms - state.last_practiced_at).max(0) as f64 / DAY_MS as f64)
    }

    fn topic_se(&self, learner: &LearnerState, topic_id: &str) -> f64 {
        learner.ability(topic_id).map(|s| s.se).unwrap_or(0.8)
    }

    /// Never-practiced topics rank as maximally stale in the tie-break.
    fn staleness_days(&self, learner: &LearnerState, topic_id: &str, now_ms: i64) -> f64 {
        self.practiced_days_ago(learner, topic_id, now_ms)
            .unwrap_or(f64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlueprintConfig;
    use crate::types::{Blueprint, ItemBank, ItemMetadata};

    fn bank(topics: &[&str]) -> ItemBank {
        let items = topics
            .iter()
            .enumerate()
            .map(|(i, topic)| ItemMetadata {
                item_id: format!("item-{i}"),
                topic_id: topic.to_string(),
                system_id: "s1".to_string(),
                difficulty: 0.0,
                category_thresholds: vec![0.0],
                median_time_sec: 60.0,
                score_categories: 1,
                calibration_count: 50,
            })
            .collect();
        ItemBank::new(items)
    }

    fn blueprint_for(bank: &ItemBank) -> BlueprintPolicy {
        BlueprintPolicy::new(&Blueprint::default(), bank, BlueprintConfig::default()).unwrap()
    }

    fn topic_set(topics: &[&str]) -> BTreeSet<TopicId> {
        topics.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_history_tightens_arm() {
        let scheduler = TopicScheduler::new(SchedulerConfig::default());
        let histories = vec![TopicHistory {
            topic_id: "t1".to_string(),
            mean_se_drop_per_min: 0.08,
            observation_count: 20,
        }];
        let arms = scheduler.init_arms(&topic_set(&["t1", "t2"]), &histories);
        let seeded = &arms["t1"];
        let fresh = &arms["t2"];
        assert!(seeded.variance < fresh.variance);
        assert!(seeded.mean > fresh.mean);
        assert_eq!(fresh.observations, 0);
    }

    #[test]
    fn test_observe_moves_mean_toward_observation() {
        let scheduler = TopicScheduler::new(SchedulerConfig::default());
        let mut arm = SchedulerArm {
            mean: 0.05,
            variance: 0.01,
            observations: 0,
        };
        scheduler.observe(&mut arm, 0.2);
        assert!(arm.mean > 0.05);
        assert!(arm.variance < 0.01);
        assert_eq!(arm.observations, 1);
    }

    #[test]
    fn test_strong_arm_wins_most_draws() {
        let bank = bank(&["t1", "t2"]);
        let blueprint = blueprint_for(&bank);
        let scheduler = TopicScheduler::new(SchedulerConfig::default());
        let learner = LearnerState::default();
        let tracker = ShareTracker::default();
        let candidates = topic_set(&["t1", "t2"]);

        let mut arms = scheduler.init_arms(&candidates, &[]);
        arms.get_mut("t1").unwrap().mean = 0.20;
        arms.get_mut("t1").unwrap().variance = 1e-4;
        arms.get_mut("t2").unwrap().mean = 0.01;
        arms.get_mut("t2").unwrap().variance = 1e-4;

        let mut rng = SessionRng::seed_from(5);
        let mut t1_wins = 0;
        for _ in 0..50 {
            let choice = scheduler
                .choose_next_topic(
                    &arms, &candidates, &learner, &blueprint, &tracker, &mut rng, 0,
                )
                .unwrap();
            if choice.topic_id == "t1" {
                t1_wins += 1;
            }
        }
        assert!(t1_wins > 40, "t1 won only {t1_wins} of 50 draws");
    }

    #[test]
    fn test_cooldown_excludes_topic() {
        let bank = bank(&["t1", "t2"]);
        let blueprint = blueprint_for(&bank);
        let scheduler = TopicScheduler::new(SchedulerConfig::default());
        let candidates = topic_set(&["t1", "t2"]);
        let arms = scheduler.init_arms(&candidates, &[]);

        // Balanced shares keep both deficits at zero, so the cooldown is
        // the only thing separating the two topics.
        let mut tracker = ShareTracker::default();
        for _ in 0..3 {
            tracker.record("t1", "s1");
            tracker.record("t2", "s1");
        }

        let mut learner = LearnerState::default();
        let now = 1_000_000_000;
        learner.topic_cooldowns.insert("t1".to_string(), now);

        let mut rng = SessionRng::seed_from(8);
        for _ in 0..10 {
            let choice = scheduler
                .choose_next_topic(
                    &arms,
                    &candidates,
                    &learner,
                    &blueprint,
                    &tracker,
                    &mut rng,
                    now + HOUR_MS,
                )
                .unwrap();
            assert_eq!(choice.topic_id, "t2");
        }
    }

    #[test]
    fn test_deficit_overrides_cooldown() {
        let bank = bank(&["t1", "t2"]);
        let mut raw = Blueprint::default();
        raw.topic_targets.insert("t1".to_string(), 0.7);
        raw.topic_targets.insert("t2".to_string(), 0.3);
        let blueprint =
            BlueprintPolicy::new(&raw, &bank, BlueprintConfig::default()).unwrap();
        let scheduler = TopicScheduler::new(SchedulerConfig::default());
        let candidates = topic_set(&["t1", "t2"]);
        let arms = scheduler.init_arms(&candidates, &[]);

        let now = 1_000_000_000;
        let mut learner = LearnerState::default();
        learner.topic_cooldowns.insert("t1".to_string(), now);
        learner.topic_cooldowns.insert("t2".to_string(), now);

        // Every presentation so far went to t2, so t1 holds a 70% deficit
        // that overrides its cooldown; t2 has none and stays out.
        let mut tracker = ShareTracker::default();
        for _ in 0..12 {
            tracker.record("t2", "s1");
        }

        let mut rng = SessionRng::seed_from(3);
        let choice = scheduler
            .choose_next_topic(
                &arms,
                &candidates,
                &learner,
                &blueprint,
                &tracker,
                &mut rng,
                now + HOUR_MS,
            )
            .unwrap();
        assert_eq!(choice.topic_id, "t1");
        assert!(!choice.via_fallback);
    }

    #[test]
    fn test_fallback_when_everything_cooled() {
        let bank = bank(&["t1", "t2"]);
        let blueprint = blueprint_for(&bank);
        let scheduler = TopicScheduler::new(SchedulerConfig::default());
        let candidates = topic_set(&["t1", "t2"]);
        let arms = scheduler.init_arms(&candidates, &[]);

        let now = 1_000_000_000;
        let mut learner = LearnerState::default();
        learner.topic_cooldowns.insert("t1".to_string(), now);
        learner.topic_cooldowns.insert("t2".to_string(), now);

        // Shares hover near the 50/50 targets, so neither deficit clears
        // the override threshold and both cooldowns hold.
        let mut tracker = ShareTracker::default();
        for _ in 0..5 {
            tracker.record("t1", "s1");
        }
        for _ in 0..4 {
            tracker.record("t2", "s1");
        }

        let mut rng = SessionRng::seed_from(4);
        let choice = scheduler
            .choose_next_topic(
                &arms,
                &candidates,
                &learner,
                &blueprint,
                &tracker,
                &mut rng,
                now + HOUR_MS,
            )
            .unwrap();
        assert!(choice.via_fallback);
        assert_eq!(choice.topic_id, "t2");
    }

    #[test]
    fn test_empty_candidates_error() {
        let bank = bank(&["t1"]);
        let blueprint = blueprint_for(&bank);
        let scheduler = TopicScheduler::new(SchedulerConfig::default());
        let arms = BTreeMap::new();
        let mut rng = SessionRng::seed_from(4);
        let result = scheduler.choose_next_topic(
            &arms,
            &BTreeSet::new(),
            &LearnerState::default(),
            &blueprint,
            &ShareTracker::default(),
            &mut rng,
            0,
        );
        assert!(matches!(result, Err(EngineError::NoEligibleTopic)));
    }

    #[test]
    fn test_urgency_grows_after_grace_period() {
        let scheduler = TopicScheduler::new(SchedulerConfig::default());
        let mut learner = LearnerState::default();
        let now = 20 * DAY_MS;
        learner.ability_mut("t1").last_practiced_at = now - 10 * DAY_MS;
        learner.ability_mut("t2").last_practiced_at = now - DAY_MS;
        let stale = scheduler.urgency(&learner, "t1", now);
        let fresh = scheduler.urgency(&learner, "t2", now);
        assert!((stale - 2.0).abs() < 1e-9, "10 days stale should double urgency");
        assert!((fresh - 1.0).abs() < 1e-9);
    }
}
