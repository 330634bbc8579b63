//! Anti-overexposure policy.
//!
//! Reuse caps: at most one presentation per 24 hours, two per rolling week,
//! and a 96-hour cooldown before any reuse. The multiplier is 0 while a cap
//! or the cooldown binds, 0.5 once the cooldown expires, and 1.0 after
//! seven clean days. Items the learner has visibly mastered are additionally
//! dampened unless they already live in the retention lane.

use crate::config::ExposureConfig;
use crate::types::{ExposureRecord, LearnerState, RunningStats};

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 24 * HOUR_MS;

pub struct ExposurePolicy {
    config: ExposureConfig,
}

impl ExposurePolicy {
    pub fn new(config: ExposureConfig) -> Self {
        Self { config }
    }

    /// Multiplier in [0, 1] for presenting `item_id` at `now_ms`.
    pub fn multiplier(&self, learner: &LearnerState, item_id: &str, now_ms: i64) -> f64 {
        let base = match learner.exposure.get(item_id) {
            Some(record) => self.base_multiplier(record, now_ms),
            None => 1.0,
        };
        if base == 0.0 {
            return 0.0;
        }

        let in_retention = learner
            .retention
            .get(item_id)
            .map(|card| !card.suspended)
            .unwrap_or(false);
        if !in_retention && self.is_overfamiliar(learner.item_score_stats.get(item_id)) {
            return base * self.config.overfamiliar_multiplier;
        }
        base
    }

    fn base_multiplier(&self, record: &ExposureRecord, now_ms: i64) -> f64 {
        let last = match record.presented_at.iter().max() {
            Some(last) => *last,
            None => return 1.0,
        };

        let in_day = self.count_since(record, now_ms - DAY_MS);
        let in_week = self.count_since(record, now_ms - 7 * DAY_MS);
        if in_day >= self.config.daily_cap || in_week >= self.config.weekly_cap {
            return 0.0;
        }

        let since_last = now_ms - last;
        if since_last < self.config.cooldown_hours * HOUR_MS {
            0.0
        } else if since_last < self.config.clean_days_for_full * DAY_MS {
            self.config.post_cooldown_multiplier
        } else {
            1.0
        }
    }

    fn is_overfamiliar(&self, stats: Option<&RunningStats>) -> bool {
        match stats {
            Some(stats) => {
                stats.mean > self.config.overfamiliar_mean
                    && stats.std_error() < self.config.overfamiliar_se
            }
            None => false,
        }
    }

    fn count_since(&self, record: &ExposureRecord, cutoff_ms: i64) -> usize {
        record
            .presented_at
            .iter()
            .filter(|ts| **ts > cutoff_ms)
            .count()
    }

    /// Presentations within the sliding window, for telemetry.
    pub fn presentation_count(&self, learner: &LearnerState, item_id: &str, now_ms: i64) -> u32 {
        match learner.exposure.get(item_id) {
            Some(record) => {
                self.count_since(record, now_ms - self.config.window_days * DAY_MS) as u32
            }
            None => 0,
        }
    }

    /// Records a presentation and prunes timestamps older than the window.
    pub fn record_presentation(&self, learner: &mut LearnerState, item_id: &str, now_ms: i64) {
        let record = learner
            .exposure
            .entry(item_id.to_string())
            .or_insert_with(|| ExposureRecord {
                item_id: item_id.to_string(),
                presented_at: Default::default(),
            });
        record.presented_at.push_back(now_ms);
        let cutoff = now_ms - self.config.window_days * DAY_MS;
        while record.presented_at.front().is_some_and(|ts| *ts < cutoff) {
            record.presented_at.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ExposurePolicy {
        ExposurePolicy::new(ExposureConfig::default())
    }

    fn present(learner: &mut LearnerState, item: &str, at: i64) {
        policy().record_presentation(learner, item, at);
    }

    #[test]
    fn test_unseen_item_fully_eligible() {
        let learner = LearnerState::default();
        assert_eq!(policy().multiplier(&learner, "i1", 0), 1.0);
    }

    #[test]
    fn test_second_presentation_within_24h_blocked() {
        let mut learner = LearnerState::default();
        present(&mut learner, "i1", 0);
        assert_eq!(policy().multiplier(&learner, "i1", 12 * HOUR_MS), 0.0);
    }

    #[test]
    fn test_cooldown_gates_reuse_then_half_weight() {
        let mut learner = LearnerState::default();
        present(&mut learner, "i1", 0);
        // Still inside the 96h cooldown even though the daily cap cleared.
        assert_eq!(policy().multiplier(&learner, "i1", 95 * HOUR_MS), 0.0);
        assert_eq!(policy().multiplier(&learner, "i1", 97 * HOUR_MS), 0.5);
    }

    #[test]
    fn test_full_weight_after_seven_clean_days() {
        let mut learner = LearnerState::default();
        present(&mut learner, "i1", 0);
        assert_eq!(policy().multiplier(&learner, "i1", 7 * DAY_MS + 1), 1.0);
    }

    #[test]
    fn test_weekly_cap_blocks_third_presentation() {
        let mut learner = LearnerState::default();
        present(&mut learner, "i1", 0);
        present(&mut learner, "i1", 2 * DAY_MS);
        // 96h past the second presentation, but two presentations sit in
        // the rolling week.
        let now = 2 * DAY_MS + 97 * HOUR_MS;
        assert_eq!(policy().multiplier(&learner, "i1", now), 0.0);
    }

    #[test]
    fn test_overfamiliar_item_dampened() {
        let mut learner = LearnerState::default();
        let stats = learner.item_score_stats.entry("i1".to_string()).or_default();
        for _ in 0..12 {
            stats.record(1.0);
        }
        let m = policy().multiplier(&learner, "i1", 0);
        assert!((m - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_retention_card_suppresses_dampening() {
        let mut learner = LearnerState::default();
        let stats = learner.item_score_stats.entry("i1".to_string()).or_default();
        for _ in 0..12 {
            stats.record(1.0);
        }
        learner.retention.insert(
            "i1".to_string(),
            crate::types::RetentionCard {
                item_id: "i1".to_string(),
                topic_id: "t1".to_string(),
                stability: 2.0,
                difficulty_fsrs: 0.3,
                due_at: 0,
                last_reviewed_at: 0,
                lapse_count: 0,
                reps: 1,
                suspended: false,
            },
        );
        assert_eq!(policy().multiplier(&learner, "i1", 0), 1.0);
    }

    #[test]
    fn test_window_pruning() {
        let mut learner = LearnerState::default();
        present(&mut learner, "i1", 0);
        present(&mut learner, "i1", 20 * DAY_MS);
        let record = learner.exposure.get("i1").unwrap();
        assert_eq!(record.presented_at.len(), 1);
        assert_eq!(policy().presentation_count(&learner, "i1", 20 * DAY_MS), 1);
    }
}
