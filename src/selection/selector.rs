//! Randomesque item selection for the active topic.
//!
//! Candidates are scored by Fisher information per expected second, shaped
//! by the blueprint and exposure multipliers and a late-session fatigue
//! scalar. The top five by utility form the randomesque pool and one is
//! drawn uniformly. Exposure caps are hard: an item with multiplier zero
//! never survives, no matter how the other filters are relaxed.

use tracing::debug;

use crate::ability::gpcm;
use crate::config::SelectionConfig;
use crate::error::EngineError;
use crate::rng::SessionRng;
use crate::selection::blueprint::{BlueprintPolicy, ShareTracker};
use crate::selection::exposure::ExposurePolicy;
use crate::types::{ItemMetadata, LearnerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    HighestInformation,
    RelaxedTimeCap,
    RelaxedBlueprintWindow,
}

impl SelectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionReason::HighestInformation => "highest_information",
            SelectionReason::RelaxedTimeCap => "relaxed_time_cap",
            SelectionReason::RelaxedBlueprintWindow => "relaxed_blueprint_window",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectedItem {
    pub item_id: String,
    pub utility: f64,
    pub fisher_info: f64,
    /// Whether the item probes near the current estimate.
    pub is_probe: bool,
    pub reason: SelectionReason,
}

struct ScoredCandidate<'a> {
    item: &'a ItemMetadata,
    utility: f64,
    fisher_info: f64,
    within_time_cap: bool,
    within_window: bool,
}

pub struct ItemSelector {
    config: SelectionConfig,
}

impl ItemSelector {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    /// Picks the next item for the topic, or `NoEligibleItem` when even the
    /// relaxed filters leave nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn select_next(
        &self,
        topic_id: &str,
        theta: f64,
        candidates: &[&ItemMetadata],
        learner: &LearnerState,
        exposure: &ExposurePolicy,
        blueprint: &BlueprintPolicy,
        tracker: &ShareTracker,
        session_elapsed_min: f64,
        rng: &mut SessionRng,
        now_ms: i64,
    ) -> Result<SelectedItem, EngineError> {
        let fatigue_scalar = if session_elapsed_min > self.config.fatigue_after_minutes {
            self.config.fatigue_scalar
        } else {
            1.0
        };

        let mut scored: Vec<ScoredCandidate> = Vec::with_capacity(candidates.len());
        for item in candidates {
            if learner.frozen_items.contains(&item.item_id) {
                continue;
            }
            let exposure_multiplier = exposure.multiplier(learner, &item.item_id, now_ms);
            if exposure_multiplier == 0.0 {
                continue;
            }
            let fisher_info =
                gpcm::fisher_information(theta, item.difficulty, &item.category_thresholds);
            let blueprint_multiplier = blueprint.topic_multiplier(&item.topic_id, tracker)
                * blueprint.system_multiplier(&item.system_id, tracker);
            let utility = fisher_info / item.median_time_sec.max(1.0)
                * blueprint_multiplier
                * exposure_multiplier
                * fatigue_scalar;
            scored.push(ScoredCandidate {
                item,
                utility,
                fisher_info,
                within_time_cap: item.median_time_sec <= self.config.max_median_time_sec,
                within_window: blueprint.within_window(&item.topic_id, &item.system_id, tracker),
            });
        }

        let (pool, reason) = self.filter_with_relaxation(topic_id, scored)?;
        Ok(self.randomesque_pick(theta, pool, reason, rng))
    }

    /// Filter ladder: full filters first, then drop the time cap, then the
    /// blueprint window. Exposure caps were already applied and are never
    /// relaxed.
    fn filter_with_relaxation<'a>(
        &self,
        topic_id: &str,
        scored: Vec<ScoredCandidate<'a>>,
    ) -> Result<(Vec<ScoredCandidate<'a>>, SelectionReason), EngineError> {
        if scored.is_empty() {
            return Err(EngineError::NoEligibleItem {
                topic_id: topic_id.to_string(),
            });
        }

        let strict: Vec<usize> = scored
            .iter()
            .enumerate()
            .filter(|(_, c)| c.within_time_cap && c.within_window)
            .map(|(i, _)| i)
            .collect();
        if !strict.is_empty() {
            return Ok((
                keep_indices(scored, &strict),
                SelectionReason::HighestInformation,
            ));
        }

        let no_time_cap: Vec<usize> = scored
            .iter()
            .enumerate()
            .filter(|(_, c)| c.within_window)
            .map(|(i, _)| i)
            .collect();
        if !no_time_cap.is_empty() {
            debug!(topic_id, "relaxed median-time cap to fill candidate pool");
            return Ok((
                keep_indices(scored, &no_time_cap),
                SelectionReason::RelaxedTimeCap,
            ));
        }

        debug!(topic_id, "relaxed blueprint window to fill candidate pool");
        Ok((scored, SelectionReason::RelaxedBlueprintWindow))
    }

    fn randomesque_pick(
        &self,
        theta: f64,
        mut pool: Vec<ScoredCandidate>,
        reason: SelectionReason,
        rng: &mut SessionRng,
    ) -> SelectedItem {
        // Stable sort so equal utilities keep item-id order.
        pool.sort_by(|a, b| {
            b.utility
                .partial_cmp(&a.utility)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item.item_id.cmp(&b.item.item_id))
        });
        pool.truncate(self.config.randomesque_size);
        let chosen = &pool[rng.pick_index(pool.len())];

        SelectedItem {
            item_id: chosen.item.item_id.clone(),
            utility: chosen.utility,
            fisher_info: chosen.fisher_info,
            is_probe: (theta - chosen.item.difficulty).abs() <= self.config.probe_window,
            reason,
        }
    }
}

fn keep_indices<'a>(scored: Vec<ScoredCandidate<'a>>, indices: &[usize]) -> Vec<ScoredCandidate<'a>> {
    scored
        .into_iter()
        .enumerate()
        .filter(|(i, _)| indices.contains(i))
        .map(|(_, c)| c)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlueprintConfig, ExposureConfig};
    use crate::types::{Blueprint, ItemBank};

    fn item(id: &str, difficulty: f64, median_time_sec: f64) -> ItemMetadata {
        ItemMetadata {
            item_id: id.to_string(),
            topic_id: "t1".to_string(),
            system_id: "s1".to_string(),
            difficulty,
            category_thresholds: vec![0.0],
            median_time_sec,
            score_categories: 1,
            calibration_count: 50,
        }
    }

    struct Fixture {
        bank: ItemBank,
        blueprint: BlueprintPolicy,
        exposure: ExposurePolicy,
        selector: ItemSelector,
    }

    fn fixture(items: Vec<ItemMetadata>) -> Fixture {
        let bank = ItemBank::new(items);
        let blueprint =
            BlueprintPolicy::new(&Blueprint::default(), &bank, BlueprintConfig::default())
                .unwrap();
        Fixture {
            bank,
            blueprint,
            exposure: ExposurePolicy::new(ExposureConfig::default()),
            selector: ItemSelector::new(SelectionConfig::default()),
        }
    }

    fn select(fx: &Fixture, learner: &LearnerState, theta: f64, seed: u64) -> SelectedItem {
        let candidates = fx.bank.topic_items("t1");
        let tracker = ShareTracker::default();
        let mut rng = SessionRng::seed_from(seed);
        fx.selector
            .select_next(
                "t1",
                theta,
                &candidates,
                learner,
                &fx.exposure,
                &fx.blueprint,
                &tracker,
                0.0,
                &mut rng,
                1_000_000,
            )
            .unwrap()
    }

    #[test]
    fn test_informative_items_fill_the_pool() {
        // Six difficulty-matched candidates plus one far-off; the far-off
        // item has the lowest information and must never be drawn.
        let mut items: Vec<ItemMetadata> =
            (0..6).map(|i| item(&format!("near-{i}"), 0.0, 60.0)).collect();
        items.push(item("far", 3.5, 60.0));
        let fx = fixture(items);
        let learner = LearnerState::default();
        for seed in 0..20 {
            let picked = select(&fx, &learner, 0.0, seed);
            assert_ne!(picked.item_id, "far");
            assert_eq!(picked.reason, SelectionReason::HighestInformation);
        }
    }

    #[test]
    fn test_frozen_items_never_offered() {
        let fx = fixture(vec![item("a", 0.0, 60.0), item("b", 0.0, 60.0)]);
        let mut learner = LearnerState::default();
        learner.frozen_items.insert("a".to_string());
        for seed in 0..10 {
            assert_eq!(select(&fx, &learner, 0.0, seed).item_id, "b");
        }
    }

    #[test]
    fn test_capped_item_excluded_and_error_when_pool_empty() {
        let fx = fixture(vec![item("a", 0.0, 60.0)]);
        let mut learner = LearnerState::default();
        fx.exposure.record_presentation(&mut learner, "a", 1_000_000);

        let candidates = fx.bank.topic_items("t1");
        let tracker = ShareTracker::default();
        let mut rng = SessionRng::seed_from(1);
        let result = fx.selector.select_next(
            "t1",
            0.0,
            &candidates,
            &learner,
            &fx.exposure,
            &fx.blueprint,
            &tracker,
            0.0,
            &mut rng,
            1_000_500,
        );
        assert!(matches!(result, Err(EngineError::NoEligibleItem { .. })));
    }

    #[test]
    fn test_time_cap_relaxed_when_nothing_survives() {
        let fx = fixture(vec![item("slow", 0.0, 600.0)]);
        let learner = LearnerState::default();
        let picked = select(&fx, &learner, 0.0, 3);
        assert_eq!(picked.item_id, "slow");
        assert_eq!(picked.reason, SelectionReason::RelaxedTimeCap);
    }

    #[test]
    fn test_probe_flag_tracks_difficulty_window() {
        let fx = fixture(vec![item("near", 0.2, 60.0)]);
        let learner = LearnerState::default();
        let picked = select(&fx, &learner, 0.0, 4);
        assert!(picked.is_probe);

        let fx_far = fixture(vec![item("off", 1.0, 60.0)]);
        let picked_far = select(&fx_far, &learner, 0.0, 4);
        assert!(!picked_far.is_probe);
    }

    #[test]
    fn test_fatigue_scales_utility_not_membership() {
        let fx = fixture(vec![item("a", 0.0, 60.0)]);
        let learner = LearnerState::default();
        let candidates = fx.bank.topic_items("t1");
        let tracker = ShareTracker::default();
        let mut rng = SessionRng::seed_from(9);
        let late = fx
            .selector
            .select_next(
                "t1",
                0.0,
                &candidates,
                &learner,
                &fx.exposure,
                &fx.blueprint,
                &tracker,
                50.0,
                &mut rng,
                1_000_000,
            )
            .unwrap();
        let early = select(&fx, &learner, 0.0, 9);
        assert!((late.utility - early.utility * 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_same_seed_same_pick() {
        let items: Vec<ItemMetadata> =
            (0..8).map(|i| item(&format!("i-{i}"), 0.0, 60.0)).collect();
        let fx = fixture(items);
        let learner = LearnerState::default();
        let a = select(&fx, &learner, 0.0, 77);
        let b = select(&fx, &learner, 0.0, 77);
        assert_eq!(a.item_id, b.item_id);
    }
}
