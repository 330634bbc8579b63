//! Per-topic ability tracking.
//!
//! A topic starts on a Bayesian-Elo rating, blends into the quadrature
//! posterior on the transition response, and is fully psychometric from
//! then on. The standard error always comes from the posterior, whose
//! prior is centered on the Elo-derived theta so the scales stay anchored.

pub mod elo;
pub mod gpcm;
pub mod quadrature;

use tracing::warn;

use crate::config::AbilityConfig;
use crate::types::{ItemMetadata, ResponseRecord, TopicAbilityState};

#[derive(Debug, Clone, Copy)]
pub struct AbilityEstimate {
    pub theta: f64,
    pub se: f64,
    pub mastery_probability: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct AbilityUpdate {
    pub theta_before: f64,
    pub se_before: f64,
    pub estimate: AbilityEstimate,
    /// True when the posterior underflowed and the previous estimate was kept.
    pub degenerate: bool,
}

pub struct AbilityModel {
    config: AbilityConfig,
}

impl AbilityModel {
    pub fn new(config: AbilityConfig) -> Self {
        Self { config }
    }

    /// Current estimate for a topic without applying a response.
    pub fn estimate(&self, state: &TopicAbilityState) -> AbilityEstimate {
        AbilityEstimate {
            theta: state.theta,
            se: state.se,
            mastery_probability: quadrature::mastery_probability(state.theta, state.se),
        }
    }

    /// Applies one scored response (category k out of the item's m steps)
    /// and re-estimates the topic.
    pub fn update(
        &self,
        state: &mut TopicAbilityState,
        item: &ItemMetadata,
        category: u32,
        now_ms: i64,
    ) -> AbilityUpdate {
        let theta_before = state.theta;
        let se_before = state.se;

        let max_category = item.max_category();
        let category = category.min(max_category);
        let score_fraction = category as f64 / max_category as f64;

        state.elo_rating = elo::update_rating(state.elo_rating, item.difficulty, score_fraction);
        state.responses.push(ResponseRecord {
            item_id: item.item_id.clone(),
            category,
            max_category,
            difficulty: item.difficulty,
            thresholds: item.category_thresholds.clone(),
            calibrated: item.calibration_count >= self.config.item_calibration_floor,
            timestamp: now_ms,
            se_after: se_before,
        });
        state.response_count += 1;
        state.last_practiced_at = now_ms;

        let theta_elo = elo::rating_to_theta(state.elo_rating);
        let prior_sd = if state.response_count >= self.config.tighten_after_responses {
            self.config.tightened_prior_sd
        } else {
            self.config.prior_sd
        };

        let mut degenerate = false;
        match quadrature::posterior(&self.config, theta_elo, prior_sd, &state.responses) {
            Some(post) => {
                let count = state.response_count;
                state.theta = if count < self.config.cold_start_responses {
                    theta_elo
                } else if count == self.config.cold_start_responses {
                    self.config.blend_elo_weight * theta_elo
                        + (1.0 - self.config.blend_elo_weight) * post.theta
                } else {
                    post.theta
                };
                state.se = post.se;
            }
            None => {
                degenerate = true;
                warn!(
                    item_id = %item.item_id,
                    response_count = state.response_count,
                    "degenerate posterior, keeping previous ability estimate"
                );
            }
        }

        if let Some(last) = state.responses.last_mut() {
            last.se_after = state.se;
        }

        AbilityUpdate {
            theta_before,
            se_before,
            estimate: self.estimate(state),
            degenerate,
        }
    }
}
