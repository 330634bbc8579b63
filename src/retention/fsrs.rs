//! FSRS forgetting-curve model used by the retention lane.
//!
//! Standard four-grade FSRS with the classic 17-weight parameter vector.
//! Difficulty is kept normalized to [0.1, 1.0] (the usual 1..10 scale
//! divided by ten). Stability is measured in days.

use serde::{Deserialize, Serialize};

const DECAY: f64 = -0.5;
const FACTOR: f64 = 19.0 / 81.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsrsParams {
    pub w: [f64; 17],
}

impl Default for FsrsParams {
    fn default() -> Self {
        Self {
            w: [
                0.4, 0.6, 2.4, 5.8, // w0-w3: initial stability per rating
                4.93, 0.94, 0.86, 0.01, 1.49, // w4-w8
                0.14, 0.94, 2.18, 0.05, 0.34, // w9-w13
                1.26, 0.29, 2.61, // w14-w16
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewRating {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl ReviewRating {
    /// Grades a review from correctness plus latency. Fast correct answers
    /// earn Easy, slow ones Hard.
    pub fn from_review(correct: bool, latency_ms: i64) -> Self {
        if !correct {
            return Self::Again;
        }
        if latency_ms < 2000 {
            Self::Easy
        } else if latency_ms < 5000 {
            Self::Good
        } else {
            Self::Hard
        }
    }
}

/// Result of pushing one review through the model.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub stability: f64,
    pub difficulty: f64,
    pub interval_days: f64,
    /// Recall probability at the moment of review.
    pub retrievability: f64,
    pub lapsed: bool,
}

/// Probability of recall after `elapsed_days` at the given stability.
pub fn retrievability(stability: f64, elapsed_days: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    (1.0 + FACTOR * elapsed_days.max(0.0) / stability).powf(DECAY)
}

/// Seeds a brand-new card from its first graded review.
pub fn first_review(rating: ReviewRating, desired_retention: f64, params: &FsrsParams) -> ReviewOutcome {
    let w = &params.w;
    let stability = initial_stability(w, rating as i32);
    let difficulty = initial_difficulty(w, rating as i32);
    ReviewOutcome {
        stability,
        difficulty,
        interval_days: next_interval(stability, desired_retention),
        retrievability: 1.0,
        lapsed: rating == ReviewRating::Again,
    }
}

/// Advances an existing card by one review.
pub fn review(
    stability: f64,
    difficulty: f64,
    elapsed_days: f64,
    rating: ReviewRating,
    desired_retention: f64,
    params: &FsrsParams,
) -> ReviewOutcome {
    let w = &params.w;
    let r = retrievability(stability, elapsed_days);
    let new_difficulty = next_difficulty(w, difficulty, rating as i32);
    let lapsed = rating == ReviewRating::Again;
    let new_stability = if lapsed {
        next_forget_stability(w, difficulty, stability, r)
    } else {
        next_recall_stability(w, difficulty, stability, r, rating as i32)
    };
    ReviewOutcome {
        stability: new_stability,
        difficulty: new_difficulty,
        interval_days: next_interval(new_stability, desired_retention),
        retrievability: r,
        lapsed,
    }
}

fn initial_stability(w: &[f64; 17], rating: i32) -> f64 {
    w[(rating - 1) as usize].max(0.1)
}

fn initial_difficulty(w: &[f64; 17], rating: i32) -> f64 {
    let d = w[4] - (rating - 3) as f64 * w[5];
    d.clamp(1.0, 10.0) / 10.0
}

fn next_difficulty(w: &[f64; 17], d: f64, rating: i32) -> f64 {
    let d_10 = d * 10.0;
    let delta = -(rating - 3) as f64;
    let d_new = d_10 + w[6] * delta;
    let d_mean = w[7] * (w[4] - 3.0 * w[5]) + (1.0 - w[7]) * d_new;
    d_mean.clamp(1.0, 10.0) / 10.0
}

fn next_recall_stability(w: &[f64; 17], d: f64, s: f64, r: f64, rating: i32) -> f64 {
    let d_10 = d * 10.0;
    let hard_penalty = if rating == 2 { w[15] } else { 1.0 };
    let easy_bonus = if rating == 4 { w[16] } else { 1.0 };
    let new_s = s
        * (1.0
            + w[8].exp()
                * (11.0 - d_10)
                * s.powf(-w[9])
                * ((1.0 - r) * w[10]).exp_m1()
                * hard_penalty
                * easy_bonus);
    new_s.max(0.1)
}

/// Lapse path: stability can only shrink.
fn next_forget_stability(w: &[f64; 17], d: f64, s: f64, r: f64) -> f64 {
    let d_10 = d * 10.0;
    let new_s =
        w[11] * d_10.powf(-w[12]) * ((s + 1.0).powf(w[13]) - 1.0) * (1.0 - r).powf(w[14]).exp();
    new_s.clamp(0.1, s)
}

fn next_interval(stability: f64, desired_retention: f64) -> f64 {
    let safe_retention = desired_retention.clamp(0.0001, 0.9999);
    let interval = stability / FACTOR * (safe_retention.powf(1.0 / DECAY) - 1.0);
    interval.clamp(1.0, 36500.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrievability_decays_from_one() {
        let r0 = retrievability(10.0, 0.0);
        let r5 = retrievability(10.0, 5.0);
        let r10 = retrievability(10.0, 10.0);
        assert!((r0 - 1.0).abs() < 1e-9);
        assert!(r0 > r5);
        assert!(r5 > r10);
    }

    #[test]
    fn test_first_review_grades_spread_stability() {
        let params = FsrsParams::default();
        let again = first_review(ReviewRating::Again, 0.9, &params);
        let good = first_review(ReviewRating::Good, 0.9, &params);
        let easy = first_review(ReviewRating::Easy, 0.9, &params);
        assert!(again.stability < good.stability);
        assert!(good.stability < easy.stability);
        assert!(again.lapsed);
        assert!(!good.lapsed);
    }

    #[test]
    fn test_successful_review_grows_stability() {
        let params = FsrsParams::default();
        let outcome = review(5.0, 0.5, 5.0, ReviewRating::Good, 0.9, &params);
        assert!(outcome.stability > 5.0);
        assert!(!outcome.lapsed);
        assert!(outcome.interval_days >= 1.0);
    }

    #[test]
    fn test_lapse_shrinks_stability() {
        let params = FsrsParams::default();
        let outcome = review(20.0, 0.5, 10.0, ReviewRating::Again, 0.9, &params);
        assert!(outcome.lapsed);
        assert!(outcome.stability < 20.0);
        assert!(outcome.stability >= 0.1);
    }

    #[test]
    fn test_rating_from_latency() {
        assert_eq!(ReviewRating::from_review(false, 100), ReviewRating::Again);
        assert_eq!(ReviewRating::from_review(true, 1500), ReviewRating::Easy);
        assert_eq!(ReviewRating::from_review(true, 3000), ReviewRating::Good);
        assert_eq!(ReviewRating::from_review(true, 9000), ReviewRating::Hard);
    }

    #[test]
    fn test_interval_clamped() {
        assert!(next_interval(0.001, 0.9) >= 1.0);
        assert!(next_interval(1e9, 0.9) <= 36500.0);
    }
}
