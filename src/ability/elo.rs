//! Bayesian-Elo cold-start estimate. Carries a topic until enough scored
//! responses exist for the quadrature posterior to take over.

pub const ANCHOR_RATING: f64 = 1500.0;
pub const RATING_SCALE: f64 = 400.0;
const K_FACTOR: f64 = 16.0;

/// Item difficulty on the theta scale mapped to the rating scale.
pub fn item_rating(difficulty: f64) -> f64 {
    ANCHOR_RATING + RATING_SCALE * difficulty
}

/// Expected score fraction against an item at the given rating.
pub fn expected_score(rating: f64, item_rating: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((item_rating - rating) / RATING_SCALE))
}

/// One rating update from a partial-credit score fraction in [0, 1].
pub fn update_rating(rating: f64, difficulty: f64, score_fraction: f64) -> f64 {
    let expected = expected_score(rating, item_rating(difficulty));
    rating + K_FACTOR * (score_fraction.clamp(0.0, 1.0) - expected)
}

pub fn rating_to_theta(rating: f64) -> f64 {
    (rating - ANCHOR_RATING) / RATING_SCALE
}
