//! Rasch partial-credit scoring (GPCM with unit discrimination).
//!
//! An item with m step thresholds is scored in categories 0..=m. Category
//! probabilities come from a softmax over cumulative step logits, so the
//! single-threshold case reduces to the plain Rasch logistic.

/// Probability of each category 0..=m at ability `theta`.
pub fn category_probabilities(theta: f64, difficulty: f64, thresholds: &[f64]) -> Vec<f64> {
    let mut logits = Vec::with_capacity(thresholds.len() + 1);
    let mut acc = 0.0;
    logits.push(0.0);
    for step in thresholds {
        acc += theta - (difficulty + step);
        logits.push(acc);
    }

    let max_logit = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max_logit).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Likelihood of observing `category` at `theta`. Out-of-range categories
/// have likelihood zero.
pub fn category_likelihood(category: u32, theta: f64, difficulty: f64, thresholds: &[f64]) -> f64 {
    category_probabilities(theta, difficulty, thresholds)
        .get(category as usize)
        .copied()
        .unwrap_or(0.0)
}

/// Expected score category at `theta`.
pub fn expected_category(theta: f64, difficulty: f64, thresholds: &[f64]) -> f64 {
    category_probabilities(theta, difficulty, thresholds)
        .iter()
        .enumerate()
        .map(|(k, p)| k as f64 * p)
        .sum()
}

/// Fisher information at `theta`: the variance of the category-response
/// distribution. Peaks near the item difficulty.
pub fn fisher_information(theta: f64, difficulty: f64, thresholds: &[f64]) -> f64 {
    let probs = category_probabilities(theta, difficulty, thresholds);
    let mean: f64 = probs.iter().enumerate().map(|(k, p)| k as f64 * p).sum();
    probs
        .iter()
        .enumerate()
        .map(|(k, p)| p * (k as f64 - mean).powi(2))
        .sum()
}
