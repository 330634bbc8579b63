//! Bayesian quadrature over a fixed ability grid.
//!
//! The posterior over theta is evaluated pointwise: weight(theta_i) is
//! proportional to prior(theta_i) times the likelihood of the calibrated
//! response history, accumulated in log space and normalized. The estimate
//! is the posterior mean and its standard error the posterior sd.

use crate::ability::gpcm;
use crate::config::AbilityConfig;
use crate::types::ResponseRecord;

#[derive(Debug, Clone, Copy)]
pub struct Posterior {
    pub theta: f64,
    pub se: f64,
}

/// Evenly spaced grid over the configured theta range.
pub fn theta_grid(config: &AbilityConfig) -> Vec<f64> {
    let n = config.quadrature_points.max(3);
    let span = config.theta_max - config.theta_min;
    (0..n)
        .map(|i| config.theta_min + span * i as f64 / (n - 1) as f64)
        .collect()
}

/// Posterior mean and sd given a prior and the calibrated responses.
/// Returns `None` when the weights are numerically degenerate (all zero or
/// non-finite); the caller keeps the previous estimate in that case.
pub fn posterior(
    config: &AbilityConfig,
    prior_mean: f64,
    prior_sd: f64,
    responses: &[ResponseRecord],
) -> Option<Posterior> {
    let grid = theta_grid(config);
    let prior_var = (prior_sd * prior_sd).max(1e-12);

    let mut log_weights = Vec::with_capacity(grid.len());
    for &theta in &grid {
        let deviation = theta - prior_mean;
        let mut lw = -0.5 * deviation * deviation / prior_var;
        for record in responses.iter().filter(|r| r.calibrated) {
            let like = gpcm::category_likelihood(
                record.category,
                theta,
                record.difficulty,
                &record.thresholds,
            );
            if like <= 0.0 {
                lw = f64::NEG_INFINITY;
                break;
            }
            lw += like.ln();
        }
        log_weights.push(lw);
    }

    let max_lw = log_weights.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max_lw.is_finite() {
        return None;
    }

    let weights: Vec<f64> = log_weights.iter().map(|lw| (lw - max_lw).exp()).collect();
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return None;
    }

    let theta_hat: f64 = grid
        .iter()
        .zip(&weights)
        .map(|(theta, w)| theta * w / total)
        .sum();
    let variance: f64 = grid
        .iter()
        .zip(&weights)
        .map(|(theta, w)| w / total * (theta - theta_hat).powi(2))
        .sum();
    let se = variance.max(0.0).sqrt();
    if !theta_hat.is_finite() || !se.is_finite() {
        return None;
    }

    Some(Posterior {
        theta: theta_hat,
        // The grid can collapse all mass onto one point; keep se strictly
        // positive as the ability-state invariant requires.
        se: se.max(1e-3),
    })
}

/// Standard normal CDF via the Abramowitz-Stegun erf approximation
/// (7.1.26, absolute error below 1.5e-7).
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// Probability that ability exceeds the zero cut-point.
pub fn mastery_probability(theta: f64, se: f64) -> f64 {
    normal_cdf(theta / se.max(1e-9))
}
