//! Offline EM refit of item difficulty from pooled response logs.
//!
//! Runs between sessions, never against a live session: the caller swaps
//! the returned bank in atomically. The E-step computes a quadrature
//! posterior over ability for every (learner, topic) cell under the current
//! parameters; the M-step moves each item's difficulty by a damped Newton
//! step against the expected-score residuals. Thresholds are kept but
//! re-centered, with their mean folded into the difficulty so the scale
//! stays identified. Sparse items are shrunk toward their previous
//! difficulty; items under the response floor keep their parameters and
//! only refresh their calibration count.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ability::gpcm;
use crate::ability::quadrature::theta_grid;
use crate::config::{AbilityConfig, CalibrationConfig};
use crate::types::{ItemBank, ItemId, TopicId};

/// One historical response row, as the telemetry log stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseLogEntry {
    pub learner_id: String,
    pub item_id: ItemId,
    pub category: u32,
    pub timestamp: i64,
}

type CellKey = (String, TopicId);

struct UsableLog {
    cell: CellKey,
    item_id: ItemId,
    category: u32,
}

/// Refits the bank against `logs` and returns a new bank. The input bank is
/// never mutated.
pub fn refit(
    bank: &ItemBank,
    logs: &[ResponseLogEntry],
    ability: &AbilityConfig,
    config: &CalibrationConfig,
) -> ItemBank {
    let grid = theta_grid(ability);

    // Working parameters, re-centered so thresholds average zero. The mean
    // moves into the difficulty, which leaves every category probability
    // unchanged.
    let mut params: BTreeMap<ItemId, (f64, Vec<f64>)> = BTreeMap::new();
    for item in bank.items() {
        let mean = if item.category_thresholds.is_empty() {
            0.0
        } else {
            item.category_thresholds.iter().sum::<f64>() / item.category_thresholds.len() as f64
        };
        let thresholds: Vec<f64> = item.category_thresholds.iter().map(|t| t - mean).collect();
        params.insert(item.item_id.clone(), (item.difficulty + mean, thresholds));
    }

    let usable: Vec<UsableLog> = logs
        .iter()
        .filter_map(|entry| {
            let item = match bank.get(&entry.item_id) {
                Some(item) => item,
                None => {
                    warn!(item_id = %entry.item_id, "log entry references unknown item, skipping");
                    return None;
                }
            };
            if entry.category > item.max_category() {
                warn!(
                    item_id = %entry.item_id,
                    category = entry.category,
                    "log entry category out of range, skipping"
                );
                return None;
            }
            Some(UsableLog {
                cell: (entry.learner_id.clone(), item.topic_id.clone()),
                item_id: entry.item_id.clone(),
                category: entry.category,
            })
        })
        .collect();

    let mut cells: BTreeMap<CellKey, Vec<usize>> = BTreeMap::new();
    let mut item_logs: BTreeMap<ItemId, Vec<usize>> = BTreeMap::new();
    for (idx, log) in usable.iter().enumerate() {
        cells.entry(log.cell.clone()).or_default().push(idx);
        item_logs.entry(log.item_id.clone()).or_default().push(idx);
    }

    let refit_items: Vec<ItemId> = item_logs
        .iter()
        .filter(|(_, idxs)| idxs.len() >= config.min_responses)
        .map(|(id, _)| id.clone())
        .collect();

    if !refit_items.is_empty() {
        for iteration in 0..config.max_iterations {
            // E-step: ability posterior per (learner, topic) cell under the
            // current parameters, standard-normal prior.
            let posteriors: BTreeMap<CellKey, Vec<f64>> = cells
                .par_iter()
                .map(|(key, idxs)| (key.clone(), cell_posterior(&grid, idxs, &usable, &params)))
                .collect();

            // M-step: damped Newton step on each item's difficulty.
            let updates: BTreeMap<ItemId, f64> = refit_items
                .par_iter()
                .map(|item_id| {
                    let (difficulty, thresholds) = &params[item_id];
                    let step = newton_step(
                        &grid,
                        &item_logs[item_id],
                        &usable,
                        &posteriors,
                        *difficulty,
                        thresholds,
                    )
                    .clamp(-config.max_step, config.max_step);
                    (item_id.clone(), step)
                })
                .collect();

            let mut largest = 0.0_f64;
            for (item_id, step) in &updates {
                if let Some((difficulty, _)) = params.get_mut(item_id) {
                    *difficulty += step;
                }
                largest = largest.max(step.abs());
            }
            if largest < config.tolerance {
                debug!(iteration, largest, "refit converged");
                break;
            }
        }
    }

    // Assemble the new bank. Refit items get the shrunk difficulty and the
    // centered thresholds; sparse items keep their stored parameters.
    let items = bank
        .items()
        .map(|item| {
            let mut out = item.clone();
            let n = item_logs.get(&item.item_id).map(|v| v.len()).unwrap_or(0);
            out.calibration_count += n as u32;
            if n >= config.min_responses {
                let (fitted, thresholds) = &params[&item.item_id];
                let prior_weight =
                    config.shrinkage_responses / (n as f64 + config.shrinkage_responses);
                let centered_mean = item.difficulty
                    + if item.category_thresholds.is_empty() {
                        0.0
                    } else {
                        item.category_thresholds.iter().sum::<f64>()
                            / item.category_thresholds.len() as f64
                    };
                out.difficulty =
                    prior_weight * centered_mean + (1.0 - prior_weight) * fitted;
                out.category_thresholds = thresholds.clone();
            }
            out
        })
        .collect::<Vec<_>>();

    ItemBank::new(items)
}

/// Normalized posterior weights over the grid for one cell's responses.
/// Degenerate cells fall back to a uniform posterior so one bad row cannot
/// poison the whole fit.
fn cell_posterior(
    grid: &[f64],
    idxs: &[usize],
    usable: &[UsableLog],
    params: &BTreeMap<ItemId, (f64, Vec<f64>)>,
) -> Vec<f64> {
    let mut log_weights = Vec::with_capacity(grid.len());
    for &theta in grid {
        let mut lw = -0.5 * theta * theta;
        for &idx in idxs {
            let log = &usable[idx];
            let (difficulty, thresholds) = &params[&log.item_id];
            let like = gpcm::category_likelihood(log.category, theta, *difficulty, thresholds);
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
        warn!("degenerate likelihood in refit cell, using uniform posterior");
        return vec![1.0 / grid.len() as f64; grid.len()];
    }
    let weights: Vec<f64> = log_weights.iter().map(|lw| (lw - max_lw).exp()).collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Newton step for one item's difficulty: residual of expected versus
/// observed categories over the posterior, divided by the expected
/// information.
fn newton_step(
    grid: &[f64],
    idxs: &[usize],
    usable: &[UsableLog],
    posteriors: &BTreeMap<CellKey, Vec<f64>>,
    difficulty: f64,
    thresholds: &[f64],
) -> f64 {
    let stats: Vec<(f64, f64)> = grid
        .iter()
        .map(|&theta| {
            (
                gpcm::expected_category(theta, difficulty, thresholds),
                gpcm::fisher_information(theta, difficulty, thresholds),
            )
        })
        .collect();

    let mut residual = 0.0;
    let mut information = 0.0;
    for &idx in idxs {
        let log = &usable[idx];
        let weights = match posteriors.get(&log.cell) {
            Some(weights) => weights,
            None => continue,
        };
        let mut expected = 0.0;
        let mut variance = 0.0;
        for (g, &w) in weights.iter().enumerate() {
            expected += w * stats[g].0;
            variance += w * stats[g].1;
        }
        residual += expected - log.category as f64;
        information += variance;
    }

    if information <= 1e-12 {
        return 0.0;
    }
    residual / information
}
