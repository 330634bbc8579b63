//! Blueprint policy: keeps the live content mix near the target shares.
//!
//! Targets are resolved once per engine against the item bank: configured
//! shares are kept and the remaining mass is split equally over the
//! unconfigured siblings. A grouping with no configured entries at all is
//! unconstrained, except for topics, which always need a target because
//! the scheduler scores against it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::BlueprintConfig;
use crate::error::EngineError;
use crate::types::{Blueprint, ItemBank, SystemId, TopicId};

/// Items presented per topic/system this session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareTracker {
    topic_counts: BTreeMap<TopicId, u32>,
    system_counts: BTreeMap<SystemId, u32>,
    total: u32,
}

impl ShareTracker {
    pub fn record(&mut self, topic_id: &str, system_id: &str) {
        *self.topic_counts.entry(topic_id.to_string()).or_default() += 1;
        *self.system_counts.entry(system_id.to_string()).or_default() += 1;
        self.total += 1;
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn topic_share(&self, topic_id: &str) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.topic_counts.get(topic_id).copied().unwrap_or(0) as f64 / self.total as f64
    }

    pub fn system_share(&self, system_id: &str) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.system_counts.get(system_id).copied().unwrap_or(0) as f64 / self.total as f64
    }

    /// Share the topic would hold after one more presentation.
    fn topic_share_after(&self, topic_id: &str) -> f64 {
        let count = self.topic_counts.get(topic_id).copied().unwrap_or(0) + 1;
        count as f64 / (self.total + 1) as f64
    }

    fn system_share_after(&self, system_id: &str) -> f64 {
        let count = self.system_counts.get(system_id).copied().unwrap_or(0) + 1;
        count as f64 / (self.total + 1) as f64
    }
}

pub struct BlueprintPolicy {
    config: BlueprintConfig,
    topic_targets: BTreeMap<TopicId, f64>,
    system_targets: BTreeMap<SystemId, f64>,
}

impl BlueprintPolicy {
    pub fn new(
        blueprint: &Blueprint,
        bank: &ItemBank,
        config: BlueprintConfig,
    ) -> Result<Self, EngineError> {
        blueprint.validate()?;
        let topic_targets =
            resolve_targets("topic", &blueprint.topic_targets, &bank.topic_ids(), true)?;
        let system_targets =
            resolve_targets("system", &blueprint.system_targets, &bank.system_ids(), false)?;
        Ok(Self {
            config,
            topic_targets,
            system_targets,
        })
    }

    pub fn topic_target(&self, topic_id: &str) -> f64 {
        self.topic_targets.get(topic_id).copied().unwrap_or(0.0)
    }

    /// target - live, floored at zero.
    pub fn topic_deficit(&self, topic_id: &str, tracker: &ShareTracker) -> f64 {
        (self.topic_target(topic_id) - tracker.topic_share(topic_id)).max(0.0)
    }

    /// Gap shown in the explanation tuple; negative when overrepresented.
    pub fn topic_gap(&self, topic_id: &str, tracker: &ShareTracker) -> f64 {
        self.topic_target(topic_id) - tracker.topic_share(topic_id)
    }

    pub fn topic_multiplier(&self, topic_id: &str, tracker: &ShareTracker) -> f64 {
        self.drift_multiplier(tracker.topic_share(topic_id) - self.topic_target(topic_id))
    }

    pub fn system_multiplier(&self, system_id: &str, tracker: &ShareTracker) -> f64 {
        match self.system_targets.get(system_id) {
            Some(target) => self.drift_multiplier(tracker.system_share(system_id) - target),
            None => 1.0,
        }
    }

    fn drift_multiplier(&self, drift: f64) -> f64 {
        let tolerance = self.config.drift_tolerance;
        if drift > tolerance {
            (1.0 - drift * 2.0).max(self.config.deprioritize_floor)
        } else if drift < -tolerance {
            (1.0 + drift.abs() * 3.0).min(self.config.boost_ceiling)
        } else {
            1.0
        }
    }

    /// Whether presenting one more item for this topic/system keeps both
    /// live shares inside target + tolerance. The check is waived for the
    /// first few items of a session, where single presentations swing the
    /// ratio wildly.
    pub fn within_window(&self, topic_id: &str, system_id: &str, tracker: &ShareTracker) -> bool {
        if tracker.total() < self.config.min_items_for_window {
            return true;
        }
        let tolerance = self.config.drift_tolerance;
        if tracker.topic_share_after(topic_id) > self.topic_target(topic_id) + tolerance {
            return false;
        }
        if let Some(target) = self.system_targets.get(system_id) {
            if tracker.system_share_after(system_id) > target + tolerance {
                return false;
            }
        }
        true
    }

    /// All topic shares within tolerance of target, used by the session
    /// stop check.
    pub fn satisfied(&self, tracker: &ShareTracker) -> bool {
        self.topic_targets.iter().all(|(topic_id, target)| {
            (tracker.topic_share(topic_id) - target).abs() <= self.config.drift_tolerance
        })
    }
}

fn resolve_targets(
    level: &str,
    configured: &BTreeMap<String, f64>,
    universe: &BTreeSet<String>,
    required: bool,
) -> Result<BTreeMap<String, f64>, EngineError> {
    if configured.is_empty() && !required {
        return Ok(BTreeMap::new());
    }

    for key in configured.keys() {
        if !universe.contains(key) {
            return Err(EngineError::InvalidBlueprint {
                reason: format!("{level} target {key} does not exist in the item bank"),
            });
        }
    }

    let configured_sum: f64 = configured.values().sum();
    let unconfigured: Vec<&String> = universe
        .iter()
        .filter(|key| !configured.contains_key(*key))
        .collect();

    let mut targets = configured.clone();
    if unconfigured.is_empty() {
        if (configured_sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::InvalidBlueprint {
                reason: format!("{level} shares sum to {configured_sum:.4}, expected 1"),
            });
        }
    } else {
        let remainder = 1.0 - configured_sum;
        if remainder <= 1e-6 {
            return Err(EngineError::InvalidBlueprint {
                reason: format!("{level} shares leave no mass for unconfigured entries"),
            });
        }
        let each = remainder / unconfigured.len() as f64;
        for key in unconfigured {
            targets.insert(key.clone(), each);
        }
    }
    Ok(targets)
}
