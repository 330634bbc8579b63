//! Retention lane: handoff of mastered material, due-queue construction,
//! review handling and the lapse path back into training.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RetentionConfig;
use crate::error::{EngineError, EngineResult};
use crate::retention::fsrs::{self, FsrsParams, ReviewRating};
use crate::types::{
    ItemBank, ItemId, LearnerState, ResponseRecord, RetentionCard, TopicAbilityState, TopicId,
};

const DAY_MS: i64 = 86_400_000;

/// One due card, scored for ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub item_id: ItemId,
    pub topic_id: TopicId,
    /// `-recallProbability * boost`; lower sorts earlier within a tier.
    pub priority: f64,
    pub days_overdue: f64,
    pub recall_probability: f64,
    pub estimated_minutes: f64,
}

/// Ordered review queue for one session, cut to the retention time budget.
#[derive(Debug, Clone, Default)]
pub struct RetentionQueue {
    pub entries: Vec<QueueEntry>,
    pub budget_minutes: f64,
    pub budget_raised: bool,
}

impl RetentionQueue {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn front(&self) -> Option<&QueueEntry> {
        self.entries.first()
    }
}

/// Result of a training-to-retention handoff.
#[derive(Debug, Clone)]
pub struct HandoffOutcome {
    pub card: RetentionCard,
    /// True when a lapsed card was brought back instead of a new one created.
    pub reactivated: bool,
}

/// Result of one retention-lane review.
#[derive(Debug, Clone)]
pub struct RetentionReview {
    pub card: RetentionCard,
    pub rating: ReviewRating,
    pub lapsed: bool,
    pub next_due: i64,
}

pub struct RetentionPolicy {
    config: RetentionConfig,
    params: FsrsParams,
}

impl RetentionPolicy {
    pub fn new(config: RetentionConfig) -> Self {
        Self {
            config,
            params: FsrsParams::default(),
        }
    }

    /// Whether a topic's probe evidence supports a handoff: enough probes
    /// on record, the latest one successful, and SE non-increasing across
    /// the recent window. The mastery stop waits on this, so a stopped
    /// topic can always write its card.
    pub fn handoff_ready(&self, state: &TopicAbilityState) -> bool {
        match &state.last_probe {
            Some(probe) => {
                probe.succeeded
                    && state.probe_count >= self.config.handoff_min_probes
                    && self.se_non_increasing(&state.responses)
            }
            None => false,
        }
    }

    /// Moves a topic from training to retention once [`Self::handoff_ready`]
    /// holds for it. Returns `None` when the handoff must wait or has
    /// already happened.
    ///
    /// A topic owns at most one card, anchored to the confirming probe item.
    /// A lapsed card is reactivated in place rather than replaced.
    pub fn try_handoff(
        &self,
        learner: &mut LearnerState,
        topic_id: &str,
        now_ms: i64,
    ) -> Option<HandoffOutcome> {
        let state = learner.ability(topic_id)?;
        if !self.handoff_ready(state) {
            debug!(topic_id, "handoff deferred, evidence incomplete");
            return None;
        }
        let probe = state.last_probe.clone()?;

        let rating = ReviewRating::from_review(true, probe.latency_ms);
        let existing = learner
            .retention
            .values()
            .find(|card| card.topic_id == topic_id)
            .map(|card| (card.item_id.clone(), card.suspended));

        let outcome = match existing {
            Some((_, false)) => return None,
            Some((anchor_id, true)) => {
                let card = learner
                    .retention
                    .get_mut(&anchor_id)
                    .map(|card| {
                        let elapsed =
                            (now_ms - card.last_reviewed_at).max(0) as f64 / DAY_MS as f64;
                        let review = fsrs::review(
                            card.stability,
                            card.difficulty_fsrs,
                            elapsed,
                            rating,
                            self.config.desired_retention,
                            &self.params,
                        );
                        card.stability = review.stability;
                        card.difficulty_fsrs = review.difficulty;
                        card.reps += 1;
                        card.last_reviewed_at = now_ms;
                        card.due_at = now_ms + (review.interval_days * DAY_MS as f64) as i64;
                        card.suspended = false;
                        card.clone()
                    })?;
                learner.frozen_items.insert(card.item_id.clone());
                learner.mastered_topics.insert(topic_id.to_string());
                HandoffOutcome {
                    card,
                    reactivated: true,
                }
            }
            None => {
                let seeded =
                    fsrs::first_review(rating, self.config.desired_retention, &self.params);
                let card = RetentionCard {
                    item_id: probe.item_id.clone(),
                    topic_id: topic_id.to_string(),
                    stability: seeded.stability,
                    difficulty_fsrs: seeded.difficulty,
                    due_at: now_ms + (seeded.interval_days * DAY_MS as f64) as i64,
                    last_reviewed_at: now_ms,
                    lapse_count: 0,
                    reps: 1,
                    suspended: false,
                };
                learner
                    .retention
                    .insert(probe.item_id.clone(), card.clone());
                learner.frozen_items.insert(probe.item_id.clone());
                learner.mastered_topics.insert(topic_id.to_string());
                HandoffOutcome {
                    card,
                    reactivated: false,
                }
            }
        };
        Some(outcome)
    }

    fn se_non_increasing(&self, responses: &[ResponseRecord]) -> bool {
        let window = self.config.handoff_se_window;
        if responses.len() < window {
            return false;
        }
        let tail = &responses[responses.len() - window..];
        tail.windows(2).all(|pair| pair[0].se_after >= pair[1].se_after)
    }

    /// Builds the session review queue from due cards: two tiers (cards more
    /// than three days overdue jump ahead), ascending priority within a tier,
    /// cut to the retention share of the session's minutes.
    pub fn build_queue(
        &self,
        learner: &LearnerState,
        bank: &ItemBank,
        session_minutes: f64,
        now_ms: i64,
    ) -> RetentionQueue {
        let mut scored: Vec<(u8, QueueEntry)> = Vec::new();
        let mut any_far_overdue = false;

        for card in learner.retention.values() {
            if card.suspended || card.due_at > now_ms {
                continue;
            }
            let item = match bank.get(&card.item_id) {
                Some(item) => item,
                None => {
                    warn!(item_id = %card.item_id, "retention card references unknown item, skipping");
                    continue;
                }
            };
            let days_overdue = (now_ms - card.due_at).max(0) as f64 / DAY_MS as f64;
            let elapsed_days = (now_ms - card.last_reviewed_at).max(0) as f64 / DAY_MS as f64;
            let recall = fsrs::retrievability(card.stability, elapsed_days);
            let boost = 1.0 + self.config.boost_per_overdue_day * days_overdue.max(0.0);
            let tier = if days_overdue > self.config.jump_ahead_overdue_days {
                0
            } else {
                1
            };
            if days_overdue > self.config.raise_budget_overdue_days {
                any_far_overdue = true;
            }
            scored.push((
                tier,
                QueueEntry {
                    item_id: card.item_id.clone(),
                    topic_id: card.topic_id.clone(),
                    priority: -recall * boost,
                    days_overdue,
                    recall_probability: recall,
                    estimated_minutes: item.median_time_sec / 60.0,
                },
            ));
        }

        scored.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| {
                    a.1.priority
                        .partial_cmp(&b.1.priority)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.1.item_id.cmp(&b.1.item_id))
        });

        let share = if any_far_overdue {
            self.config.raised_budget_share
        } else {
            self.config.default_budget_share
        };
        let budget_minutes = share * session_minutes;

        let mut entries = Vec::new();
        let mut spent = 0.0;
        for (_, entry) in scored {
            if spent + entry.estimated_minutes > budget_minutes {
                break;
            }
            spent += entry.estimated_minutes;
            entries.push(entry);
        }

        RetentionQueue {
            entries,
            budget_minutes,
            budget_raised: any_far_overdue,
        }
    }

    /// Applies one retention review. A wrong answer is a lapse: the card is
    /// suspended and its item and topic return to the training pool.
    pub fn on_review_result(
        &self,
        learner: &mut LearnerState,
        item_id: &str,
        correct: bool,
        latency_ms: i64,
        now_ms: i64,
    ) -> EngineResult<RetentionReview> {
        let rating = ReviewRating::from_review(correct, latency_ms);
        let card = learner
            .retention
            .get_mut(item_id)
            .ok_or_else(|| EngineError::MissingItemMetadata {
                item_id: item_id.to_string(),
            })?;

        let elapsed_days = (now_ms - card.last_reviewed_at).max(0) as f64 / DAY_MS as f64;
        let outcome = fsrs::review(
            card.stability,
            card.difficulty_fsrs,
            elapsed_days,
            rating,
            self.config.desired_retention,
            &self.params,
        );
        card.stability = outcome.stability;
        card.difficulty_fsrs = outcome.difficulty;
        card.reps += 1;
        card.last_reviewed_at = now_ms;
        card.due_at = now_ms + (outcome.interval_days * DAY_MS as f64) as i64;
        if outcome.lapsed {
            card.lapse_count += 1;
            card.suspended = true;
        }
        let snapshot = card.clone();

        if outcome.lapsed {
            learner.frozen_items.remove(item_id);
            learner.mastered_topics.remove(&snapshot.topic_id);
            debug!(
                item_id,
                topic_id = %snapshot.topic_id,
                lapses = snapshot.lapse_count,
                "retention lapse, item returned to training"
            );
        }

        Ok(RetentionReview {
            next_due: snapshot.due_at,
            lapsed: outcome.lapsed,
            rating,
            card: snapshot,
        })
    }
}
