//! Session orchestration: the façade a host application drives.
//!
//! One `next_action` / `submit_response` round trip covers the whole
//! adaptive cycle: retention reviews run ahead of training while their
//! budget lasts, Thompson sampling picks the training topic, the
//! randomesque selector picks the item, the response re-estimates ability,
//! stop rules close the topic and a mastered topic hands off to the
//! retention queue. Every decision draws from the session RNG, so one seed
//! replays one session.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ability::{gpcm, AbilityEstimate, AbilityModel};
use crate::calibration::{self, ResponseLogEntry};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::retention::{QueueEntry, RetentionPolicy};
use crate::scheduling::{StopPolicy, TopicChoice, TopicScheduler, TopicStopReason};
use crate::selection::{BlueprintPolicy, ExposurePolicy, ItemSelector, SelectedItem};
use crate::session::{Lane, Session, SessionEndReason, TopicVisit};
use crate::telemetry::{
    DegenerateUpdatePayload, ItemPresentedPayload, ItemResponsePayload, RetentionEventPayload,
    TelemetryEmitter, TelemetryEvent, TopicTransitionPayload, TransitionReason,
};
use crate::types::{
    Blueprint, ItemBank, ItemId, LearnerState, ProbeRecord, TopicAbilityState, TopicHistory,
    TopicId,
};

/// What the host should do next.
#[derive(Debug, Clone)]
pub enum NextAction {
    PresentItem(Presentation),
    SessionComplete { reason: SessionEndReason },
}

/// An item handed to the host for display, with the reasoning behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    pub item_id: ItemId,
    pub topic_id: TopicId,
    pub lane: Lane,
    /// True when the item lands close enough to the current estimate to
    /// count as a mastery probe.
    pub is_probe: bool,
    pub presented_at: i64,
    pub explain: Explanation,
}

/// Why this item, in terms a review screen can show.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub theta: f64,
    pub se: f64,
    pub mastery_probability: f64,
    /// Signed blueprint drift for the topic; negative when overrepresented.
    pub blueprint_gap: f64,
    pub urgency_multiplier: f64,
    /// Fisher information of the item at the current estimate.
    pub item_info: f64,
    pub selection_reason: String,
}

/// Everything a response changed.
#[derive(Debug, Clone)]
pub struct ResponseOutcome {
    pub lane: Lane,
    pub theta: f64,
    pub se: f64,
    pub mastery_probability: f64,
    pub topic_stopped: Option<TopicStopReason>,
    /// True when a mastery stop also created or reactivated a retention card.
    pub handed_off: bool,
    /// True when a retention review failed and its card went back to training.
    pub lapsed: bool,
    /// True when the posterior underflowed and the previous estimate was kept.
    pub degenerate: bool,
}

/// The adaptive study engine. Owns the item bank and the per-concern
/// policies; all learner progress lives in the caller's [`LearnerState`]
/// and all sitting-scoped state in a [`Session`].
pub struct StudyEngine {
    bank: ItemBank,
    blueprint: BlueprintPolicy,
    config: EngineConfig,
    ability: AbilityModel,
    exposure: ExposurePolicy,
    selector: ItemSelector,
    scheduler: TopicScheduler,
    stopping: StopPolicy,
    retention: RetentionPolicy,
    emitter: TelemetryEmitter,
}

impl StudyEngine {
    pub fn new(
        bank: ItemBank,
        blueprint: &Blueprint,
        config: EngineConfig,
        emitter: TelemetryEmitter,
    ) -> EngineResult<Self> {
        let blueprint = BlueprintPolicy::new(blueprint, &bank, config.blueprint.clone())?;
        Ok(Self {
            ability: AbilityModel::new(config.ability.clone()),
            exposure: ExposurePolicy::new(config.exposure.clone()),
            selector: ItemSelector::new(config.selection.clone()),
            scheduler: TopicScheduler::new(config.scheduler.clone()),
            stopping: StopPolicy::new(config.scheduler.clone()),
            retention: RetentionPolicy::new(config.retention.clone()),
            bank,
            blueprint,
            config,
            emitter,
        })
    }

    pub fn bank(&self) -> &ItemBank {
        &self.bank
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts a sitting. Arms are seeded for every unmastered topic in the
    /// bank; `histories` carries learning-rate aggregates from past sittings.
    pub fn begin_session(
        &self,
        learner: &LearnerState,
        histories: &[TopicHistory],
        seed: u64,
        now_ms: i64,
    ) -> Session {
        let mut session = Session::new(seed, now_ms);
        let topics: BTreeSet<TopicId> = self
            .bank
            .topic_ids()
            .into_iter()
            .filter(|topic| !learner.mastered_topics.contains(topic))
            .collect();
        session.arms = self.scheduler.init_arms(&topics, histories);
        debug!(
            session = %session.session_id,
            topics = session.arms.len(),
            "session started"
        );
        session
    }

    /// Decides what the learner should see next. Re-issues the pending
    /// presentation until [`submit_response`](Self::submit_response) answers
    /// it, so the call is safe to repeat.
    pub fn next_action(
        &self,
        learner: &mut LearnerState,
        session: &mut Session,
        now_ms: i64,
    ) -> EngineResult<NextAction> {
        if let Some(reason) = session.completed {
            return Ok(NextAction::SessionComplete { reason });
        }
        if let Some(pending) = &session.pending {
            return Ok(NextAction::PresentItem(pending.clone()));
        }
        if self
            .stopping
            .session_fatigued(session.elapsed_min(now_ms), session.topics_mastered)
        {
            return Ok(self.complete_session(learner, session, SessionEndReason::Fatigue, now_ms));
        }

        // Retention first while its share of the sitting is unspent.
        let queue = self.retention.build_queue(
            learner,
            &self.bank,
            self.config.scheduler.session_minutes_cap,
            now_ms,
        );
        if session.retention_minutes_spent < queue.budget_minutes {
            if let Some(entry) = queue.front() {
                let entry = entry.clone();
                return self.present_retention(learner, session, entry, now_ms);
            }
        }

        loop {
            let (topic_id, choice) = match &session.visit {
                Some(visit) => (visit.topic_id.clone(), None),
                None => {
                    let candidates: BTreeSet<TopicId> = self
                        .bank
                        .topic_ids()
                        .into_iter()
                        .filter(|topic| !learner.mastered_topics.contains(topic))
                        .filter(|topic| !session.exhausted_topics.contains(topic))
                        .collect();
                    if candidates.is_empty() {
                        return Ok(self.complete_session(
                            learner,
                            session,
                            SessionEndReason::Exhausted,
                            now_ms,
                        ));
                    }
                    match self.scheduler.choose_next_topic(
                        &session.arms,
                        &candidates,
                        learner,
                        &self.blueprint,
                        &session.tracker,
                        &mut session.rng,
                        now_ms,
                    ) {
                        // A fallback pick means nothing is eligible right now.
                        // If the mix is also inside tolerance, the sitting is
                        // done rather than padded with more of the same.
                        Ok(choice)
                            if choice.via_fallback
                                && self.blueprint.satisfied(&session.tracker) =>
                        {
                            return Ok(self.complete_session(
                                learner,
                                session,
                                SessionEndReason::BlueprintSatisfied,
                                now_ms,
                            ));
                        }
                        Ok(choice) => (choice.topic_id.clone(), Some(choice)),
                        Err(EngineError::NoEligibleTopic) => {
                            return Ok(self.complete_session(
                                learner,
                                session,
                                SessionEndReason::Exhausted,
                                now_ms,
                            ));
                        }
                        Err(other) => return Err(other),
                    }
                }
            };

            let estimate = self.topic_estimate(learner, &topic_id);
            let pool = self.bank.topic_items(&topic_id);
            let elapsed = session.elapsed_min(now_ms);
            match self.selector.select_next(
                &topic_id,
                estimate.theta,
                &pool,
                learner,
                &self.exposure,
                &self.blueprint,
                &session.tracker,
                elapsed,
                &mut session.rng,
                now_ms,
            ) {
                Ok(selected) => {
                    return self.present_training(
                        learner, session, topic_id, choice, selected, estimate, now_ms,
                    );
                }
                Err(EngineError::NoEligibleItem { .. }) => {
                    debug!(topic = %topic_id, "no selectable item left this sitting");
                    session.exhausted_topics.insert(topic_id);
                    self.close_visit(learner, session, now_ms);
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Applies a scored response to the pending presentation.
    ///
    /// `score_fraction` is the share of score steps earned, in `[0, 1]`.
    /// Training responses update the topic posterior and run the stop
    /// rules; retention responses reschedule the card and never touch
    /// ability.
    pub fn submit_response(
        &self,
        learner: &mut LearnerState,
        session: &mut Session,
        item_id: &str,
        score_fraction: f64,
        latency_ms: i64,
        now_ms: i64,
    ) -> EngineResult<ResponseOutcome> {
        let pending = match session.pending.take() {
            Some(pending) if pending.item_id == item_id => pending,
            Some(pending) => {
                session.pending = Some(pending);
                return Err(EngineError::UnexpectedResponse {
                    item_id: item_id.to_string(),
                });
            }
            None => {
                return Err(EngineError::UnexpectedResponse {
                    item_id: item_id.to_string(),
                });
            }
        };
        let score = score_fraction.clamp(0.0, 1.0);
        match pending.lane {
            Lane::Training => {
                self.apply_training_response(learner, session, &pending, score, latency_ms, now_ms)
            }
            Lane::Retention => {
                self.apply_retention_response(learner, session, &pending, score, latency_ms, now_ms)
            }
        }
    }

    /// Refits item parameters from a platform response log and swaps in the
    /// new bank. A refit never changes topic or system membership, so open
    /// sessions stay valid.
    pub fn recalibrate(&mut self, log: &[ResponseLogEntry]) {
        self.bank = calibration::refit(
            &self.bank,
            log,
            &self.config.ability,
            &self.config.calibration,
        );
    }

    fn topic_estimate(&self, learner: &LearnerState, topic_id: &str) -> AbilityEstimate {
        match learner.ability(topic_id) {
            Some(state) => self.ability.estimate(state),
            None => self.ability.estimate(&TopicAbilityState::default()),
        }
    }

    fn present_training(
        &self,
        learner: &mut LearnerState,
        session: &mut Session,
        topic_id: TopicId,
        choice: Option<TopicChoice>,
        selected: SelectedItem,
        estimate: AbilityEstimate,
        now_ms: i64,
    ) -> EngineResult<NextAction> {
        let item =
            self.bank
                .get(&selected.item_id)
                .ok_or_else(|| EngineError::MissingItemMetadata {
                    item_id: selected.item_id.clone(),
                })?;

        if let Some(choice) = choice {
            self.emitter
                .emit(TelemetryEvent::TopicTransition(TopicTransitionPayload {
                    session_id: session.session_id.clone(),
                    from_topic: session.current_topic.clone(),
                    to_topic: Some(topic_id.clone()),
                    reason: TransitionReason::Scheduler,
                    expected_delta_se: choice.sampled_gain,
                    actual_delta_se: session.last_visit_gain.take(),
                }));
            session.visit = Some(TopicVisit {
                topic_id: topic_id.clone(),
                started_at: now_ms,
                se_at_entry: estimate.se,
                expected_gain: choice.sampled_gain,
                urgency: choice.urgency,
            });
        }

        self.exposure
            .record_presentation(learner, &selected.item_id, now_ms);
        session.tracker.record(&topic_id, &item.system_id);

        self.emitter
            .emit(TelemetryEvent::ItemPresented(ItemPresentedPayload {
                session_id: session.session_id.clone(),
                item_id: selected.item_id.clone(),
                topic_id: topic_id.clone(),
                system_id: item.system_id.clone(),
                theta_before: estimate.theta,
                se_before: estimate.se,
                blueprint_share: session.tracker.topic_share(&topic_id),
                exposure_count: self
                    .exposure
                    .presentation_count(learner, &selected.item_id, now_ms),
            }));

        let urgency = session
            .visit
            .as_ref()
            .map(|visit| visit.urgency)
            .unwrap_or(1.0);
        let presentation = Presentation {
            item_id: selected.item_id.clone(),
            topic_id: topic_id.clone(),
            lane: Lane::Training,
            is_probe: selected.is_probe,
            presented_at: now_ms,
            explain: Explanation {
                theta: estimate.theta,
                se: estimate.se,
                mastery_probability: estimate.mastery_probability,
                blueprint_gap: self.blueprint.topic_gap(&topic_id, &session.tracker),
                urgency_multiplier: urgency,
                item_info: selected.fisher_info,
                selection_reason: selected.reason.as_str().to_string(),
            },
        };
        session.current_topic = Some(topic_id);
        session.pending = Some(presentation.clone());
        Ok(NextAction::PresentItem(presentation))
    }

    fn present_retention(
        &self,
        learner: &mut LearnerState,
        session: &mut Session,
        entry: QueueEntry,
        now_ms: i64,
    ) -> EngineResult<NextAction> {
        // A review interrupting a topic run ends the run, so visit minutes
        // stay attributable to training.
        self.close_visit(learner, session, now_ms);
        let item = self
            .bank
            .get(&entry.item_id)
            .ok_or_else(|| EngineError::MissingItemMetadata {
                item_id: entry.item_id.clone(),
            })?;

        if session.current_topic.as_deref() != Some(entry.topic_id.as_str()) {
            self.emitter
                .emit(TelemetryEvent::TopicTransition(TopicTransitionPayload {
                    session_id: session.session_id.clone(),
                    from_topic: session.current_topic.clone(),
                    to_topic: Some(entry.topic_id.clone()),
                    reason: TransitionReason::Retention,
                    expected_delta_se: 0.0,
                    actual_delta_se: session.last_visit_gain.take(),
                }));
        }

        let estimate = self.topic_estimate(learner, &entry.topic_id);
        self.exposure
            .record_presentation(learner, &entry.item_id, now_ms);

        self.emitter
            .emit(TelemetryEvent::ItemPresented(ItemPresentedPayload {
                session_id: session.session_id.clone(),
                item_id: entry.item_id.clone(),
                topic_id: entry.topic_id.clone(),
                system_id: item.system_id.clone(),
                theta_before: estimate.theta,
                se_before: estimate.se,
                blueprint_share: session.tracker.topic_share(&entry.topic_id),
                exposure_count: self
                    .exposure
                    .presentation_count(learner, &entry.item_id, now_ms),
            }));

        let presentation = Presentation {
            item_id: entry.item_id.clone(),
            topic_id: entry.topic_id.clone(),
            lane: Lane::Retention,
            is_probe: false,
            presented_at: now_ms,
            explain: Explanation {
                theta: estimate.theta,
                se: estimate.se,
                mastery_probability: estimate.mastery_probability,
                blueprint_gap: self.blueprint.topic_gap(&entry.topic_id, &session.tracker),
                urgency_multiplier: 1.0,
                item_info: gpcm::fisher_information(
                    estimate.theta,
                    item.difficulty,
                    &item.category_thresholds,
                ),
                selection_reason: "retention_due".to_string(),
            },
        };
        session.current_topic = Some(entry.topic_id.clone());
        session.pending = Some(presentation.clone());
        Ok(NextAction::PresentItem(presentation))
    }

    fn apply_training_response(
        &self,
        learner: &mut LearnerState,
        session: &mut Session,
        pending: &Presentation,
        score: f64,
        latency_ms: i64,
        now_ms: i64,
    ) -> EngineResult<ResponseOutcome> {
        let item = self
            .bank
            .get(&pending.item_id)
            .ok_or_else(|| EngineError::MissingItemMetadata {
                item_id: pending.item_id.clone(),
            })?;
        let category = (score * item.max_category() as f64).round() as u32;

        let state = learner.ability_mut(&pending.topic_id);
        let update = self.ability.update(state, item, category, now_ms);
        if pending.is_probe {
            state.probe_count += 1;
            state.last_probe = Some(ProbeRecord {
                item_id: pending.item_id.clone(),
                succeeded: score >= 0.5,
                latency_ms,
                timestamp: now_ms,
            });
        }
        learner
            .item_score_stats
            .entry(pending.item_id.clone())
            .or_default()
            .record(score);

        let estimate = update.estimate;
        if update.degenerate {
            self.emitter
                .emit(TelemetryEvent::DegenerateUpdate(DegenerateUpdatePayload {
                    session_id: session.session_id.clone(),
                    topic_id: pending.topic_id.clone(),
                    item_id: pending.item_id.clone(),
                }));
        }
        self.emitter
            .emit(TelemetryEvent::ItemResponse(ItemResponsePayload {
                session_id: session.session_id.clone(),
                item_id: pending.item_id.clone(),
                score_fraction: score,
                theta_after: estimate.theta,
                se_after: estimate.se,
                mastery_probability: estimate.mastery_probability,
                latency_ms,
            }));

        let stopped = learner.ability(&pending.topic_id).and_then(|state| {
            self.stopping.topic_stop(
                state,
                estimate.mastery_probability,
                session.started_at,
                self.retention.handoff_ready(state),
            )
        });
        let mut handed_off = false;
        if let Some(stop) = stopped {
            learner
                .topic_cooldowns
                .insert(pending.topic_id.clone(), now_ms);
            self.close_visit(learner, session, now_ms);
            if stop == TopicStopReason::Mastered {
                if let Some(outcome) = self.retention.try_handoff(learner, &pending.topic_id, now_ms)
                {
                    session.topics_mastered += 1;
                    handed_off = true;
                    debug!(
                        topic = %pending.topic_id,
                        card = %outcome.card.item_id,
                        reactivated = outcome.reactivated,
                        "topic handed off to retention"
                    );
                }
            }
            debug!(topic = %pending.topic_id, reason = stop.as_str(), "topic stop rule fired");
        }

        Ok(ResponseOutcome {
            lane: Lane::Training,
            theta: estimate.theta,
            se: estimate.se,
            mastery_probability: estimate.mastery_probability,
            topic_stopped: stopped,
            handed_off,
            lapsed: false,
            degenerate: update.degenerate,
        })
    }

    fn apply_retention_response(
        &self,
        learner: &mut LearnerState,
        session: &mut Session,
        pending: &Presentation,
        score: f64,
        latency_ms: i64,
        now_ms: i64,
    ) -> EngineResult<ResponseOutcome> {
        let correct = score >= 0.5;
        let due_at = learner
            .retention
            .get(&pending.item_id)
            .map(|card| card.due_at)
            .unwrap_or(now_ms);
        let review =
            self.retention
                .on_review_result(learner, &pending.item_id, correct, latency_ms, now_ms)?;

        if let Some(item) = self.bank.get(&pending.item_id) {
            session.retention_minutes_spent += item.median_time_sec / 60.0;
        }
        self.emitter
            .emit(TelemetryEvent::RetentionEvent(RetentionEventPayload {
                card_id: pending.item_id.clone(),
                due_at,
                answered_at: now_ms,
                result: if review.lapsed { "lapse" } else { "correct" }.to_string(),
                next_due: review.next_due,
            }));

        let estimate = self.topic_estimate(learner, &pending.topic_id);
        Ok(ResponseOutcome {
            lane: Lane::Retention,
            theta: estimate.theta,
            se: estimate.se,
            mastery_probability: estimate.mastery_probability,
            topic_stopped: None,
            handed_off: false,
            lapsed: review.lapsed,
            degenerate: false,
        })
    }

    /// Turns a finished topic run into a scheduler observation: realized SE
    /// drop per minute, floored at 0.1 min so instant revisits cannot blow
    /// up the rate.
    fn close_visit(&self, learner: &LearnerState, session: &mut Session, now_ms: i64) {
        let visit = match session.visit.take() {
            Some(visit) => visit,
            None => return,
        };
        let se_now = learner
            .ability(&visit.topic_id)
            .map(|state| state.se)
            .unwrap_or(visit.se_at_entry);
        let minutes = ((now_ms - visit.started_at) as f64 / 60_000.0).max(0.1);
        let gain = (visit.se_at_entry - se_now) / minutes;
        if let Some(arm) = session.arms.get_mut(&visit.topic_id) {
            self.scheduler.observe(arm, gain);
        }
        debug!(
            topic = %visit.topic_id,
            expected = visit.expected_gain,
            realized = gain,
            "topic visit closed"
        );
        session.last_visit_gain = Some(gain);
    }

    fn complete_session(
        &self,
        learner: &LearnerState,
        session: &mut Session,
        reason: SessionEndReason,
        now_ms: i64,
    ) -> NextAction {
        let from_topic = session.current_topic.clone();
        self.close_visit(learner, session, now_ms);
        if reason == SessionEndReason::Fatigue {
            self.emitter
                .emit(TelemetryEvent::TopicTransition(TopicTransitionPayload {
                    session_id: session.session_id.clone(),
                    from_topic,
                    to_topic: None,
                    reason: TransitionReason::Fatigue,
                    expected_delta_se: 0.0,
                    actual_delta_se: session.last_visit_gain.take(),
                }));
        }
        session.completed = Some(reason);
        let backlog = self.emitter.flush();
        if backlog > 0 {
            warn!(backlog, "telemetry backlog remains after session end");
        }
        debug!(session = %session.session_id, reason = reason.as_str(), "session complete");
        NextAction::SessionComplete { reason }
    }
}
