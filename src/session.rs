//! Per-session working state.
//!
//! A [`Session`] owns everything that must not leak across sittings: the
//! seeded RNG, the content-mix tracker, the Thompson arms and the pending
//! presentation awaiting a response. Persisting learner progress is the
//! caller's job; sessions are built fresh by
//! [`StudyEngine::begin_session`](crate::engine::StudyEngine::begin_session)
//! and dropped when they complete.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::engine::Presentation;
use crate::rng::SessionRng;
use crate::scheduling::SchedulerArm;
use crate::selection::ShareTracker;
use crate::types::TopicId;

/// Which loop produced a presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Training,
    Retention,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Training => "training",
            Lane::Retention => "retention",
        }
    }
}

/// Why a session stopped issuing work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// The fatigue index crossed its stop threshold.
    Fatigue,
    /// Every remaining topic is mastered or out of items.
    Exhausted,
    /// No topic is eligible and every live share sits inside the
    /// blueprint tolerance; the sitting has done its job.
    BlueprintSatisfied,
}

impl SessionEndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEndReason::Fatigue => "fatigue",
            SessionEndReason::Exhausted => "exhausted",
            SessionEndReason::BlueprintSatisfied => "blueprint_satisfied",
        }
    }
}

/// One contiguous run of training items on a single topic. Closing the
/// visit turns the observed SE drop into a scheduler arm observation.
#[derive(Debug, Clone)]
pub struct TopicVisit {
    pub topic_id: TopicId,
    pub started_at: i64,
    pub se_at_entry: f64,
    /// Thompson draw that won the topic its slot, in SE per minute.
    pub expected_gain: f64,
    pub urgency: f64,
}

/// Working state for one sitting. Not serialized: the RNG stream and the
/// half-open topic visit are only meaningful while the sitting runs.
pub struct Session {
    pub session_id: String,
    pub seed: u64,
    pub started_at: i64,
    pub rng: SessionRng,
    pub tracker: ShareTracker,
    pub arms: BTreeMap<TopicId, SchedulerArm>,
    /// Topic of the most recent presentation, either lane.
    pub current_topic: Option<TopicId>,
    pub visit: Option<TopicVisit>,
    /// Presentation issued but not yet answered.
    pub pending: Option<Presentation>,
    pub topics_mastered: u32,
    pub retention_minutes_spent: f64,
    /// Topics that ran out of selectable items this sitting.
    pub exhausted_topics: BTreeSet<TopicId>,
    /// Realized SE drop per minute of the last closed visit, consumed by
    /// the next topic-transition event.
    pub last_visit_gain: Option<f64>,
    pub completed: Option<SessionEndReason>,
}

impl Session {
    pub(crate) fn new(seed: u64, now_ms: i64) -> Self {
        Self {
            session_id: format!("s{seed:016x}"),
            seed,
            started_at: now_ms,
            rng: SessionRng::seed_from(seed),
            tracker: ShareTracker::default(),
            arms: BTreeMap::new(),
            current_topic: None,
            visit: None,
            pending: None,
            topics_mastered: 0,
            retention_minutes_spent: 0.0,
            exhausted_topics: BTreeSet::new(),
            last_visit_gain: None,
            completed: None,
        }
    }

    pub fn elapsed_min(&self, now_ms: i64) -> f64 {
        ((now_ms - self.started_at) as f64 / 60_000.0).max(0.0)
    }

    pub fn is_complete(&self) -> bool {
        self.completed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_derived_from_seed() {
        let session = Session::new(0xBEEF, 0);
        assert_eq!(session.session_id, "s000000000000beef");
    }

    #[test]
    fn elapsed_minutes_never_negative() {
        let session = Session::new(1, 60_000);
        assert_eq!(session.elapsed_min(0), 0.0);
        assert!((session.elapsed_min(60_000 + 90_000) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn lane_and_end_reason_labels() {
        assert_eq!(Lane::Retention.as_str(), "retention");
        assert_eq!(SessionEndReason::Fatigue.as_str(), "fatigue");
        assert_eq!(
            SessionEndReason::BlueprintSatisfied.as_str(),
            "blueprint_satisfied"
        );
    }
}
