//! Stop rules: when to leave a topic and when to end the session.

use crate::config::SchedulerConfig;
use crate::types::TopicAbilityState;

/// Why practice on a topic ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicStopReason {
    /// SE at or under target with enough attempts behind it.
    Converged,
    /// The last few responses stopped moving the SE.
    Plateau,
    /// Mastery probability cleared the bar with a fresh successful probe.
    Mastered,
}

impl TopicStopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicStopReason::Converged => "converged",
            TopicStopReason::Plateau => "plateau",
            TopicStopReason::Mastered => "mastered",
        }
    }
}

pub struct StopPolicy {
    config: SchedulerConfig,
}

impl StopPolicy {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Checks the topic-level stop rules. Mastery outranks the rest and only
    /// fires once the handoff evidence is complete, so the stop and the
    /// retention card land together; until then the topic keeps serving.
    pub fn topic_stop(
        &self,
        state: &TopicAbilityState,
        mastery_probability: f64,
        session_started_ms: i64,
        handoff_ready: bool,
    ) -> Option<TopicStopReason> {
        if handoff_ready && self.mastered(state, mastery_probability, session_started_ms) {
            return Some(TopicStopReason::Mastered);
        }
        if state.se <= self.config.stop_se && state.response_count >= self.config.stop_min_attempts
        {
            return Some(TopicStopReason::Converged);
        }
        if self.plateaued(state) {
            return Some(TopicStopReason::Plateau);
        }
        None
    }

    fn mastered(
        &self,
        state: &TopicAbilityState,
        mastery_probability: f64,
        session_started_ms: i64,
    ) -> bool {
        if mastery_probability < self.config.mastery_threshold {
            return false;
        }
        // The confirming probe must come from this session.
        match &state.last_probe {
            Some(probe) => probe.succeeded && probe.timestamp >= session_started_ms,
            None => false,
        }
    }

    fn plateaued(&self, state: &TopicAbilityState) -> bool {
        let window = self.config.plateau_window;
        let n = state.responses.len();
        if n < window + 1 {
            return false;
        }
        let before = state.responses[n - 1 - window].se_after;
        let after = state.responses[n - 1].se_after;
        before - after < self.config.plateau_delta_se
    }

    /// Combined fatigue index. Reaches the stop threshold exactly when the
    /// elapsed-minutes cap or the mastered-topics cap is hit.
    pub fn session_fatigue_index(&self, elapsed_min: f64, mastered_this_session: u32) -> f64 {
        let time_load = elapsed_min / self.config.session_minutes_cap;
        let mastery_load =
            mastered_this_session as f64 / self.config.session_mastered_cap as f64;
        (self.config.session_fatigue_stop * time_load.max(mastery_load)).min(1.0)
    }

    pub fn session_fatigued(&self, elapsed_min: f64, mastered_this_session: u32) -> bool {
        self.session_fatigue_index(elapsed_min, mastered_this_session)
            >= self.config.session_fatigue_stop
    }
}
