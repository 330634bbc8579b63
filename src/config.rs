use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityConfig {
    pub quadrature_points: usize,
    pub theta_min: f64,
    pub theta_max: f64,
    pub prior_sd: f64,
    pub tightened_prior_sd: f64,
    pub tighten_after_responses: u32,
    pub cold_start_responses: u32,
    pub item_calibration_floor: u32,
    pub blend_elo_weight: f64,
}

impl Default for AbilityConfig {
    fn default() -> Self {
        Self {
            quadrature_points: 41,
            theta_min: -4.0,
            theta_max: 4.0,
            prior_sd: 0.8,
            tightened_prior_sd: 0.6,
            tighten_after_responses: 20,
            cold_start_responses: 3,
            item_calibration_floor: 10,
            blend_elo_weight: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub randomesque_size: usize,
    pub fatigue_after_minutes: f64,
    pub fatigue_scalar: f64,
    pub max_median_time_sec: f64,
    pub probe_window: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            randomesque_size: 5,
            fatigue_after_minutes: 45.0,
            fatigue_scalar: 0.8,
            max_median_time_sec: 360.0,
            probe_window: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureConfig {
    pub daily_cap: usize,
    pub weekly_cap: usize,
    pub cooldown_hours: i64,
    pub clean_days_for_full: i64,
    pub window_days: i64,
    pub post_cooldown_multiplier: f64,
    pub overfamiliar_mean: f64,
    pub overfamiliar_se: f64,
    pub overfamiliar_multiplier: f64,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            daily_cap: 1,
            weekly_cap: 2,
            cooldown_hours: 96,
            clean_days_for_full: 7,
            window_days: 14,
            post_cooldown_multiplier: 0.5,
            overfamiliar_mean: 0.9,
            overfamiliar_se: 0.15,
            overfamiliar_multiplier: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintConfig {
    pub drift_tolerance: f64,
    pub deprioritize_floor: f64,
    pub boost_ceiling: f64,
    pub min_items_for_window: u32,
}

impl Default for BlueprintConfig {
    fn default() -> Self {
        Self {
            drift_tolerance: 0.05,
            deprioritize_floor: 0.2,
            boost_ceiling: 1.5,
            min_items_for_window: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub default_arm_mean: f64,
    pub default_arm_variance: f64,
    pub observation_noise_sd: f64,
    pub urgency_grace_days: f64,
    pub urgency_divisor_days: f64,
    pub topic_cooldown_hours: i64,
    pub deficit_override: f64,
    pub tie_epsilon: f64,
    pub stop_se: f64,
    pub stop_min_attempts: u32,
    pub plateau_window: usize,
    pub plateau_delta_se: f64,
    pub mastery_threshold: f64,
    pub session_fatigue_stop: f64,
    pub session_minutes_cap: f64,
    pub session_mastered_cap: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_arm_mean: 0.05,
            default_arm_variance: 0.01,
            observation_noise_sd: 0.05,
            urgency_grace_days: 3.0,
            urgency_divisor_days: 7.0,
            topic_cooldown_hours: 96,
            deficit_override: 0.08,
            tie_epsilon: 0.01,
            stop_se: 0.20,
            stop_min_attempts: 12,
            plateau_window: 5,
            plateau_delta_se: 0.02,
            mastery_threshold: 0.85,
            session_fatigue_stop: 0.6,
            session_minutes_cap: 70.0,
            session_mastered_cap: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub desired_retention: f64,
    pub default_budget_share: f64,
    pub raised_budget_share: f64,
    pub jump_ahead_overdue_days: f64,
    pub raise_budget_overdue_days: f64,
    pub boost_per_overdue_day: f64,
    pub handoff_min_probes: u32,
    pub handoff_se_window: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            desired_retention: 0.9,
            default_budget_share: 0.4,
            raised_budget_share: 0.6,
            jump_ahead_overdue_days: 3.0,
            raise_budget_overdue_days: 7.0,
            boost_per_overdue_day: 0.1,
            handoff_min_probes: 3,
            handoff_se_window: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub buffer_capacity: usize,
    pub retry_limit: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
            retry_limit: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub shrinkage_responses: f64,
    pub min_responses: usize,
    pub max_step: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            tolerance: 1e-3,
            shrinkage_responses: 25.0,
            min_responses: 10,
            max_step: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub ability: AbilityConfig,
    pub selection: SelectionConfig,
    pub exposure: ExposureConfig,
    pub blueprint: BlueprintConfig,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionConfig,
    pub telemetry: TelemetryConfig,
    pub calibration: CalibrationConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TUTOR_MASTERY_THRESHOLD") {
            config.scheduler.mastery_threshold =
                val.parse().unwrap_or(config.scheduler.mastery_threshold);
        }
        if let Ok(val) = std::env::var("TUTOR_STOP_SE") {
            config.scheduler.stop_se = val.parse().unwrap_or(config.scheduler.stop_se);
        }
        if let Ok(val) = std::env::var("TUTOR_SESSION_MINUTES_CAP") {
            config.scheduler.session_minutes_cap =
                val.parse().unwrap_or(config.scheduler.session_minutes_cap);
        }
        if let Ok(val) = std::env::var("TUTOR_DESIRED_RETENTION") {
            config.retention.desired_retention =
                val.parse().unwrap_or(config.retention.desired_retention);
        }
        if let Ok(val) = std::env::var("TUTOR_TELEMETRY_BUFFER") {
            config.telemetry.buffer_capacity =
                val.parse().unwrap_or(config.telemetry.buffer_capacity);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.ability.quadrature_points, 41);
        assert!(config.ability.theta_min < config.ability.theta_max);
        assert!(config.scheduler.stop_se > 0.0);
        assert!(config.retention.default_budget_share < config.retention.raised_budget_share);
        assert!(config.blueprint.deprioritize_floor < config.blueprint.boost_ceiling);
    }

    #[test]
    fn test_roundtrip_serialization() {
        let config = EngineConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        let restored: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(
            restored.scheduler.stop_min_attempts,
            config.scheduler.stop_min_attempts
        );
        assert!((restored.ability.prior_sd - config.ability.prior_sd).abs() < 1e-12);
    }
}
