use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;
use crate::engine::types::{Grade, Tier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    pub capacity: usize,
    pub analysis_window_ms: i64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            analysis_window_ms: 60_000,
        }
    }
}

/// Weights and thresholds of the rule-based state estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorParams {
    pub processing_time_reference_ms: f64,
    pub fatigue_processing_weight: f64,
    pub fatigue_hesitation_weight: f64,
    pub fatigue_attention_weight: f64,
    pub mouse_move_threshold: u32,
    pub keystroke_threshold: u32,
    pub long_dwell_ms: i64,
    pub quick_submit_ms: i64,
    pub frustration_per_long_dwell: f64,
    pub frustration_per_hint: f64,
    pub frustration_per_error: f64,
    pub confidence_base: f64,
    pub confidence_per_quick_correct: f64,
    pub confidence_per_error: f64,
    pub engagement_per_submit: f64,
    pub engagement_per_explanation: f64,
    pub engagement_per_pause: f64,
    pub engagement_per_fluctuation: f64,
    pub motivation_per_correct: f64,
    pub motivation_per_error: f64,
    pub motivation_per_pause: f64,
    pub speed_reference_ms: f64,
    pub mastery_blend: f64,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            processing_time_reference_ms: 30_000.0,
            fatigue_processing_weight: 0.3,
            fatigue_hesitation_weight: 0.3,
            fatigue_attention_weight: 0.4,
            mouse_move_threshold: 50,
            keystroke_threshold: 100,
            long_dwell_ms: 60_000,
            quick_submit_ms: 15_000,
            frustration_per_long_dwell: 0.2,
            frustration_per_hint: 0.1,
            frustration_per_error: 0.1,
            confidence_base: 0.3,
            confidence_per_quick_correct: 0.3,
            confidence_per_error: 0.1,
            engagement_per_submit: 0.05,
            engagement_per_explanation: 0.05,
            engagement_per_pause: 0.2,
            engagement_per_fluctuation: 0.1,
            motivation_per_correct: 0.1,
            motivation_per_error: 0.1,
            motivation_per_pause: 0.1,
            speed_reference_ms: 60_000.0,
            mastery_blend: 0.5,
        }
    }
}

/// Accuracy trend over graded analysis cycles, measured against wall-clock minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendParams {
    pub window_size: usize,
    pub min_samples: usize,
    /// Per-cycle weight decay, newest cycle weighs 1.0.
    pub recency_decay: f64,
    /// Accuracy change per minute.
    pub up_slope_per_min: f64,
    pub down_slope_per_min: f64,
    pub stuck_variance_threshold: f64,
    /// A flat series at or above this accuracy is not a plateau.
    pub plateau_accuracy: f64,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            window_size: 30,
            min_samples: 5,
            recency_decay: 0.85,
            up_slope_per_min: 0.05,
            down_slope_per_min: -0.05,
            stuck_variance_threshold: 0.001,
            plateau_accuracy: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionParams {
    pub trigger_weight: f64,
    pub signal_weight: f64,
    pub threshold: f64,
    pub max_matches: usize,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self {
            trigger_weight: 0.6,
            signal_weight: 0.4,
            threshold: 0.6,
            max_matches: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionParams {
    pub pattern_confidence: f64,
    pub cognitive_load_confidence: f64,
    pub temporal_confidence: f64,
    pub overload_fatigue_threshold: f64,
    pub probability_threshold: f64,
    pub max_active: usize,
    pub validity_secs: i64,
    pub min_events_for_full_confidence: usize,
    pub sparse_confidence_factor: f64,
    pub history_capacity: usize,
}

impl Default for PredictionParams {
    fn default() -> Self {
        Self {
            pattern_confidence: 0.8,
            cognitive_load_confidence: 0.85,
            temporal_confidence: 0.9,
            overload_fatigue_threshold: 0.8,
            probability_threshold: 0.6,
            max_active: 5,
            validity_secs: 300,
            min_events_for_full_confidence: 3,
            sparse_confidence_factor: 0.5,
            history_capacity: 500,
        }
    }
}

impl PredictionParams {
    pub fn validity_ms(&self) -> i64 {
        self.validity_secs * 1000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTargets {
    pub basic: f64,
    pub standard: f64,
    pub advanced: f64,
    pub elite: f64,
}

impl Default for TierTargets {
    fn default() -> Self {
        Self {
            basic: 0.60,
            standard: 0.65,
            advanced: 0.70,
            elite: 0.70,
        }
    }
}

impl TierTargets {
    pub fn for_tier(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Basic => self.basic,
            Tier::Standard => self.standard,
            Tier::Advanced => self.advanced,
            Tier::Elite => self.elite,
        }
    }
}

/// Per-grade ceiling on the 1-10 scale, tighter than the tier matrix for young grades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeCeilings {
    pub fourth: f64,
    pub fifth: f64,
    pub sixth: f64,
}

impl Default for GradeCeilings {
    fn default() -> Self {
        Self {
            fourth: 8.5,
            fifth: 9.5,
            sixth: 10.0,
        }
    }
}

impl GradeCeilings {
    pub fn for_grade(&self, grade: Grade) -> f64 {
        match grade {
            Grade::Fourth => self.fourth,
            Grade::Fifth => self.fifth,
            Grade::Sixth => self.sixth,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultyParams {
    pub step: f64,
    pub accuracy_band: f64,
    pub slow_time_factor: f64,
    pub min_samples_for_confidence: u32,
    pub persistent_low_cycles: u32,
    pub targets: TierTargets,
    pub ceilings: GradeCeilings,
}

impl Default for DifficultyParams {
    fn default() -> Self {
        Self {
            step: 0.5,
            accuracy_band: 0.15,
            slow_time_factor: 1.5,
            min_samples_for_confidence: 3,
            persistent_low_cycles: 3,
            targets: TierTargets::default(),
            ceilings: GradeCeilings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorParams {
    pub timeout_ms: u64,
    pub window_half_width: f64,
    pub recency_capacity: usize,
}

impl Default for SelectorParams {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            window_half_width: 0.5,
            recency_capacity: 1000,
        }
    }
}

/// Phase budgets in seconds for the per-session intervention state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseBudgets {
    pub preparation_secs: i64,
    pub engagement_secs: i64,
    pub consolidation_secs: i64,
    pub evaluation_secs: i64,
    pub transition_secs: i64,
}

impl Default for PhaseBudgets {
    fn default() -> Self {
        Self {
            preparation_secs: 120,
            engagement_secs: 1_200,
            consolidation_secs: 300,
            evaluation_secs: 240,
            transition_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionParams {
    pub trigger_probability: f64,
    pub warning_probability: f64,
    pub low_confidence_threshold: f64,
    pub just_in_time_secs: f64,
    pub reinforcement_accuracy: f64,
    pub budgets: PhaseBudgets,
}

impl Default for InterventionParams {
    fn default() -> Self {
        Self {
            trigger_probability: 0.7,
            warning_probability: 0.8,
            low_confidence_threshold: 0.6,
            just_in_time_secs: 60.0,
            reinforcement_accuracy: 0.8,
            budgets: PhaseBudgets::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathParams {
    pub step_minutes: f64,
    pub max_steps_per_phase: usize,
    pub remediation_threshold: f64,
    pub acceleration_threshold: f64,
    pub replan_step: f64,
}

impl Default for PathParams {
    fn default() -> Self {
        Self {
            step_minutes: 30.0,
            max_steps_per_phase: 12,
            remediation_threshold: 0.6,
            acceleration_threshold: 0.9,
            replan_step: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub buffer: BufferConfig,
    pub estimator: EstimatorParams,
    pub trend: TrendParams,
    pub recognition: RecognitionParams,
    pub prediction: PredictionParams,
    pub difficulty: DifficultyParams,
    pub selector: SelectorParams,
    pub intervention: InterventionParams,
    pub path: PathParams,
    pub tick_interval_ms: u64,
    pub snapshot_history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            estimator: EstimatorParams::default(),
            trend: TrendParams::default(),
            recognition: RecognitionParams::default(),
            prediction: PredictionParams::default(),
            difficulty: DifficultyParams::default(),
            selector: SelectorParams::default(),
            intervention: InterventionParams::default(),
            path: PathParams::default(),
            tick_interval_ms: 5_000,
            snapshot_history_capacity: 720,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse("ENGINE_BUFFER_CAPACITY") {
            config.buffer.capacity = val;
        }
        if let Some(val) = env_parse("ENGINE_ANALYSIS_WINDOW_MS") {
            config.buffer.analysis_window_ms = val;
        }
        if let Some(val) = env_parse("ENGINE_TICK_INTERVAL_MS") {
            config.tick_interval_ms = val;
        }
        if let Some(val) = env_parse("ENGINE_SELECTOR_TIMEOUT_MS") {
            config.selector.timeout_ms = val;
        }
        if let Some(val) = env_parse("ENGINE_PREDICTION_VALIDITY_SECS") {
            config.prediction.validity_secs = val;
        }
        if let Some(val) = env_parse("ENGINE_RECOGNITION_THRESHOLD") {
            config.recognition.threshold = val;
        }
        if let Some(val) = env_parse("ENGINE_LOW_CONFIDENCE_THRESHOLD") {
            config.intervention.low_confidence_threshold = val;
        }
        if let Some(val) = env_parse("ENGINE_STEP_MINUTES") {
            config.path.step_minutes = val;
        }

        config
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.buffer.capacity == 0 {
            return Err(EngineError::InvalidConfig("buffer capacity must be > 0".into()));
        }
        if self.buffer.analysis_window_ms <= 0 {
            return Err(EngineError::InvalidConfig("analysis window must be > 0".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(EngineError::InvalidConfig("tick interval must be > 0".into()));
        }
        if self.snapshot_history_capacity == 0 || self.prediction.history_capacity == 0 {
            return Err(EngineError::InvalidConfig("history capacities must be > 0".into()));
        }
        if self.path.step_minutes <= 0.0 {
            return Err(EngineError::InvalidConfig("step minutes must be > 0".into()));
        }
        let unit = [
            ("recognition.threshold", self.recognition.threshold),
            ("prediction.probability_threshold", self.prediction.probability_threshold),
            ("intervention.trigger_probability", self.intervention.trigger_probability),
            ("intervention.warning_probability", self.intervention.warning_probability),
            ("intervention.low_confidence_threshold", self.intervention.low_confidence_threshold),
            ("trend.recency_decay", self.trend.recency_decay),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = EngineConfig::default();
        config.buffer.capacity = 0;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut config = EngineConfig::default();
        config.recognition.threshold = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn fatigue_weights_sum_to_one() {
        let p = EstimatorParams::default();
        let total =
            p.fatigue_processing_weight + p.fatigue_hesitation_weight + p.fatigue_attention_weight;
        assert!((total - 1.0).abs() < 1e-9);
    }
}
