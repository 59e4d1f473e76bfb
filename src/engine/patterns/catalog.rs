use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;
use crate::engine::types::{ErrorType, RecommendedActions, StateSnapshot};

/// Snapshot-derived quantity a trigger condition compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateMetric {
    Fatigue,
    ProcessingTimeRatio,
    HesitationRate,
    ErrorFrequency,
    RevisionCount,
    AttentionFluctuation,
    Frustration,
    Confidence,
    Engagement,
    Motivation,
    Accuracy,
    Speed,
    Efficiency,
    Consistency,
    LowestTopicMastery,
    SessionMinutes,
}

/// What a trigger sees: the current snapshot plus session-level context.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub snapshot: &'a StateSnapshot,
    pub session_elapsed_ms: i64,
}

impl StateMetric {
    pub fn read(&self, ctx: &MatchContext<'_>) -> Option<f64> {
        let s = ctx.snapshot;
        let value = match self {
            Self::Fatigue => s.cognitive_load.fatigue,
            Self::ProcessingTimeRatio => s.cognitive_load.processing_time_ratio,
            Self::HesitationRate => s.cognitive_load.hesitation_rate,
            Self::ErrorFrequency => s.cognitive_load.error_frequency,
            Self::RevisionCount => s.cognitive_load.revision_count,
            Self::AttentionFluctuation => s.cognitive_load.attention_fluctuation,
            Self::Frustration => s.emotional.frustration,
            Self::Confidence => s.emotional.confidence,
            Self::Engagement => s.emotional.engagement,
            Self::Motivation => s.emotional.motivation,
            Self::Accuracy => s.performance.accuracy,
            Self::Speed => s.performance.speed,
            Self::Efficiency => s.performance.efficiency,
            Self::Consistency => s.performance.consistency,
            Self::LowestTopicMastery => {
                return s.topic_mastery.values().copied().reduce(f64::min);
            }
            Self::SessionMinutes => ctx.session_elapsed_ms as f64 / 60_000.0,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Gte => value >= threshold,
            Self::Lt => value < threshold,
            Self::Lte => value <= threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub metric: StateMetric,
    pub op: Comparison,
    pub threshold: f64,
}

impl TriggerCondition {
    pub fn new(metric: StateMetric, op: Comparison, threshold: f64) -> Self {
        Self {
            metric,
            op,
            threshold,
        }
    }

    /// A metric the snapshot cannot provide never satisfies the condition.
    pub fn is_met(&self, ctx: &MatchContext<'_>) -> bool {
        self.metric
            .read(ctx)
            .map(|value| self.op.evaluate(value, self.threshold))
            .unwrap_or(false)
    }
}

/// Predictive signal looked for in the raw event slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum EventSignal {
    RepeatedHints { min: usize },
    RapidSubmits { max_ms: i64, min: usize },
    ConsecutiveErrors { min: usize },
    TopicErrorCluster { min: usize },
    HighRevisions { min: u32 },
    ErraticActivity { min: usize },
    LongDwell { min_ms: i64, min: usize },
    SlowingPace,
    PauseBurst { min: usize },
    LowDeclaredConfidence { max: f64 },
    ExplanationSeeking { min: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub id: String,
    pub name: String,
    pub error_type: ErrorType,
    pub triggers: Vec<TriggerCondition>,
    pub behavioral_signals: Vec<EventSignal>,
    pub temporal_signals: Vec<EventSignal>,
    pub cognitive_signals: Vec<EventSignal>,
    pub emotional_signals: Vec<EventSignal>,
    pub base_frequency: f64,
    pub severity: f64,
    pub intervention_window_secs: f64,
    pub prevention_strategies: RecommendedActions,
}

impl ErrorPattern {
    pub fn signals(&self) -> impl Iterator<Item = &EventSignal> {
        self.behavioral_signals
            .iter()
            .chain(&self.temporal_signals)
            .chain(&self.cognitive_signals)
            .chain(&self.emotional_signals)
    }

    pub fn signal_count(&self) -> usize {
        self.behavioral_signals.len()
            + self.temporal_signals.len()
            + self.cognitive_signals.len()
            + self.emotional_signals.len()
    }
}

/// Read-only catalog of named error patterns.
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    patterns: Vec<ErrorPattern>,
}

impl PatternCatalog {
    pub fn from_patterns(patterns: Vec<ErrorPattern>) -> Result<Self, EngineError> {
        let mut seen = HashSet::new();
        for pattern in &patterns {
            if pattern.id.trim().is_empty() {
                return Err(EngineError::InvalidCatalog("pattern with empty id".into()));
            }
            if !seen.insert(pattern.id.as_str()) {
                return Err(EngineError::InvalidCatalog(format!(
                    "duplicate pattern id {}",
                    pattern.id
                )));
            }
            if !(0.0..=1.0).contains(&pattern.severity)
                || !(0.0..=1.0).contains(&pattern.base_frequency)
            {
                return Err(EngineError::InvalidCatalog(format!(
                    "{}: severity and base_frequency must be within [0, 1]",
                    pattern.id
                )));
            }
            if pattern.triggers.is_empty() && pattern.signal_count() == 0 {
                return Err(EngineError::InvalidCatalog(format!(
                    "{}: needs at least one trigger or signal",
                    pattern.id
                )));
            }
            if pattern.intervention_window_secs <= 0.0 {
                return Err(EngineError::InvalidCatalog(format!(
                    "{}: intervention window must be positive",
                    pattern.id
                )));
            }
        }
        Ok(Self { patterns })
    }

    pub fn builtin() -> Result<Self, EngineError> {
        Self::from_patterns(builtin_patterns())
    }

    pub fn get(&self, id: &str) -> Option<&ErrorPattern> {
        self.patterns.iter().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorPattern> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn actions(immediate: &[&str], proactive: &[&str], reinforcement: &[&str]) -> RecommendedActions {
    let own = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
    RecommendedActions {
        immediate: own(immediate),
        proactive: own(proactive),
        reinforcement: own(reinforcement),
    }
}

fn builtin_patterns() -> Vec<ErrorPattern> {
    use Comparison::*;
    use EventSignal::*;
    use StateMetric::*;

    vec![
        ErrorPattern {
            id: "conceptual_gap".into(),
            name: "Conceptual misunderstanding".into(),
            error_type: ErrorType::Conceptual,
            triggers: vec![
                TriggerCondition::new(ErrorFrequency, Gte, 0.5),
                TriggerCondition::new(LowestTopicMastery, Lt, 0.4),
            ],
            behavioral_signals: vec![RepeatedHints { min: 2 }],
            temporal_signals: vec![LongDwell { min_ms: 45_000, min: 1 }],
            cognitive_signals: vec![TopicErrorCluster { min: 2 }],
            emotional_signals: vec![LowDeclaredConfidence { max: 0.4 }],
            base_frequency: 0.25,
            severity: 0.8,
            intervention_window_secs: 180.0,
            prevention_strategies: actions(
                &["revisit the worked example for this topic"],
                &["insert a prerequisite review item"],
                &["follow up with a similar problem at lower difficulty"],
            ),
        },
        ErrorPattern {
            id: "careless_computation".into(),
            name: "Careless computation".into(),
            error_type: ErrorType::Computational,
            triggers: vec![
                TriggerCondition::new(Speed, Gt, 0.7),
                TriggerCondition::new(Accuracy, Lt, 0.7),
            ],
            behavioral_signals: vec![RapidSubmits { max_ms: 10_000, min: 2 }],
            temporal_signals: vec![],
            cognitive_signals: vec![ConsecutiveErrors { min: 2 }],
            emotional_signals: vec![],
            base_frequency: 0.3,
            severity: 0.5,
            intervention_window_secs: 60.0,
            prevention_strategies: actions(
                &["ask the learner to re-check the last step"],
                &["require showing intermediate results"],
                &["praise careful verification"],
            ),
        },
        ErrorPattern {
            id: "attention_drift".into(),
            name: "Attention drift".into(),
            error_type: ErrorType::Attention,
            triggers: vec![
                TriggerCondition::new(AttentionFluctuation, Gt, 0.4),
                TriggerCondition::new(Engagement, Lt, 0.4),
                TriggerCondition::new(SessionMinutes, Gt, 20.0),
            ],
            behavioral_signals: vec![ErraticActivity { min: 2 }],
            temporal_signals: vec![PauseBurst { min: 2 }, LongDwell { min_ms: 60_000, min: 1 }],
            cognitive_signals: vec![],
            emotional_signals: vec![],
            base_frequency: 0.2,
            severity: 0.6,
            intervention_window_secs: 60.0,
            prevention_strategies: actions(
                &["refocus prompt"],
                &["switch to a shorter item"],
                &["acknowledge regained focus"],
            ),
        },
        ErrorPattern {
            id: "working_memory_overload".into(),
            name: "Working-memory overload".into(),
            error_type: ErrorType::Memory,
            triggers: vec![
                TriggerCondition::new(Fatigue, Gt, 0.6),
                TriggerCondition::new(HesitationRate, Gt, 1.0),
            ],
            behavioral_signals: vec![HighRevisions { min: 3 }],
            temporal_signals: vec![SlowingPace, LongDwell { min_ms: 60_000, min: 1 }],
            cognitive_signals: vec![],
            emotional_signals: vec![],
            base_frequency: 0.15,
            severity: 0.7,
            intervention_window_secs: 90.0,
            prevention_strategies: actions(
                &["offer a scratchpad breakdown of the problem"],
                &["reduce the number of steps per item"],
                &["recap the chunking strategy"],
            ),
        },
        ErrorPattern {
            id: "procedural_slip".into(),
            name: "Procedural slip".into(),
            error_type: ErrorType::Procedural,
            triggers: vec![
                TriggerCondition::new(RevisionCount, Gte, 3.0),
                TriggerCondition::new(Consistency, Lt, 0.5),
            ],
            behavioral_signals: vec![HighRevisions { min: 3 }],
            temporal_signals: vec![],
            cognitive_signals: vec![ConsecutiveErrors { min: 2 }],
            emotional_signals: vec![],
            base_frequency: 0.2,
            severity: 0.5,
            intervention_window_secs: 120.0,
            prevention_strategies: actions(
                &["show the step checklist"],
                &["practice the procedure in isolation"],
                &["reinforce the correct order of steps"],
            ),
        },
        ErrorPattern {
            id: "frustration_spiral".into(),
            name: "Frustration spiral".into(),
            error_type: ErrorType::Emotional,
            triggers: vec![
                TriggerCondition::new(Frustration, Gt, 0.6),
                TriggerCondition::new(Motivation, Lt, 0.4),
            ],
            behavioral_signals: vec![RepeatedHints { min: 3 }],
            temporal_signals: vec![],
            cognitive_signals: vec![ConsecutiveErrors { min: 3 }],
            emotional_signals: vec![LowDeclaredConfidence { max: 0.3 }],
            base_frequency: 0.1,
            severity: 0.75,
            intervention_window_secs: 90.0,
            prevention_strategies: actions(
                &["offer encouragement"],
                &["serve a confidence-building item"],
                &["celebrate the next correct answer"],
            ),
        },
        ErrorPattern {
            id: "overconfidence".into(),
            name: "Overconfidence".into(),
            error_type: ErrorType::Computational,
            triggers: vec![
                TriggerCondition::new(Confidence, Gt, 0.8),
                TriggerCondition::new(Accuracy, Lt, 0.6),
            ],
            behavioral_signals: vec![RapidSubmits { max_ms: 8_000, min: 3 }],
            temporal_signals: vec![],
            cognitive_signals: vec![],
            emotional_signals: vec![],
            base_frequency: 0.15,
            severity: 0.4,
            intervention_window_secs: 60.0,
            prevention_strategies: actions(
                &["ask for an estimate before answering"],
                &["mix in items with common traps"],
                &["highlight accuracy over speed"],
            ),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = PatternCatalog::builtin().unwrap();
        assert_eq!(catalog.len(), 7);
        assert!(catalog.get("attention_drift").is_some());
        assert!(catalog.iter().all(|p| p.severity > 0.0));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut patterns = builtin_patterns();
        patterns.push(patterns[0].clone());
        assert!(matches!(
            PatternCatalog::from_patterns(patterns),
            Err(EngineError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn lowest_mastery_needs_a_topic() {
        let snapshot = StateSnapshot::neutral(0);
        let ctx = MatchContext {
            snapshot: &snapshot,
            session_elapsed_ms: 0,
        };
        let condition = TriggerCondition::new(StateMetric::LowestTopicMastery, Comparison::Lt, 0.4);
        assert!(!condition.is_met(&ctx));
    }
}
