use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "4th")]
    Fourth,
    #[serde(rename = "5th")]
    Fifth,
    #[serde(rename = "6th")]
    Sixth,
}

impl Grade {
    pub fn all() -> &'static [Grade] {
        &[Grade::Fourth, Grade::Fifth, Grade::Sixth]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fourth => "4th",
            Self::Fifth => "5th",
            Self::Sixth => "6th",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "4th" | "4" | "fourth" => Some(Self::Fourth),
            "5th" | "5" | "fifth" => Some(Self::Fifth),
            "6th" | "6" | "sixth" => Some(Self::Sixth),
            _ => None,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Basic,
    Standard,
    Advanced,
    Elite,
}

impl Tier {
    pub fn all() -> &'static [Tier] {
        &[Tier::Basic, Tier::Standard, Tier::Advanced, Tier::Elite]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Standard => "standard",
            Self::Advanced => "advanced",
            Self::Elite => "elite",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "standard" => Some(Self::Standard),
            "advanced" => Some(Self::Advanced),
            "elite" => Some(Self::Elite),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LearningStyle {
    #[default]
    Visual,
    Auditory,
    ReadingWriting,
    Kinesthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveTraits {
    pub processing_speed: f64,
    pub working_memory_capacity: f64,
    pub attention_span_minutes: f64,
    /// Declared ceiling on the 1-10 difficulty scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cognitive_load: Option<f64>,
}

impl Default for CognitiveTraits {
    fn default() -> Self {
        Self {
            processing_speed: 0.5,
            working_memory_capacity: 0.5,
            attention_span_minutes: 25.0,
            max_cognitive_load: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeConstraints {
    pub session_minutes: f64,
    pub days_per_week: u32,
    pub weeks_available: u32,
}

impl Default for TimeConstraints {
    fn default() -> Self {
        Self {
            session_minutes: 30.0,
            days_per_week: 5,
            weeks_available: 8,
        }
    }
}

impl TimeConstraints {
    pub fn total_minutes(&self) -> f64 {
        self.session_minutes * self.days_per_week as f64 * self.weeks_available as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProfile {
    pub learner_id: String,
    pub grade: Grade,
    pub tier: Tier,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub traits: CognitiveTraits,
    #[serde(default)]
    pub learning_style: LearningStyle,
    #[serde(default)]
    pub time_constraints: TimeConstraints,
}

impl LearnerProfile {
    pub fn new(learner_id: impl Into<String>, grade: Grade, tier: Tier) -> Self {
        Self {
            learner_id: learner_id.into(),
            grade,
            tier,
            subjects: vec!["math".to_string()],
            traits: CognitiveTraits::default(),
            learning_style: LearningStyle::default(),
            time_constraints: TimeConstraints::default(),
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.learner_id.trim().is_empty() {
            return Err(EngineError::InvalidProfile("learner_id is empty".to_string()));
        }
        let unit_fields = [
            ("processing_speed", self.traits.processing_speed),
            ("working_memory_capacity", self.traits.working_memory_capacity),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidProfile(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if !(self.traits.attention_span_minutes > 0.0) {
            return Err(EngineError::InvalidProfile(format!(
                "attention_span_minutes must be positive, got {}",
                self.traits.attention_span_minutes
            )));
        }
        if let Some(ceiling) = self.traits.max_cognitive_load {
            if !(1.0..=10.0).contains(&ceiling) {
                return Err(EngineError::InvalidProfile(format!(
                    "max_cognitive_load must be within [1, 10], got {ceiling}"
                )));
            }
        }
        if !(self.time_constraints.session_minutes > 0.0) {
            return Err(EngineError::InvalidProfile(
                "session_minutes must be positive".to_string(),
            ));
        }
        if self.time_constraints.days_per_week == 0 || self.time_constraints.days_per_week > 7 {
            return Err(EngineError::InvalidProfile(format!(
                "days_per_week must be within 1..=7, got {}",
                self.time_constraints.days_per_week
            )));
        }
        if self.time_constraints.weeks_available == 0 {
            return Err(EngineError::InvalidProfile(
                "weeks_available must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn primary_subject(&self) -> &str {
        self.subjects.first().map(String::as_str).unwrap_or("math")
    }

    pub fn attention_span_ms(&self) -> i64 {
        (self.traits.attention_span_minutes * 60_000.0) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Submit,
    HintRequest,
    ViewExplanation,
    Pause,
    Resume,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Submit => "submit",
            Self::HintRequest => "hint_request",
            Self::ViewExplanation => "view_explanation",
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventPayload {
    pub time_spent_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    pub mouse_moves: u32,
    pub keystrokes: u32,
    pub hesitations: u32,
    pub revisions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<f64>,
}

/// Event as pushed by the host, before the buffer stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
    #[serde(default)]
    pub payload: EventPayload,
}

impl EventInput {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            problem_id: None,
            payload: EventPayload::default(),
        }
    }

    pub fn submit(problem_id: impl Into<String>, correct: bool, time_spent_ms: i64) -> Self {
        Self {
            kind: EventKind::Submit,
            problem_id: Some(problem_id.into()),
            payload: EventPayload {
                time_spent_ms,
                is_correct: Some(correct),
                ..Default::default()
            },
        }
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningEvent {
    pub timestamp: i64,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
    #[serde(default)]
    pub payload: EventPayload,
}

impl LearningEvent {
    pub fn from_input(input: EventInput, timestamp: i64) -> Self {
        Self {
            timestamp,
            kind: input.kind,
            problem_id: input.problem_id,
            payload: input.payload,
        }
    }

    pub fn is_submit(&self) -> bool {
        self.kind == EventKind::Submit
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveLoad {
    pub processing_time_ms: f64,
    pub processing_time_ratio: f64,
    pub hesitation_rate: f64,
    pub error_frequency: f64,
    pub revision_count: f64,
    pub attention_fluctuation: f64,
    pub fatigue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionalIndicators {
    pub frustration: f64,
    pub confidence: f64,
    pub engagement: f64,
    pub motivation: f64,
}

impl Default for EmotionalIndicators {
    fn default() -> Self {
        Self {
            frustration: 0.0,
            confidence: 0.5,
            engagement: 0.5,
            motivation: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub accuracy: f64,
    pub speed: f64,
    pub efficiency: f64,
    pub consistency: f64,
    pub graded_submits: u32,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            accuracy: 0.5,
            speed: 0.5,
            efficiency: 0.5,
            consistency: 1.0,
            graded_submits: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrendState {
    Up,
    #[default]
    Flat,
    Stuck,
    Down,
}

impl TrendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Flat => "flat",
            Self::Stuck => "stuck",
            Self::Down => "down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub timestamp: i64,
    pub cognitive_load: CognitiveLoad,
    pub emotional: EmotionalIndicators,
    pub performance: PerformanceMetrics,
    pub topic_mastery: BTreeMap<String, f64>,
    pub trend: TrendState,
    pub event_count: usize,
}

impl StateSnapshot {
    /// Neutral starting state for a session without data.
    pub fn neutral(timestamp: i64) -> Self {
        Self {
            timestamp,
            cognitive_load: CognitiveLoad::default(),
            emotional: EmotionalIndicators::default(),
            performance: PerformanceMetrics::default(),
            topic_mastery: BTreeMap::new(),
            trend: TrendState::Flat,
            event_count: 0,
        }
    }

    pub fn mastery_of(&self, topic: &str) -> Option<f64> {
        self.topic_mastery.get(topic).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Conceptual,
    Procedural,
    Computational,
    Attention,
    Memory,
    Emotional,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conceptual => "conceptual",
            Self::Procedural => "procedural",
            Self::Computational => "computational",
            Self::Attention => "attention",
            Self::Memory => "memory",
            Self::Emotional => "emotional",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    PatternBased,
    CognitiveLoad,
    Temporal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedActions {
    pub immediate: Vec<String>,
    pub proactive: Vec<String>,
    pub reinforcement: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPrediction {
    pub pattern_id: String,
    pub error_type: ErrorType,
    pub method: DetectionMethod,
    pub probability: f64,
    pub confidence: f64,
    pub severity: f64,
    pub time_to_error_secs: f64,
    pub intervention_window_secs: f64,
    pub recommended_actions: RecommendedActions,
    pub created_at: i64,
}

impl ErrorPrediction {
    pub fn age_ms(&self, now: i64) -> i64 {
        now.saturating_sub(self.created_at)
    }

    pub fn is_expired(&self, now: i64, validity_ms: i64) -> bool {
        self.age_ms(now) > validity_ms
    }

    pub fn within_intervention_window(&self, now: i64) -> bool {
        self.age_ms(now) as f64 <= self.intervention_window_secs * 1000.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDescriptor {
    pub id: String,
    pub difficulty: f64,
    pub topic: String,
    #[serde(default)]
    pub subtopic: Option<String>,
    pub expected_time_secs: u32,
    #[serde(default)]
    pub required_skills: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advisory {
    NotRecommended,
    LowConfidence,
    TierReevaluation,
    CeilingBelowTierFloor,
}

impl Advisory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRecommended => "not_recommended",
            Self::LowConfidence => "low_confidence",
            Self::TierReevaluation => "tier_reevaluation",
            Self::CeilingBelowTierFloor => "ceiling_below_tier_floor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyRecommendation {
    pub grade: Grade,
    pub tier: Tier,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub reasoning: String,
    pub time_allocation_secs: u32,
    pub advisories: Vec<Advisory>,
    /// Accuracy sat below the tier target band this cycle.
    pub low_performance: bool,
}

impl DifficultyRecommendation {
    pub fn has_advisory(&self, advisory: Advisory) -> bool {
        self.advisories.contains(&advisory)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionKind {
    Warning,
    Guidance,
    Scaffolding,
    Redirection,
    Reinforcement,
}

impl InterventionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Guidance => "guidance",
            Self::Scaffolding => "scaffolding",
            Self::Redirection => "redirection",
            Self::Reinforcement => "reinforcement",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionTiming {
    Immediate,
    JustInTime,
    Proactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intervention {
    pub id: String,
    pub kind: InterventionKind,
    pub timing: InterventionTiming,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,
    pub message: String,
    pub actions: Vec<String>,
    pub estimated_effectiveness: f64,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_serializes_as_ordinal() {
        let json = serde_json::to_string(&Grade::Fifth).unwrap();
        assert_eq!(json, "\"5th\"");
        let parsed: Grade = serde_json::from_str("\"6th\"").unwrap();
        assert_eq!(parsed, Grade::Sixth);
        assert_eq!(Grade::parse("fourth"), Some(Grade::Fourth));
    }

    #[test]
    fn advisory_uses_snake_case() {
        let json = serde_json::to_string(&Advisory::NotRecommended).unwrap();
        assert_eq!(json, "\"not_recommended\"");
    }

    #[test]
    fn profile_validation_rejects_bad_traits() {
        let mut profile = LearnerProfile::new("kid-1", Grade::Fourth, Tier::Basic);
        assert!(profile.validate().is_ok());

        profile.traits.processing_speed = 1.5;
        assert!(matches!(profile.validate(), Err(EngineError::InvalidProfile(_))));

        profile.traits.processing_speed = 0.5;
        profile.traits.attention_span_minutes = 0.0;
        assert!(profile.validate().is_err());

        profile.traits.attention_span_minutes = 20.0;
        profile.traits.max_cognitive_load = Some(12.0);
        assert!(profile.validate().is_err());
    }

    #[test]
    fn profile_validation_rejects_empty_schedule() {
        let mut profile = LearnerProfile::new("kid-2", Grade::Sixth, Tier::Standard);
        profile.time_constraints.weeks_available = 0;
        assert!(matches!(profile.validate(), Err(EngineError::InvalidProfile(_))));

        profile.time_constraints.weeks_available = 1;
        profile.time_constraints.days_per_week = 0;
        assert!(matches!(profile.validate(), Err(EngineError::InvalidProfile(_))));
    }

    #[test]
    fn payload_fields_default_when_missing() {
        let event: EventInput =
            serde_json::from_str(r#"{"kind":"hint_request","problemId":"p1"}"#).unwrap();
        assert_eq!(event.kind, EventKind::HintRequest);
        assert_eq!(event.payload.time_spent_ms, 0);
        assert!(event.payload.is_correct.is_none());
    }

    #[test]
    fn prediction_window_and_expiry() {
        let prediction = ErrorPrediction {
            pattern_id: "p".to_string(),
            error_type: ErrorType::Attention,
            method: DetectionMethod::PatternBased,
            probability: 0.7,
            confidence: 0.8,
            severity: 0.5,
            time_to_error_secs: 30.0,
            intervention_window_secs: 60.0,
            recommended_actions: RecommendedActions::default(),
            created_at: 1_000,
        };
        assert!(prediction.within_intervention_window(61_000));
        assert!(!prediction.within_intervention_window(61_001));
        assert!(!prediction.is_expired(301_000, 300_000));
        assert!(prediction.is_expired(301_001, 300_000));
    }
}
