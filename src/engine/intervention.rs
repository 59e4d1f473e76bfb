use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::config::{InterventionParams, PhaseBudgets};
use crate::engine::error::EngineError;
use crate::engine::prediction::SESSION_FATIGUE_ID;
use crate::engine::types::{
    ErrorPrediction, ErrorType, Intervention, InterventionKind, InterventionTiming, LearningStyle,
    StateSnapshot, TrendState,
};

const REINFORCEMENT_KEY: &str = "reinforcement";
const BREAK_ACTION: &str = "take a short break before the next item";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Preparation,
    Engagement,
    Consolidation,
    Evaluation,
    Transition,
}

impl SessionPhase {
    pub fn next(self) -> Self {
        match self {
            Self::Preparation => Self::Engagement,
            Self::Engagement => Self::Consolidation,
            Self::Consolidation => Self::Evaluation,
            Self::Evaluation => Self::Transition,
            Self::Transition => Self::Preparation,
        }
    }

    pub fn budget_secs(self, budgets: &PhaseBudgets) -> i64 {
        match self {
            Self::Preparation => budgets.preparation_secs,
            Self::Engagement => budgets.engagement_secs,
            Self::Consolidation => budgets.consolidation_secs,
            Self::Evaluation => budgets.evaluation_secs,
            Self::Transition => budgets.transition_secs,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparation => "preparation",
            Self::Engagement => "engagement",
            Self::Consolidation => "consolidation",
            Self::Evaluation => "evaluation",
            Self::Transition => "transition",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseChange {
    pub from: SessionPhase,
    pub to: SessionPhase,
    /// Set when the phase budget ran out rather than a step completing.
    pub forced: bool,
    pub at: i64,
}

pub struct InterventionContext<'a> {
    pub snapshot: &'a StateSnapshot,
    pub predictions: &'a [ErrorPrediction],
    pub learning_style: LearningStyle,
    pub now_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct FiredKey {
    fired_at: i64,
    window_ms: i64,
}

/// Per-session phase machine that turns predictions into interventions.
pub struct InterventionExecutor {
    params: InterventionParams,
    phase: SessionPhase,
    phase_started_at: i64,
    fired: HashMap<String, FiredKey>,
    suppressed_low_confidence: u64,
}

impl InterventionExecutor {
    pub fn new(params: InterventionParams, now_ms: i64) -> Self {
        Self {
            params,
            phase: SessionPhase::Preparation,
            phase_started_at: now_ms,
            fired: HashMap::new(),
            suppressed_low_confidence: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn phase_started_at(&self) -> i64 {
        self.phase_started_at
    }

    pub fn suppressed_low_confidence(&self) -> u64 {
        self.suppressed_low_confidence
    }

    pub fn complete_step(&mut self, now_ms: i64) -> PhaseChange {
        let to = self.phase.next();
        self.enter(to, false, now_ms)
    }

    /// Forces `transition` once the current phase has overrun its budget.
    pub fn check_budget(&mut self, now_ms: i64) -> Option<PhaseChange> {
        if self.phase == SessionPhase::Transition {
            return None;
        }
        let budget_ms = self.phase.budget_secs(&self.params.budgets) * 1000;
        if now_ms - self.phase_started_at > budget_ms {
            tracing::info!(phase = %self.phase, budget_ms, "phase budget exceeded");
            return Some(self.enter(SessionPhase::Transition, true, now_ms));
        }
        None
    }

    fn enter(&mut self, to: SessionPhase, forced: bool, now_ms: i64) -> PhaseChange {
        let change = PhaseChange {
            from: self.phase,
            to,
            forced,
            at: now_ms,
        };
        self.phase = to;
        self.phase_started_at = now_ms;
        if to == SessionPhase::Consolidation {
            self.fired.remove(REINFORCEMENT_KEY);
        }
        change
    }

    pub fn evaluate(&mut self, ctx: &InterventionContext<'_>) -> Vec<Intervention> {
        self.prune(ctx.now_ms);
        match self.phase {
            SessionPhase::Engagement => self.from_predictions(ctx),
            SessionPhase::Consolidation => self.reinforcement(ctx).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn prune(&mut self, now_ms: i64) {
        self.fired
            .retain(|_, key| now_ms - key.fired_at <= key.window_ms);
    }

    fn from_predictions(&mut self, ctx: &InterventionContext<'_>) -> Vec<Intervention> {
        let mut out = Vec::new();
        for prediction in ctx.predictions {
            if prediction.probability <= self.params.trigger_probability
                || !prediction.within_intervention_window(ctx.now_ms)
            {
                continue;
            }
            if prediction.confidence < self.params.low_confidence_threshold {
                self.suppressed_low_confidence += 1;
                let err = EngineError::LowConfidencePrediction {
                    pattern_id: prediction.pattern_id.clone(),
                    confidence: prediction.confidence,
                };
                tracing::debug!(error = %err, "intervention suppressed");
                continue;
            }
            if self.fired.contains_key(&prediction.pattern_id) {
                continue;
            }

            let intervention = self.build(prediction, ctx);
            self.fired.insert(
                prediction.pattern_id.clone(),
                FiredKey {
                    fired_at: ctx.now_ms,
                    window_ms: (prediction.intervention_window_secs * 1000.0) as i64,
                },
            );
            out.push(intervention);
        }
        out
    }

    fn build(&self, prediction: &ErrorPrediction, ctx: &InterventionContext<'_>) -> Intervention {
        let kind = if prediction.probability > self.params.warning_probability {
            InterventionKind::Warning
        } else {
            match prediction.error_type {
                ErrorType::Conceptual => InterventionKind::Scaffolding,
                ErrorType::Attention => InterventionKind::Redirection,
                _ => InterventionKind::Guidance,
            }
        };

        let timing = if prediction.probability > self.params.warning_probability {
            InterventionTiming::Immediate
        } else if prediction.time_to_error_secs <= self.params.just_in_time_secs {
            InterventionTiming::JustInTime
        } else {
            InterventionTiming::Proactive
        };

        let mut actions = prediction.recommended_actions.immediate.clone();
        if kind == InterventionKind::Scaffolding
            || (kind == InterventionKind::Warning && prediction.error_type == ErrorType::Conceptual)
        {
            actions.push(style_scaffold(ctx.learning_style).to_string());
        }
        if prediction.pattern_id == SESSION_FATIGUE_ID && !actions.iter().any(|a| a == BREAK_ACTION) {
            actions.push(BREAK_ACTION.to_string());
        }

        Intervention {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            timing,
            pattern_id: Some(prediction.pattern_id.clone()),
            message: message_for(kind, prediction),
            actions,
            estimated_effectiveness: effectiveness(kind, prediction.confidence),
            created_at: ctx.now_ms,
        }
    }

    fn reinforcement(&mut self, ctx: &InterventionContext<'_>) -> Option<Intervention> {
        if self.fired.contains_key(REINFORCEMENT_KEY) {
            return None;
        }
        let performance = &ctx.snapshot.performance;
        let strong = ctx.snapshot.trend == TrendState::Up
            || (performance.graded_submits > 0
                && performance.accuracy >= self.params.reinforcement_accuracy);
        if !strong {
            return None;
        }

        self.fired.insert(
            REINFORCEMENT_KEY.to_string(),
            FiredKey {
                fired_at: ctx.now_ms,
                window_ms: self.params.budgets.consolidation_secs * 1000,
            },
        );
        Some(Intervention {
            id: uuid::Uuid::new_v4().to_string(),
            kind: InterventionKind::Reinforcement,
            timing: InterventionTiming::Proactive,
            pattern_id: None,
            message: format!(
                "Strong work: accuracy {:.0}%. Lock it in with a quick review.",
                performance.accuracy * 100.0
            ),
            actions: vec![
                "summarize the strategy that worked".into(),
                "try one slightly harder item".into(),
            ],
            estimated_effectiveness: effectiveness(InterventionKind::Reinforcement, 1.0),
            created_at: ctx.now_ms,
        })
    }

    /// Proactive redirection raised after repeated low-accuracy cycles on a tier
    /// whose floor cannot move.
    pub fn recommend_tier_reevaluation(&self, cycles: u32, now_ms: i64) -> Intervention {
        Intervention {
            id: uuid::Uuid::new_v4().to_string(),
            kind: InterventionKind::Redirection,
            timing: InterventionTiming::Proactive,
            pattern_id: None,
            message: format!(
                "Accuracy has stayed below target for {cycles} analysis cycles; consider re-evaluating the target tier."
            ),
            actions: vec![
                "review the target tier with the learner's guardian or teacher".into(),
                "revisit prerequisite topics at the current floor".into(),
            ],
            estimated_effectiveness: effectiveness(InterventionKind::Redirection, 0.9),
            created_at: now_ms,
        }
    }
}

fn style_scaffold(style: LearningStyle) -> &'static str {
    match style {
        LearningStyle::Visual => "draw a diagram of the quantities involved",
        LearningStyle::Auditory => "talk through each step out loud",
        LearningStyle::ReadingWriting => "write each step as a full sentence",
        LearningStyle::Kinesthetic => "model the problem with physical objects",
    }
}

fn message_for(kind: InterventionKind, prediction: &ErrorPrediction) -> String {
    match kind {
        InterventionKind::Warning => format!(
            "High chance of a {} error in the next {:.0}s. Slow down and check your work.",
            prediction.error_type.as_str(),
            prediction.time_to_error_secs
        ),
        InterventionKind::Scaffolding => {
            "Let's break this into smaller steps before answering.".to_string()
        }
        InterventionKind::Redirection => {
            "Focus seems to be drifting. Let's reset and look at the problem again.".to_string()
        }
        InterventionKind::Guidance => match prediction.error_type {
            ErrorType::Emotional => "You're doing fine. Take it one step at a time.".to_string(),
            ErrorType::Memory => "Jot down the key numbers before continuing.".to_string(),
            _ => "Double-check the method before submitting.".to_string(),
        },
        InterventionKind::Reinforcement => "Nice progress.".to_string(),
    }
}

fn effectiveness(kind: InterventionKind, confidence: f64) -> f64 {
    let base = match kind {
        InterventionKind::Warning => 0.6,
        InterventionKind::Guidance => 0.65,
        InterventionKind::Redirection => 0.7,
        InterventionKind::Scaffolding => 0.75,
        InterventionKind::Reinforcement => 0.8,
    };
    (base * (0.5 + 0.5 * confidence.clamp(0.0, 1.0))).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{DetectionMethod, RecommendedActions};

    fn prediction(id: &str, error_type: ErrorType, probability: f64, confidence: f64) -> ErrorPrediction {
        ErrorPrediction {
            pattern_id: id.to_string(),
            error_type,
            method: DetectionMethod::PatternBased,
            probability,
            confidence,
            severity: 0.5,
            time_to_error_secs: 60.0,
            intervention_window_secs: 120.0,
            recommended_actions: RecommendedActions::default(),
            created_at: 0,
        }
    }

    fn engaged() -> InterventionExecutor {
        let mut executor = InterventionExecutor::new(InterventionParams::default(), 0);
        executor.complete_step(0);
        assert_eq!(executor.phase(), SessionPhase::Engagement);
        executor
    }

    fn ctx<'a>(snapshot: &'a StateSnapshot, predictions: &'a [ErrorPrediction], now_ms: i64) -> InterventionContext<'a> {
        InterventionContext {
            snapshot,
            predictions,
            learning_style: LearningStyle::Visual,
            now_ms,
        }
    }

    #[test]
    fn kind_selection_follows_probability_and_error_type() {
        let mut executor = engaged();
        let snapshot = StateSnapshot::neutral(0);
        let predictions = vec![
            prediction("w", ErrorType::Procedural, 0.9, 0.8),
            prediction("s", ErrorType::Conceptual, 0.75, 0.8),
            prediction("r", ErrorType::Attention, 0.75, 0.8),
            prediction("g", ErrorType::Computational, 0.75, 0.8),
            prediction("below", ErrorType::Computational, 0.7, 0.8),
        ];
        let fired = executor.evaluate(&ctx(&snapshot, &predictions, 1_000));
        let kinds: Vec<_> = fired.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                InterventionKind::Warning,
                InterventionKind::Scaffolding,
                InterventionKind::Redirection,
                InterventionKind::Guidance,
            ]
        );
        assert!(fired[1].actions.iter().any(|a| a.contains("diagram")));
    }

    #[test]
    fn fires_once_per_prediction_window() {
        let mut executor = engaged();
        let snapshot = StateSnapshot::neutral(0);
        let predictions = vec![prediction("p", ErrorType::Procedural, 0.75, 0.8)];
        assert_eq!(executor.evaluate(&ctx(&snapshot, &predictions, 1_000)).len(), 1);
        assert!(executor.evaluate(&ctx(&snapshot, &predictions, 5_000)).is_empty());

        let mut later = predictions.clone();
        later[0].created_at = 200_000;
        assert_eq!(executor.evaluate(&ctx(&snapshot, &later, 200_000)).len(), 1);
    }

    #[test]
    fn predictions_past_their_window_do_not_fire() {
        let snapshot = StateSnapshot::neutral(0);
        let predictions = vec![prediction("p", ErrorType::Procedural, 0.9, 0.8)];

        let mut executor = engaged();
        assert!(executor.evaluate(&ctx(&snapshot, &predictions, 120_001)).is_empty());
        assert_eq!(executor.suppressed_low_confidence(), 0);

        // Boundary is inclusive.
        let mut executor = engaged();
        assert_eq!(executor.evaluate(&ctx(&snapshot, &predictions, 120_000)).len(), 1);
    }

    #[test]
    fn low_confidence_is_suppressed() {
        let mut executor = engaged();
        let snapshot = StateSnapshot::neutral(0);
        let predictions = vec![prediction("p", ErrorType::Procedural, 0.9, 0.4)];
        assert!(executor.evaluate(&ctx(&snapshot, &predictions, 0)).is_empty());
        assert_eq!(executor.suppressed_low_confidence(), 1);
    }

    #[test]
    fn nothing_fires_outside_engagement() {
        let mut executor = InterventionExecutor::new(InterventionParams::default(), 0);
        let snapshot = StateSnapshot::neutral(0);
        let predictions = vec![prediction("p", ErrorType::Procedural, 0.95, 0.9)];
        assert!(executor.evaluate(&ctx(&snapshot, &predictions, 0)).is_empty());
    }

    #[test]
    fn budget_overrun_forces_transition() {
        let mut executor = engaged();
        assert!(executor.check_budget(1_200_000).is_none());
        let change = executor.check_budget(1_200_001).unwrap();
        assert!(change.forced);
        assert_eq!(change.from, SessionPhase::Engagement);
        assert_eq!(executor.phase(), SessionPhase::Transition);
        assert!(executor.check_budget(10_000_000).is_none());
    }

    #[test]
    fn consolidation_reinforces_upward_trend_once() {
        let mut executor = engaged();
        executor.complete_step(0);
        let mut snapshot = StateSnapshot::neutral(0);
        snapshot.trend = TrendState::Up;
        let fired = executor.evaluate(&ctx(&snapshot, &[], 1_000));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, InterventionKind::Reinforcement);
        assert!(executor.evaluate(&ctx(&snapshot, &[], 2_000)).is_empty());
    }

    #[test]
    fn session_fatigue_carries_break_action() {
        let mut executor = engaged();
        let snapshot = StateSnapshot::neutral(0);
        let predictions = vec![prediction(SESSION_FATIGUE_ID, ErrorType::Attention, 0.75, 0.9)];
        let fired = executor.evaluate(&ctx(&snapshot, &predictions, 0));
        assert_eq!(fired[0].kind, InterventionKind::Redirection);
        assert!(fired[0].actions.iter().any(|a| a == BREAK_ACTION));
    }

    #[test]
    fn phase_cycle_wraps_around() {
        let mut phase = SessionPhase::Preparation;
        for _ in 0..5 {
            phase = phase.next();
        }
        assert_eq!(phase, SessionPhase::Preparation);
    }
}
