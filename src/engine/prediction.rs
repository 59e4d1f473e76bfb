use std::collections::VecDeque;
use std::sync::Arc;

use crate::engine::config::PredictionParams;
use crate::engine::patterns::{PatternCatalog, PatternMatch};
use crate::engine::types::{
    DetectionMethod, ErrorPrediction, ErrorType, RecommendedActions, StateSnapshot,
};

pub const COGNITIVE_OVERLOAD_ID: &str = "cognitive_overload";
pub const SESSION_FATIGUE_ID: &str = "session_fatigue";

const DEFAULT_WINDOW_SECS: f64 = 120.0;
const OVERLOAD_SEVERITY: f64 = 0.7;
const OVERLOAD_WINDOW_SECS: f64 = 90.0;
const SESSION_FATIGUE_SEVERITY: f64 = 0.6;
const SESSION_FATIGUE_WINDOW_SECS: f64 = 120.0;
const SESSION_FATIGUE_BASE_PROBABILITY: f64 = 0.7;

pub struct PredictionInput<'a> {
    pub snapshot: &'a StateSnapshot,
    pub matches: &'a [PatternMatch],
    pub slice_len: usize,
    pub session_elapsed_ms: i64,
    pub attention_span_ms: i64,
    pub now_ms: i64,
}

/// Turns pattern matches and load/fatigue signals into ranked error predictions.
///
/// Keeps the active set (at most `max_active`, probability above threshold, younger
/// than the validity window) and a bounded history of every prediction produced.
pub struct ErrorPredictor {
    catalog: Arc<PatternCatalog>,
    params: PredictionParams,
    active: Vec<ErrorPrediction>,
    history: VecDeque<ErrorPrediction>,
}

impl ErrorPredictor {
    pub fn new(catalog: Arc<PatternCatalog>, params: PredictionParams) -> Self {
        let capacity = params.history_capacity;
        Self {
            catalog,
            params,
            active: Vec::new(),
            history: VecDeque::with_capacity(capacity),
        }
    }

    pub fn active(&self) -> &[ErrorPrediction] {
        &self.active
    }

    pub fn history(&self) -> impl Iterator<Item = &ErrorPrediction> {
        self.history.iter()
    }

    pub fn purge_expired(&mut self, now_ms: i64) -> usize {
        let validity = self.params.validity_ms();
        let before = self.active.len();
        self.active.retain(|p| !p.is_expired(now_ms, validity));
        before - self.active.len()
    }

    pub fn predict(&mut self, input: &PredictionInput<'_>) -> Vec<ErrorPrediction> {
        let purged = self.purge_expired(input.now_ms);
        if purged > 0 {
            tracing::debug!(purged, "expired predictions purged");
        }

        let mut fresh: Vec<ErrorPrediction> = input
            .matches
            .iter()
            .map(|m| self.from_match(m, input.now_ms))
            .collect();

        if let Some(p) = self.cognitive_overload(input) {
            fresh.push(p);
        }
        if let Some(p) = self.session_fatigue(input) {
            fresh.push(p);
        }

        if input.slice_len < self.params.min_events_for_full_confidence {
            for p in &mut fresh {
                p.confidence = (p.confidence * self.params.sparse_confidence_factor).clamp(0.0, 1.0);
            }
        }

        for p in &fresh {
            self.remember(p.clone());
        }

        for p in fresh {
            match self.active.iter_mut().find(|a| a.pattern_id == p.pattern_id) {
                Some(existing) => *existing = p,
                None => self.active.push(p),
            }
        }

        let threshold = self.params.probability_threshold;
        self.active.retain(|p| p.probability > threshold);
        self.active.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });
        self.active.truncate(self.params.max_active);

        self.active.clone()
    }

    fn remember(&mut self, prediction: ErrorPrediction) {
        if self.history.len() >= self.params.history_capacity.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(prediction);
    }

    fn from_match(&self, m: &PatternMatch, now_ms: i64) -> ErrorPrediction {
        let pattern = self.catalog.get(&m.pattern_id);
        let window = pattern
            .map(|p| p.intervention_window_secs)
            .unwrap_or(DEFAULT_WINDOW_SECS);
        let probability = m.score.clamp(0.0, 1.0);
        ErrorPrediction {
            pattern_id: m.pattern_id.clone(),
            error_type: m.error_type,
            method: DetectionMethod::PatternBased,
            probability,
            confidence: self.params.pattern_confidence.clamp(0.0, 1.0),
            severity: m.severity,
            time_to_error_secs: time_to_error(window, probability),
            intervention_window_secs: window,
            recommended_actions: pattern
                .map(|p| p.prevention_strategies.clone())
                .unwrap_or_default(),
            created_at: now_ms,
        }
    }

    fn cognitive_overload(&self, input: &PredictionInput<'_>) -> Option<ErrorPrediction> {
        let fatigue = input.snapshot.cognitive_load.fatigue;
        if fatigue <= self.params.overload_fatigue_threshold {
            return None;
        }
        let probability = fatigue.clamp(0.0, 1.0);
        Some(ErrorPrediction {
            pattern_id: COGNITIVE_OVERLOAD_ID.to_string(),
            error_type: ErrorType::Memory,
            method: DetectionMethod::CognitiveLoad,
            probability,
            confidence: self.params.cognitive_load_confidence.clamp(0.0, 1.0),
            severity: OVERLOAD_SEVERITY,
            time_to_error_secs: time_to_error(OVERLOAD_WINDOW_SECS, probability),
            intervention_window_secs: OVERLOAD_WINDOW_SECS,
            recommended_actions: RecommendedActions {
                immediate: vec!["pause and simplify the current item".into()],
                proactive: vec!["lower difficulty for the next item".into()],
                reinforcement: vec!["short recap after the break".into()],
            },
            created_at: input.now_ms,
        })
    }

    fn session_fatigue(&self, input: &PredictionInput<'_>) -> Option<ErrorPrediction> {
        if input.attention_span_ms <= 0 || input.session_elapsed_ms <= input.attention_span_ms {
            return None;
        }
        let overrun = (input.session_elapsed_ms - input.attention_span_ms) as f64
            / input.attention_span_ms as f64;
        let probability = (SESSION_FATIGUE_BASE_PROBABILITY
            + (1.0 - SESSION_FATIGUE_BASE_PROBABILITY) * overrun.min(1.0))
        .clamp(0.0, 1.0);
        Some(ErrorPrediction {
            pattern_id: SESSION_FATIGUE_ID.to_string(),
            error_type: ErrorType::Attention,
            method: DetectionMethod::Temporal,
            probability,
            confidence: self.params.temporal_confidence.clamp(0.0, 1.0),
            severity: SESSION_FATIGUE_SEVERITY,
            time_to_error_secs: time_to_error(SESSION_FATIGUE_WINDOW_SECS, probability),
            intervention_window_secs: SESSION_FATIGUE_WINDOW_SECS,
            recommended_actions: RecommendedActions {
                immediate: vec!["suggest a short break".into()],
                proactive: vec!["shorten the remaining session".into()],
                reinforcement: vec!["resume with a familiar item".into()],
            },
            created_at: input.now_ms,
        })
    }
}

fn time_to_error(window_secs: f64, probability: f64) -> f64 {
    (window_secs * (1.5 - probability)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predictor() -> ErrorPredictor {
        ErrorPredictor::new(
            Arc::new(PatternCatalog::builtin().unwrap()),
            PredictionParams::default(),
        )
    }

    fn matched(id: &str, score: f64) -> PatternMatch {
        PatternMatch {
            pattern_id: id.to_string(),
            error_type: ErrorType::Conceptual,
            score,
            severity: 0.5,
            triggers_met: 1,
            triggers_total: 1,
            signals_detected: 0,
            signals_total: 0,
        }
    }

    fn input<'a>(
        snapshot: &'a StateSnapshot,
        matches: &'a [PatternMatch],
        now_ms: i64,
    ) -> PredictionInput<'a> {
        PredictionInput {
            snapshot,
            matches,
            slice_len: 10,
            session_elapsed_ms: 0,
            attention_span_ms: 25 * 60_000,
            now_ms,
        }
    }

    #[test]
    fn pattern_predictions_are_sorted_and_filtered() {
        let mut p = predictor();
        let snapshot = StateSnapshot::neutral(0);
        let matches = vec![
            matched("conceptual_gap", 0.65),
            matched("attention_drift", 0.95),
            matched("procedural_slip", 0.55),
        ];
        let active = p.predict(&input(&snapshot, &matches, 0));
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].pattern_id, "attention_drift");
        assert_eq!(active[0].confidence, 0.8);
        // the filtered one is still in history
        assert_eq!(p.history().count(), 3);
    }

    #[test]
    fn overload_fires_above_fatigue_threshold() {
        let mut p = predictor();
        let mut snapshot = StateSnapshot::neutral(0);
        snapshot.cognitive_load.fatigue = 0.9;
        let active = p.predict(&input(&snapshot, &[], 0));
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].pattern_id, COGNITIVE_OVERLOAD_ID);
        assert_eq!(active[0].error_type, ErrorType::Memory);
        assert_eq!(active[0].confidence, 0.85);
    }

    #[test]
    fn session_fatigue_after_attention_span() {
        let mut p = predictor();
        let snapshot = StateSnapshot::neutral(0);
        let mut i = input(&snapshot, &[], 0);
        i.session_elapsed_ms = 30 * 60_000;
        let active = p.predict(&i);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].pattern_id, SESSION_FATIGUE_ID);
        assert_eq!(active[0].error_type, ErrorType::Attention);
        assert_eq!(active[0].confidence, 0.9);
        assert!(active[0].probability > 0.7);
    }

    #[test]
    fn predictions_expire_after_validity_window() {
        let mut p = predictor();
        let snapshot = StateSnapshot::neutral(0);
        let matches = vec![matched("conceptual_gap", 0.9)];
        p.predict(&input(&snapshot, &matches, 0));
        assert_eq!(p.active().len(), 1);

        let later = p.predict(&input(&snapshot, &[], 300_001));
        assert!(later.is_empty());
    }

    #[test]
    fn sparse_slices_halve_confidence() {
        let mut p = predictor();
        let snapshot = StateSnapshot::neutral(0);
        let matches = vec![matched("conceptual_gap", 0.9)];
        let mut i = input(&snapshot, &matches, 0);
        i.slice_len = 1;
        let active = p.predict(&i);
        assert!((active[0].confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn active_set_is_capped() {
        let mut p = predictor();
        let snapshot = StateSnapshot::neutral(0);
        let matches: Vec<_> = (0..8).map(|i| matched(&format!("x{i}"), 0.9)).collect();
        assert_eq!(p.predict(&input(&snapshot, &matches, 0)).len(), 5);
    }
}
