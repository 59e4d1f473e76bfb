use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::config::{EstimatorParams, RecognitionParams};
use crate::engine::modeling::cognitive_load::is_fluctuating;
use crate::engine::patterns::catalog::{ErrorPattern, EventSignal, MatchContext, PatternCatalog};
use crate::engine::types::{ErrorType, EventKind, LearningEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMatch {
    pub pattern_id: String,
    pub error_type: ErrorType,
    pub score: f64,
    pub severity: f64,
    pub triggers_met: usize,
    pub triggers_total: usize,
    pub signals_detected: usize,
    pub signals_total: usize,
}

impl PatternMatch {
    pub fn rank(&self) -> f64 {
        self.score * self.severity
    }
}

pub struct PatternRecognizer {
    catalog: Arc<PatternCatalog>,
    params: RecognitionParams,
    thresholds: EstimatorParams,
}

impl PatternRecognizer {
    pub fn new(
        catalog: Arc<PatternCatalog>,
        params: RecognitionParams,
        thresholds: EstimatorParams,
    ) -> Self {
        Self {
            catalog,
            params,
            thresholds,
        }
    }

    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    /// Weighted fraction of satisfied triggers and detected signals, in [0, 1].
    pub fn score(
        &self,
        pattern: &ErrorPattern,
        ctx: &MatchContext<'_>,
        slice: &[LearningEvent],
    ) -> PatternMatch {
        let triggers_total = pattern.triggers.len();
        let triggers_met = pattern.triggers.iter().filter(|t| t.is_met(ctx)).count();
        let signals_total = pattern.signal_count();
        let signals_detected = pattern
            .signals()
            .filter(|s| detect_signal(s, slice, &self.thresholds))
            .count();

        let trigger_fraction = fraction(triggers_met, triggers_total);
        let signal_fraction = fraction(signals_detected, signals_total);

        let score = match (triggers_total, signals_total) {
            (0, 0) => 0.0,
            (0, _) => signal_fraction,
            (_, 0) => trigger_fraction,
            _ => {
                let total = (self.params.trigger_weight + self.params.signal_weight).max(1e-9);
                (self.params.trigger_weight * trigger_fraction
                    + self.params.signal_weight * signal_fraction)
                    / total
            }
        };

        PatternMatch {
            pattern_id: pattern.id.clone(),
            error_type: pattern.error_type,
            score: score.clamp(0.0, 1.0),
            severity: pattern.severity,
            triggers_met,
            triggers_total,
            signals_detected,
            signals_total,
        }
    }

    pub fn score_all(&self, ctx: &MatchContext<'_>, slice: &[LearningEvent]) -> Vec<PatternMatch> {
        self.catalog
            .iter()
            .map(|pattern| self.score(pattern, ctx, slice))
            .collect()
    }

    /// Patterns scoring above the threshold, ranked by `score * severity`,
    /// deduplicated by id and capped.
    pub fn recognize(&self, ctx: &MatchContext<'_>, slice: &[LearningEvent]) -> Vec<PatternMatch> {
        let mut matches: Vec<PatternMatch> = self
            .score_all(ctx, slice)
            .into_iter()
            .filter(|m| m.score > self.params.threshold)
            .collect();

        matches.sort_by(|a, b| {
            b.rank()
                .partial_cmp(&a.rank())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });

        let mut seen = HashSet::new();
        matches.retain(|m| seen.insert(m.pattern_id.clone()));
        matches.truncate(self.params.max_matches);

        for m in &matches {
            tracing::debug!(
                pattern_id = %m.pattern_id,
                score = m.score,
                severity = m.severity,
                "pattern recognized"
            );
        }
        matches
    }
}

fn fraction(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn submits(slice: &[LearningEvent]) -> impl Iterator<Item = &LearningEvent> {
    slice.iter().filter(|e| e.is_submit())
}

fn count_kind(slice: &[LearningEvent], kind: EventKind) -> usize {
    slice.iter().filter(|e| e.kind == kind).count()
}

fn longest_error_run(slice: &[LearningEvent]) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for correct in submits(slice).filter_map(|e| e.payload.is_correct) {
        if correct {
            run = 0;
        } else {
            run += 1;
            longest = longest.max(run);
        }
    }
    longest
}

pub fn detect_signal(signal: &EventSignal, slice: &[LearningEvent], thresholds: &EstimatorParams) -> bool {
    match signal {
        EventSignal::RepeatedHints { min } => count_kind(slice, EventKind::HintRequest) >= *min,
        EventSignal::RapidSubmits { max_ms, min } => {
            submits(slice)
                .filter(|e| e.payload.time_spent_ms < *max_ms)
                .count()
                >= *min
        }
        EventSignal::ConsecutiveErrors { min } => longest_error_run(slice) >= *min,
        EventSignal::TopicErrorCluster { min } => {
            let mut errors: HashMap<&str, usize> = HashMap::new();
            for event in submits(slice) {
                if let (Some(topic), Some(false)) =
                    (event.payload.topic.as_deref(), event.payload.is_correct)
                {
                    *errors.entry(topic).or_default() += 1;
                }
            }
            errors.values().any(|count| count >= min)
        }
        EventSignal::HighRevisions { min } => {
            let total = slice
                .iter()
                .fold(0u64, |acc, e| acc.saturating_add(u64::from(e.payload.revisions)));
            total >= u64::from(*min)
        }
        EventSignal::ErraticActivity { min } => {
            slice.iter().filter(|e| is_fluctuating(e, thresholds)).count() >= *min
        }
        EventSignal::LongDwell { min_ms, min } => {
            slice
                .iter()
                .filter(|e| e.payload.time_spent_ms > *min_ms)
                .count()
                >= *min
        }
        EventSignal::SlowingPace => {
            let times: Vec<f64> = submits(slice)
                .map(|e| e.payload.time_spent_ms.max(0) as f64)
                .collect();
            if times.len() < 3 {
                return false;
            }
            let half = times.len() / 2;
            let early = times[..half].iter().sum::<f64>() / half as f64;
            let late = times[half..].iter().sum::<f64>() / (times.len() - half) as f64;
            early > 0.0 && late > early * 1.3
        }
        EventSignal::PauseBurst { min } => count_kind(slice, EventKind::Pause) >= *min,
        EventSignal::LowDeclaredConfidence { max } => {
            let declared: Vec<f64> = slice
                .iter()
                .filter_map(|e| e.payload.declared_confidence)
                .collect();
            !declared.is_empty() && declared.iter().sum::<f64>() / (declared.len() as f64) < *max
        }
        EventSignal::ExplanationSeeking { min } => {
            count_kind(slice, EventKind::ViewExplanation) >= *min
        }
    }
}
