use std::collections::BTreeMap;

use crate::engine::config::EstimatorParams;
use crate::engine::types::{EventKind, LearningEvent, PerformanceMetrics};

const MASTERY_PRIOR: f64 = 0.5;

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Performance metrics from the submit events of a slice. Metrics that need at
/// least one submit fall back to `previous` when the slice has none.
pub fn compute(
    slice: &[LearningEvent],
    previous: &PerformanceMetrics,
    params: &EstimatorParams,
) -> PerformanceMetrics {
    let submits: Vec<&LearningEvent> = slice.iter().filter(|e| e.is_submit()).collect();
    if submits.is_empty() {
        return previous.clone();
    }

    let graded: Vec<bool> = submits.iter().filter_map(|e| e.payload.is_correct).collect();
    let accuracy = if graded.is_empty() {
        previous.accuracy
    } else {
        graded.iter().filter(|c| **c).count() as f64 / graded.len() as f64
    };

    let times: Vec<f64> = submits
        .iter()
        .map(|e| e.payload.time_spent_ms.max(0) as f64)
        .collect();
    let mean_time = times.iter().sum::<f64>() / times.len() as f64;
    let speed = (1.0 - mean_time / params.speed_reference_ms.max(1.0)).clamp(0.0, 1.0);

    let hints = slice
        .iter()
        .filter(|e| e.kind == EventKind::HintRequest)
        .count() as f64;
    let efficiency = (accuracy / (1.0 + hints / submits.len() as f64)).clamp(0.0, 1.0);

    let consistency = if mean_time <= 0.0 {
        1.0
    } else {
        (1.0 - variance(&times) / mean_time.powi(2)).max(0.0)
    };

    PerformanceMetrics {
        accuracy,
        speed,
        efficiency,
        consistency,
        graded_submits: graded.len() as u32,
    }
}

/// Blends the slice's per-topic accuracy into the previous mastery map. Topics
/// absent from the slice keep their previous value.
pub fn topic_mastery(
    slice: &[LearningEvent],
    previous: &BTreeMap<String, f64>,
    params: &EstimatorParams,
) -> BTreeMap<String, f64> {
    let mut per_topic: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    for event in slice.iter().filter(|e| e.is_submit()) {
        let (Some(topic), Some(correct)) = (event.payload.topic.as_deref(), event.payload.is_correct)
        else {
            continue;
        };
        let entry = per_topic.entry(topic).or_insert((0, 0));
        entry.1 += 1;
        if correct {
            entry.0 += 1;
        }
    }

    let blend = params.mastery_blend.clamp(0.0, 1.0);
    let mut mastery = previous.clone();
    for (topic, (correct, total)) in per_topic {
        let observed = correct as f64 / total as f64;
        let prior = previous.get(topic).copied().unwrap_or(MASTERY_PRIOR);
        mastery.insert(
            topic.to_string(),
            (prior * (1.0 - blend) + observed * blend).clamp(0.0, 1.0),
        );
    }
    mastery
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{EventInput, EventPayload};

    fn submit(correct: bool, ms: i64, topic: &str) -> LearningEvent {
        LearningEvent::from_input(
            EventInput::submit("p", correct, ms).with_payload(EventPayload {
                time_spent_ms: ms,
                is_correct: Some(correct),
                topic: Some(topic.to_string()),
                ..Default::default()
            }),
            0,
        )
    }

    #[test]
    fn accuracy_and_consistency_from_submits() {
        let params = EstimatorParams::default();
        let slice = vec![
            submit(true, 10_000, "fractions"),
            submit(false, 10_000, "fractions"),
            submit(true, 10_000, "fractions"),
            submit(true, 10_000, "fractions"),
        ];
        let metrics = compute(&slice, &PerformanceMetrics::default(), &params);
        assert!((metrics.accuracy - 0.75).abs() < 1e-9);
        assert_eq!(metrics.consistency, 1.0);
        assert_eq!(metrics.graded_submits, 4);
    }

    #[test]
    fn consistency_is_floored_at_zero() {
        let params = EstimatorParams::default();
        let slice = vec![submit(true, 1, "a"), submit(true, 100_000, "a")];
        let metrics = compute(&slice, &PerformanceMetrics::default(), &params);
        // two far-apart times leave almost no consistency
        assert!(metrics.consistency >= 0.0);
        assert!(metrics.consistency < 0.01);
    }

    #[test]
    fn no_submits_keeps_previous() {
        let params = EstimatorParams::default();
        let previous = PerformanceMetrics {
            accuracy: 0.9,
            ..Default::default()
        };
        let slice = vec![LearningEvent::from_input(
            EventInput::new(EventKind::Pause),
            0,
        )];
        assert_eq!(compute(&slice, &previous, &params), previous);
    }

    #[test]
    fn mastery_blends_with_prior() {
        let params = EstimatorParams::default();
        let mut previous = BTreeMap::new();
        previous.insert("decimals".to_string(), 0.2);
        let slice = vec![submit(true, 5_000, "fractions"), submit(true, 5_000, "decimals")];
        let mastery = topic_mastery(&slice, &previous, &params);
        assert!((mastery["fractions"] - 0.75).abs() < 1e-9);
        assert!((mastery["decimals"] - 0.6).abs() < 1e-9);
    }
}
