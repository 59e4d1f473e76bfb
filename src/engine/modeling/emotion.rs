use crate::engine::config::EstimatorParams;
use crate::engine::modeling::cognitive_load::is_fluctuating;
use crate::engine::types::{EmotionalIndicators, EventKind, LearningEvent};

#[derive(Debug, Default)]
struct SliceCounts {
    long_dwell: usize,
    hints: usize,
    explanations: usize,
    pauses: usize,
    submits: usize,
    correct: usize,
    errors: usize,
    quick_correct: usize,
    fluctuating: usize,
}

fn count(slice: &[LearningEvent], params: &EstimatorParams) -> SliceCounts {
    let mut counts = SliceCounts::default();
    for event in slice {
        if event.payload.time_spent_ms > params.long_dwell_ms {
            counts.long_dwell += 1;
        }
        if is_fluctuating(event, params) {
            counts.fluctuating += 1;
        }
        match event.kind {
            EventKind::HintRequest => counts.hints += 1,
            EventKind::ViewExplanation => counts.explanations += 1,
            EventKind::Pause => counts.pauses += 1,
            EventKind::Submit => {
                counts.submits += 1;
                match event.payload.is_correct {
                    Some(true) => {
                        counts.correct += 1;
                        if event.payload.time_spent_ms < params.quick_submit_ms {
                            counts.quick_correct += 1;
                        }
                    }
                    Some(false) => counts.errors += 1,
                    None => {}
                }
            }
            EventKind::Start | EventKind::Resume => {}
        }
    }
    counts
}

/// Rule-weighted emotional indicators, each clamped to [0, 1] on its own.
pub fn compute(slice: &[LearningEvent], params: &EstimatorParams) -> EmotionalIndicators {
    let c = count(slice, params);
    let neutral = EmotionalIndicators::default();

    let frustration = neutral.frustration
        + params.frustration_per_long_dwell * c.long_dwell as f64
        + params.frustration_per_hint * c.hints as f64
        + params.frustration_per_error * c.errors as f64;

    let rule_confidence = params.confidence_base
        + params.confidence_per_quick_correct * c.quick_correct as f64
        - params.confidence_per_error * c.errors as f64;
    let declared: Vec<f64> = slice
        .iter()
        .filter_map(|e| e.payload.declared_confidence)
        .map(|v| v.clamp(0.0, 1.0))
        .collect();
    let confidence = if declared.is_empty() {
        rule_confidence
    } else {
        let declared_mean = declared.iter().sum::<f64>() / declared.len() as f64;
        (rule_confidence.clamp(0.0, 1.0) + declared_mean) / 2.0
    };

    let engagement = neutral.engagement
        + params.engagement_per_submit * c.submits as f64
        + params.engagement_per_explanation * c.explanations as f64
        - params.engagement_per_pause * c.pauses as f64
        - params.engagement_per_fluctuation * c.fluctuating as f64;

    let motivation = neutral.motivation + params.motivation_per_correct * c.correct as f64
        - params.motivation_per_error * c.errors as f64
        - params.motivation_per_pause * c.pauses as f64;

    EmotionalIndicators {
        frustration: frustration.clamp(0.0, 1.0),
        confidence: confidence.clamp(0.0, 1.0),
        engagement: engagement.clamp(0.0, 1.0),
        motivation: motivation.clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{EventInput, EventPayload};

    fn stamped(input: EventInput) -> LearningEvent {
        LearningEvent::from_input(input, 0)
    }

    #[test]
    fn long_dwell_and_hints_raise_frustration() {
        let params = EstimatorParams::default();
        let slice = vec![
            stamped(EventInput::submit("p1", false, 70_000)),
            stamped(EventInput::new(EventKind::HintRequest)),
        ];
        let emotion = compute(&slice, &params);
        // 0.2 long dwell + 0.1 hint + 0.1 error
        assert!((emotion.frustration - 0.4).abs() < 1e-9);
    }

    #[test]
    fn quick_correct_submits_build_confidence() {
        let params = EstimatorParams::default();
        let slice = vec![
            stamped(EventInput::submit("p1", true, 5_000)),
            stamped(EventInput::submit("p2", true, 6_000)),
        ];
        let emotion = compute(&slice, &params);
        assert!((emotion.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn indicators_stay_in_unit_range() {
        let params = EstimatorParams::default();
        let slice: Vec<_> = (0..20)
            .map(|i| {
                stamped(EventInput::submit(format!("p{i}"), false, 90_000).with_payload(
                    EventPayload {
                        time_spent_ms: 90_000,
                        is_correct: Some(false),
                        mouse_moves: 200,
                        ..Default::default()
                    },
                ))
            })
            .collect();
        let emotion = compute(&slice, &params);
        for value in [
            emotion.frustration,
            emotion.confidence,
            emotion.engagement,
            emotion.motivation,
        ] {
            assert!((0.0..=1.0).contains(&value));
        }
        assert_eq!(emotion.frustration, 1.0);
        assert_eq!(emotion.confidence, 0.0);
    }

    #[test]
    fn declared_confidence_is_blended() {
        let params = EstimatorParams::default();
        let slice = vec![stamped(EventInput::submit("p1", true, 30_000).with_payload(
            EventPayload {
                time_spent_ms: 30_000,
                is_correct: Some(true),
                declared_confidence: Some(0.9),
                ..Default::default()
            },
        ))];
        let emotion = compute(&slice, &params);
        assert!((emotion.confidence - 0.6).abs() < 1e-9);
    }
}
