use crate::engine::config::EstimatorParams;
use crate::engine::types::{CognitiveLoad, LearningEvent};

pub(crate) fn is_fluctuating(event: &LearningEvent, params: &EstimatorParams) -> bool {
    event.payload.mouse_moves > params.mouse_move_threshold
        || event.payload.keystrokes > params.keystroke_threshold
}

/// Cognitive-load indicators over a non-empty slice.
pub fn compute(slice: &[LearningEvent], params: &EstimatorParams) -> CognitiveLoad {
    if slice.is_empty() {
        return CognitiveLoad::default();
    }
    let n = slice.len() as f64;

    let processing_time_ms =
        slice.iter().map(|e| e.payload.time_spent_ms.max(0) as f64).sum::<f64>() / n;
    let processing_time_ratio = processing_time_ms / params.processing_time_reference_ms.max(1.0);

    let hesitation_rate = slice.iter().map(|e| e.payload.hesitations as f64).sum::<f64>() / n;

    let attention_fluctuation =
        slice.iter().filter(|e| is_fluctuating(e, params)).count() as f64 / n;

    let graded: Vec<bool> = slice
        .iter()
        .filter(|e| e.is_submit())
        .filter_map(|e| e.payload.is_correct)
        .collect();
    let error_frequency = if graded.is_empty() {
        0.0
    } else {
        graded.iter().filter(|c| !**c).count() as f64 / graded.len() as f64
    };

    let revision_count = slice.iter().map(|e| e.payload.revisions as f64).sum::<f64>();

    let fatigue = (params.fatigue_processing_weight * processing_time_ratio
        + params.fatigue_hesitation_weight * hesitation_rate
        + params.fatigue_attention_weight * attention_fluctuation)
        .clamp(0.0, 1.0);

    CognitiveLoad {
        processing_time_ms,
        processing_time_ratio,
        hesitation_rate,
        error_frequency,
        revision_count,
        attention_fluctuation,
        fatigue,
    }
}
