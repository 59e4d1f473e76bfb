use crate::engine::config::EstimatorParams;
use crate::engine::error::EngineError;
use crate::engine::modeling::{cognitive_load, emotion, performance};
use crate::engine::types::{LearningEvent, StateSnapshot};

/// Derives a [`StateSnapshot`] from the recent event slice.
///
/// `estimate` is a pure function of `(slice, previous, now_ms)`: the same inputs
/// always produce the same snapshot. `previous` supplies fallbacks for metrics the
/// slice cannot inform (no submits) and the prior for per-topic mastery.
#[derive(Debug, Clone, Default)]
pub struct StateEstimator {
    params: EstimatorParams,
}

impl StateEstimator {
    pub fn new(params: EstimatorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }

    pub fn estimate(
        &self,
        slice: &[LearningEvent],
        previous: &StateSnapshot,
        now_ms: i64,
    ) -> Result<StateSnapshot, EngineError> {
        if slice.is_empty() {
            return Err(EngineError::MissingData);
        }

        Ok(StateSnapshot {
            timestamp: now_ms,
            cognitive_load: cognitive_load::compute(slice, &self.params),
            emotional: emotion::compute(slice, &self.params),
            performance: performance::compute(slice, &previous.performance, &self.params),
            topic_mastery: performance::topic_mastery(slice, &previous.topic_mastery, &self.params),
            trend: previous.trend,
            event_count: slice.len(),
        })
    }

    /// Like [`estimate`](Self::estimate), but an empty slice yields `previous`
    /// unchanged instead of an error.
    pub fn estimate_or_previous(
        &self,
        slice: &[LearningEvent],
        previous: &StateSnapshot,
        now_ms: i64,
    ) -> (StateSnapshot, bool) {
        match self.estimate(slice, previous, now_ms) {
            Ok(snapshot) => (snapshot, true),
            Err(err) => {
                tracing::debug!(error = %err, "reusing last known snapshot");
                (previous.clone(), false)
            }
        }
    }
}
