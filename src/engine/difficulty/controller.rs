use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::config::DifficultyParams;
use crate::engine::difficulty::matrix::{DifficultyMatrix, DifficultyMatrixEntry};
use crate::engine::error::EngineError;
use crate::engine::types::{Advisory, DifficultyRecommendation, Grade, Tier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyRequest {
    pub grade: Grade,
    pub tier: Tier,
    /// `None` until the learner has a graded submit.
    pub recent_accuracy: Option<f64>,
    pub recent_time_on_task_secs: Option<f64>,
    pub sample_size: u32,
    /// Learner-declared maximum cognitive load on the 1-10 scale.
    pub learner_ceiling: Option<f64>,
}

impl DifficultyRequest {
    pub fn new(grade: Grade, tier: Tier) -> Self {
        Self {
            grade,
            tier,
            recent_accuracy: None,
            recent_time_on_task_secs: None,
            sample_size: 0,
            learner_ceiling: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64, sample_size: u32) -> Self {
        self.recent_accuracy = Some(accuracy);
        self.sample_size = sample_size;
        self
    }

    pub fn with_time_on_task(mut self, secs: f64) -> Self {
        self.recent_time_on_task_secs = Some(secs);
        self
    }

    pub fn with_ceiling(mut self, ceiling: f64) -> Self {
        self.learner_ceiling = Some(ceiling);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjustment {
    Raise,
    Lower,
    Hold,
}

/// Maps (grade, tier, recent performance) to a bounded target difficulty.
pub struct DifficultyController {
    matrix: Arc<DifficultyMatrix>,
    params: DifficultyParams,
}

impl DifficultyController {
    pub fn new(matrix: Arc<DifficultyMatrix>, params: DifficultyParams) -> Self {
        Self { matrix, params }
    }

    pub fn matrix(&self) -> &DifficultyMatrix {
        &self.matrix
    }

    pub fn params(&self) -> &DifficultyParams {
        &self.params
    }

    pub fn entry(&self, grade: Grade, tier: Tier) -> Result<&DifficultyMatrixEntry, EngineError> {
        self.matrix.get(grade, tier)
    }

    /// Effective upper bound after the grade and learner ceilings, never below the tier floor.
    pub fn effective_max(&self, entry: &DifficultyMatrixEntry, learner_ceiling: Option<f64>) -> f64 {
        let grade_ceiling = self.params.ceilings.for_grade(entry.grade);
        let ceiling = learner_ceiling.map_or(grade_ceiling, |c| c.min(grade_ceiling));
        entry.max.min(ceiling).max(entry.min)
    }

    pub fn recommend(&self, request: &DifficultyRequest) -> Result<DifficultyRecommendation, EngineError> {
        let entry = self.matrix.get(request.grade, request.tier)?;
        let target = self.params.targets.for_tier(request.tier);
        let band = self.params.accuracy_band;
        let mut reasons = vec![format!(
            "{} {} base {:.1} in [{:.1}, {:.1}]",
            request.grade, request.tier, entry.base, entry.min, entry.max
        )];
        let mut advisories = Vec::new();
        let mut low_performance = false;

        let adjustment = match request.recent_accuracy {
            None => {
                reasons.push("no graded work yet, holding base".into());
                Adjustment::Hold
            }
            Some(accuracy) if accuracy > target + band => {
                let allocation = f64::from(entry.time_allocation_secs);
                match request.recent_time_on_task_secs {
                    Some(secs) if secs > allocation * self.params.slow_time_factor => {
                        reasons.push(format!(
                            "accuracy {accuracy:.2} above target {target:.2} but time on task {secs:.0}s exceeds {:.0}s, holding",
                            allocation * self.params.slow_time_factor
                        ));
                        Adjustment::Hold
                    }
                    _ => {
                        reasons.push(format!(
                            "accuracy {accuracy:.2} above target {target:.2}, raising by {:.1}",
                            self.params.step
                        ));
                        Adjustment::Raise
                    }
                }
            }
            Some(accuracy) if accuracy < target - band => {
                low_performance = true;
                if request.tier == Tier::Elite {
                    reasons.push(format!(
                        "accuracy {accuracy:.2} below target {target:.2}, elite floor held"
                    ));
                    Adjustment::Hold
                } else {
                    reasons.push(format!(
                        "accuracy {accuracy:.2} below target {target:.2}, lowering by {:.1}",
                        self.params.step
                    ));
                    Adjustment::Lower
                }
            }
            Some(accuracy) => {
                reasons.push(format!("accuracy {accuracy:.2} within target band"));
                Adjustment::Hold
            }
        };

        let mut value = match adjustment {
            Adjustment::Raise => entry.base + self.params.step,
            Adjustment::Lower => entry.base - self.params.step,
            Adjustment::Hold => entry.base,
        };

        let max = self.effective_max(entry, request.learner_ceiling);
        let grade_ceiling = self.params.ceilings.for_grade(entry.grade);
        let ceiling = request
            .learner_ceiling
            .map_or(grade_ceiling, |c| c.min(grade_ceiling));
        if ceiling < entry.min {
            advisories.push(Advisory::CeilingBelowTierFloor);
            reasons.push(format!(
                "cognitive ceiling {ceiling:.1} below tier floor {:.1}, floor kept",
                entry.min
            ));
        } else if max < entry.max {
            reasons.push(format!("capped by cognitive ceiling {max:.1}"));
        }

        value = value.clamp(entry.min, max);
        value = ((value * 10.0).round() / 10.0).clamp(entry.min, max);

        if request.grade == Grade::Fourth && request.tier == Tier::Elite {
            advisories.push(Advisory::NotRecommended);
            reasons.push("elite tier is not recommended for 4th grade".into());
        }
        if request.recent_accuracy.is_some()
            && request.sample_size < self.params.min_samples_for_confidence
        {
            advisories.push(Advisory::LowConfidence);
            reasons.push(format!("only {} graded submits", request.sample_size));
        }

        tracing::debug!(
            grade = %request.grade,
            tier = %request.tier,
            difficulty = value,
            "difficulty recommended"
        );

        Ok(DifficultyRecommendation {
            grade: request.grade,
            tier: request.tier,
            value,
            min: entry.min,
            max,
            reasoning: reasons.join("; "),
            time_allocation_secs: entry.time_allocation_secs,
            advisories,
            low_performance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> DifficultyController {
        DifficultyController::new(
            Arc::new(DifficultyMatrix::builtin().unwrap()),
            DifficultyParams::default(),
        )
    }

    #[test]
    fn sixth_grade_elite_high_accuracy_lands_between_nine_and_ten() {
        let rec = controller()
            .recommend(&DifficultyRequest::new(Grade::Sixth, Tier::Elite).with_accuracy(0.9, 10))
            .unwrap();
        assert!((9.0..=10.0).contains(&rec.value), "got {}", rec.value);
        assert!(rec.advisories.is_empty());
    }

    #[test]
    fn fourth_grade_elite_is_flagged_and_capped() {
        let rec = controller()
            .recommend(&DifficultyRequest::new(Grade::Fourth, Tier::Elite).with_accuracy(0.99, 10))
            .unwrap();
        assert!(rec.has_advisory(Advisory::NotRecommended));
        assert!(rec.value <= 8.5);
        assert!(rec.value >= 8.0);
        assert_eq!(rec.max, 8.5);
    }

    #[test]
    fn elite_never_drops_on_low_accuracy() {
        let rec = controller()
            .recommend(&DifficultyRequest::new(Grade::Fifth, Tier::Elite).with_accuracy(0.1, 10))
            .unwrap();
        assert_eq!(rec.value, 8.5);
        assert!(rec.low_performance);
    }

    #[test]
    fn standard_drops_on_low_accuracy() {
        let rec = controller()
            .recommend(&DifficultyRequest::new(Grade::Fifth, Tier::Standard).with_accuracy(0.3, 10))
            .unwrap();
        assert_eq!(rec.value, 4.0);
        assert!(rec.low_performance);
    }

    #[test]
    fn slow_learner_is_not_raised() {
        let rec = controller()
            .recommend(
                &DifficultyRequest::new(Grade::Fifth, Tier::Standard)
                    .with_accuracy(0.95, 10)
                    .with_time_on_task(400.0),
            )
            .unwrap();
        assert_eq!(rec.value, 4.5);
        assert!(rec.reasoning.contains("holding"));
    }

    #[test]
    fn few_samples_add_low_confidence() {
        let rec = controller()
            .recommend(&DifficultyRequest::new(Grade::Sixth, Tier::Basic).with_accuracy(1.0, 2))
            .unwrap();
        assert!(rec.has_advisory(Advisory::LowConfidence));
        assert_eq!(rec.value, 4.0);
    }

    #[test]
    fn learner_ceiling_below_floor_keeps_floor() {
        let rec = controller()
            .recommend(&DifficultyRequest::new(Grade::Sixth, Tier::Elite).with_ceiling(6.0))
            .unwrap();
        assert_eq!(rec.value, 8.0);
        assert!(rec.has_advisory(Advisory::CeilingBelowTierFloor));
    }
}
