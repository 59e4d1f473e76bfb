use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::config::PathParams;
use crate::engine::difficulty::{DifficultyController, DifficultyRequest};
use crate::engine::error::EngineError;
use crate::engine::selector::{ProblemSelector, SelectionRequest, ServedRecency};
use crate::engine::types::{Grade, LearnerProfile, Tier};

const CANDIDATES_PER_STEP: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPhase {
    Foundation,
    Development,
    Mastery,
    Application,
    ExamPrep,
}

impl PlanPhase {
    pub fn all() -> &'static [PlanPhase] {
        &[
            PlanPhase::Foundation,
            PlanPhase::Development,
            PlanPhase::Mastery,
            PlanPhase::Application,
            PlanPhase::ExamPrep,
        ]
    }

    /// Share of the total planned duration.
    pub fn proportion(self) -> f64 {
        match self {
            Self::Foundation => 0.25,
            Self::Development => 0.35,
            Self::Mastery => 0.25,
            Self::Application => 0.10,
            Self::ExamPrep => 0.05,
        }
    }

    /// Difficulty offset from the matrix base at the start of the phase.
    fn offset(self) -> f64 {
        match self {
            Self::Foundation => -1.5,
            Self::Development => -0.5,
            Self::Mastery => 0.0,
            Self::Application => 0.5,
            Self::ExamPrep => 0.5,
        }
    }

    fn min_accuracy(self) -> f64 {
        match self {
            Self::Foundation => 0.70,
            Self::Development => 0.75,
            Self::Mastery | Self::Application => 0.80,
            Self::ExamPrep => 0.85,
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            Self::Foundation => Some(Self::Development),
            Self::Development => Some(Self::Mastery),
            Self::Mastery => Some(Self::Application),
            Self::Application => Some(Self::ExamPrep),
            Self::ExamPrep => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foundation => "foundation",
            Self::Development => "development",
            Self::Mastery => "mastery",
            Self::Application => "application",
            Self::ExamPrep => "exam_prep",
        }
    }
}

impl fmt::Display for PlanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl StepStatus {
    pub fn is_done(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Practice,
    Remediation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessCriteria {
    pub min_accuracy: f64,
    pub max_time_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub accuracy: f64,
    pub time_spent_secs: u32,
    pub completed_at: i64,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPathStep {
    pub id: String,
    pub phase: PlanPhase,
    pub kind: StepKind,
    pub estimated_difficulty: f64,
    pub time_budget_minutes: f64,
    pub prerequisites: Vec<String>,
    pub success_criteria: SuccessCriteria,
    pub candidate_problem_ids: Vec<String>,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPlan {
    pub learner_id: String,
    pub grade: Grade,
    pub tier: Tier,
    pub subject: String,
    pub total_minutes: f64,
    pub difficulty_floor: f64,
    pub difficulty_ceiling: f64,
    pub steps: Vec<LearningPathStep>,
    pub created_at: i64,
    pub revision: u32,
}

impl LearningPlan {
    /// Checks ids are unique, prerequisites point strictly backwards and
    /// difficulties sit inside the plan bounds.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.steps.is_empty() {
            return Err(EngineError::InvalidPlan("plan has no steps".into()));
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for step in &self.steps {
            for prereq in &step.prerequisites {
                if !seen.contains(prereq.as_str()) {
                    return Err(EngineError::InvalidPlan(format!(
                        "step {} depends on {prereq}, which is not an earlier step",
                        step.id
                    )));
                }
            }
            if !seen.insert(step.id.as_str()) {
                return Err(EngineError::InvalidPlan(format!("duplicate step id {}", step.id)));
            }
            if step.estimated_difficulty < self.difficulty_floor - 1e-9
                || step.estimated_difficulty > self.difficulty_ceiling + 1e-9
            {
                return Err(EngineError::InvalidPlan(format!(
                    "step {} difficulty {} outside [{}, {}]",
                    step.id, step.estimated_difficulty, self.difficulty_floor, self.difficulty_ceiling
                )));
            }
        }
        Ok(())
    }

    pub fn step(&self, id: &str) -> Option<&LearningPathStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    fn index_of(&self, id: &str) -> Result<usize, EngineError> {
        self.steps
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| EngineError::InvalidPlan(format!("unknown step {id}")))
    }

    /// First step that is neither completed nor skipped.
    pub fn current_step(&self) -> Option<&LearningPathStep> {
        self.steps.iter().find(|s| !s.status.is_done())
    }

    fn check_ready(&self, index: usize) -> Result<(), EngineError> {
        let step = &self.steps[index];
        if step.status.is_done() {
            return Err(EngineError::InvalidPlan(format!("step {} is already finished", step.id)));
        }
        for prereq in &step.prerequisites {
            let done = self.step(prereq).map(|s| s.status.is_done()).unwrap_or(false);
            if !done {
                return Err(EngineError::InvalidPlan(format!(
                    "step {} waits on unfinished prerequisite {prereq}",
                    step.id
                )));
            }
        }
        Ok(())
    }

    pub fn start_step(&mut self, id: &str) -> Result<(), EngineError> {
        let index = self.index_of(id)?;
        self.check_ready(index)?;
        self.steps[index].status = StepStatus::InProgress;
        Ok(())
    }

    pub fn complete_step(
        &mut self,
        id: &str,
        accuracy: f64,
        time_spent_secs: u32,
        now_ms: i64,
    ) -> Result<&LearningPathStep, EngineError> {
        let index = self.index_of(id)?;
        self.check_ready(index)?;
        let step = &mut self.steps[index];
        let accuracy = accuracy.clamp(0.0, 1.0);
        let passed = accuracy >= step.success_criteria.min_accuracy
            && time_spent_secs <= step.success_criteria.max_time_secs;
        step.status = StepStatus::Completed;
        step.result = Some(StepResult {
            accuracy,
            time_spent_secs,
            completed_at: now_ms,
            passed,
        });
        Ok(&self.steps[index])
    }

    /// Mean accuracy over the last `window` completed steps.
    pub fn windowed_accuracy(&self, window: usize) -> Option<f64> {
        let recent: Vec<f64> = self
            .steps
            .iter()
            .rev()
            .filter_map(|s| s.result.as_ref().map(|r| r.accuracy))
            .take(window.max(1))
            .collect();
        if recent.is_empty() {
            None
        } else {
            Some(recent.iter().sum::<f64>() / recent.len() as f64)
        }
    }

    fn clamp_difficulty(&self, value: f64) -> f64 {
        ((value * 10.0).round() / 10.0).clamp(self.difficulty_floor, self.difficulty_ceiling)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplanOutcome {
    Unchanged,
    Remediated {
        inserted_step_id: String,
        lowered_steps: usize,
    },
    Accelerated {
        skipped_step_id: Option<String>,
        raised_steps: usize,
    },
}

/// Builds and revises phase-ordered learning plans.
pub struct PathOrchestrator {
    controller: Arc<DifficultyController>,
    selector: Arc<ProblemSelector>,
    params: PathParams,
}

impl PathOrchestrator {
    pub fn new(
        controller: Arc<DifficultyController>,
        selector: Arc<ProblemSelector>,
        params: PathParams,
    ) -> Self {
        Self {
            controller,
            selector,
            params,
        }
    }

    fn steps_in_phase(&self, phase_minutes: f64) -> usize {
        let steps = (phase_minutes / self.params.step_minutes).ceil() as usize;
        steps.clamp(1, self.params.max_steps_per_phase.max(1))
    }

    pub async fn build(&self, profile: &LearnerProfile, now_ms: i64) -> Result<LearningPlan, EngineError> {
        profile.validate()?;
        let total_minutes = profile.time_constraints.total_minutes();
        let subject = profile.primary_subject().to_string();
        let ceiling = profile.traits.max_cognitive_load;

        let entry = self.controller.entry(profile.grade, profile.tier)?;
        let floor = entry.min;
        let max = self.controller.effective_max(entry, ceiling);

        let mut plan = LearningPlan {
            learner_id: profile.learner_id.clone(),
            grade: profile.grade,
            tier: profile.tier,
            subject: subject.clone(),
            total_minutes,
            difficulty_floor: floor,
            difficulty_ceiling: max,
            steps: Vec::new(),
            created_at: now_ms,
            revision: 0,
        };
        let mut used_ids: Vec<String> = Vec::new();

        for &phase in PlanPhase::all() {
            let phase_minutes = total_minutes * phase.proportion();
            let count = self.steps_in_phase(phase_minutes);
            let next_offset = phase.next().map_or(phase.offset(), |p| p.offset());

            for i in 0..count {
                let mut request = DifficultyRequest::new(profile.grade, profile.tier);
                request.learner_ceiling = ceiling;
                let rec = self.controller.recommend(&request)?;

                let ramp = (next_offset - phase.offset()) * i as f64 / count as f64;
                let target = plan.clamp_difficulty(rec.value + phase.offset() + ramp);

                let candidate_problem_ids = self
                    .candidates(profile, &subject, target, &used_ids)
                    .await?;
                used_ids.extend(candidate_problem_ids.iter().cloned());

                let prerequisites = plan.steps.last().map(|s| vec![s.id.clone()]).unwrap_or_default();
                plan.steps.push(LearningPathStep {
                    id: format!("{}-{}", phase.as_str(), i + 1),
                    phase,
                    kind: StepKind::Practice,
                    estimated_difficulty: target,
                    time_budget_minutes: phase_minutes / count as f64,
                    prerequisites,
                    success_criteria: SuccessCriteria {
                        min_accuracy: phase.min_accuracy(),
                        max_time_secs: rec.time_allocation_secs,
                    },
                    candidate_problem_ids,
                    status: StepStatus::Pending,
                    result: None,
                });
            }
        }

        plan.validate()?;
        tracing::info!(
            learner_id = %plan.learner_id,
            steps = plan.steps.len(),
            total_minutes,
            "learning plan built"
        );
        Ok(plan)
    }

    async fn candidates(
        &self,
        profile: &LearnerProfile,
        subject: &str,
        target: f64,
        exclude: &[String],
    ) -> Result<Vec<String>, EngineError> {
        let request = SelectionRequest {
            grade: profile.grade,
            tier: profile.tier,
            subject: subject.to_string(),
            target,
            exclude_ids: exclude.to_vec(),
            limit: CANDIDATES_PER_STEP,
        };
        match self.selector.select(&request, &ServedRecency::default()).await {
            Ok(problems) => Ok(problems.into_iter().map(|p| p.id).collect()),
            Err(EngineError::NoAvailableContent { reason }) => {
                tracing::warn!(target_difficulty = target, %reason, "plan step has no candidates");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Revises pending steps from recent accuracy. Completed, skipped and
    /// in-progress steps are left untouched.
    pub async fn replan(
        &self,
        plan: &mut LearningPlan,
        recent_accuracy: &[f64],
    ) -> Result<ReplanOutcome, EngineError> {
        if recent_accuracy.is_empty() {
            return Ok(ReplanOutcome::Unchanged);
        }
        let accuracy = recent_accuracy.iter().sum::<f64>() / recent_accuracy.len() as f64;
        let Some(first_pending) = plan.steps.iter().position(|s| s.status == StepStatus::Pending) else {
            return Ok(ReplanOutcome::Unchanged);
        };

        let outcome = if accuracy < self.params.remediation_threshold {
            self.remediate(plan, first_pending).await?
        } else if accuracy > self.params.acceleration_threshold {
            self.accelerate(plan, first_pending)
        } else {
            ReplanOutcome::Unchanged
        };

        if outcome != ReplanOutcome::Unchanged {
            plan.revision += 1;
            plan.validate()?;
            tracing::info!(
                learner_id = %plan.learner_id,
                accuracy,
                revision = plan.revision,
                ?outcome,
                "learning plan revised"
            );
        }
        Ok(outcome)
    }

    async fn remediate(
        &self,
        plan: &mut LearningPlan,
        first_pending: usize,
    ) -> Result<ReplanOutcome, EngineError> {
        let step = self.params.replan_step;
        let mut lowered = 0;
        for index in first_pending..plan.steps.len() {
            if plan.steps[index].status != StepStatus::Pending {
                continue;
            }
            let lowered_value = plan.clamp_difficulty(plan.steps[index].estimated_difficulty - step);
            if lowered_value < plan.steps[index].estimated_difficulty {
                lowered += 1;
            }
            plan.steps[index].estimated_difficulty = lowered_value;
        }

        let anchor = &plan.steps[first_pending];
        let phase = anchor.phase;
        let target = plan.clamp_difficulty(anchor.estimated_difficulty - step);
        let id = format!("remediation-{}-{}", plan.revision + 1, first_pending + 1);
        let prerequisites = if first_pending > 0 {
            vec![plan.steps[first_pending - 1].id.clone()]
        } else {
            Vec::new()
        };

        let exclude: Vec<String> = plan
            .steps
            .iter()
            .flat_map(|s| s.candidate_problem_ids.iter().cloned())
            .collect();
        let request = SelectionRequest {
            grade: plan.grade,
            tier: plan.tier,
            subject: plan.subject.clone(),
            target,
            exclude_ids: exclude,
            limit: CANDIDATES_PER_STEP,
        };
        let candidate_problem_ids = match self
            .selector
            .select(&request, &ServedRecency::default())
            .await
        {
            Ok(problems) => problems.into_iter().map(|p| p.id).collect(),
            Err(EngineError::NoAvailableContent { reason }) => {
                tracing::warn!(%reason, "remediation step has no candidates");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let max_time_secs = anchor.success_criteria.max_time_secs;
        let remediation = LearningPathStep {
            id: id.clone(),
            phase,
            kind: StepKind::Remediation,
            estimated_difficulty: target,
            time_budget_minutes: self.params.step_minutes,
            prerequisites,
            success_criteria: SuccessCriteria {
                min_accuracy: self.params.remediation_threshold,
                max_time_secs,
            },
            candidate_problem_ids,
            status: StepStatus::Pending,
            result: None,
        };
        plan.steps.insert(first_pending, remediation);
        plan.steps[first_pending + 1].prerequisites.push(id.clone());

        Ok(ReplanOutcome::Remediated {
            inserted_step_id: id,
            lowered_steps: lowered,
        })
    }

    fn accelerate(&self, plan: &mut LearningPlan, first_pending: usize) -> ReplanOutcome {
        let step = self.params.replan_step;
        let mut raised = 0;
        for index in first_pending..plan.steps.len() {
            if plan.steps[index].status != StepStatus::Pending {
                continue;
            }
            let raised_value = plan.clamp_difficulty(plan.steps[index].estimated_difficulty + step);
            if raised_value > plan.steps[index].estimated_difficulty {
                raised += 1;
            }
            plan.steps[index].estimated_difficulty = raised_value;
        }

        // skip the next practice step when its phase still has another pending step after it
        let phase = plan.steps[first_pending].phase;
        let more_in_phase = plan.steps[first_pending + 1..]
            .iter()
            .any(|s| s.phase == phase && s.status == StepStatus::Pending);
        let skipped_step_id = if more_in_phase && plan.steps[first_pending].kind == StepKind::Practice {
            plan.steps[first_pending].status = StepStatus::Skipped;
            Some(plan.steps[first_pending].id.clone())
        } else {
            None
        };

        if raised == 0 && skipped_step_id.is_none() {
            return ReplanOutcome::Unchanged;
        }
        ReplanOutcome::Accelerated {
            skipped_step_id,
            raised_steps: raised,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::{DifficultyParams, SelectorParams};
    use crate::engine::difficulty::DifficultyMatrix;
    use crate::engine::selector::InMemoryProblemRepository;
    use crate::engine::types::ProblemDescriptor;

    fn orchestrator(problems: Vec<ProblemDescriptor>) -> PathOrchestrator {
        let matrix = Arc::new(DifficultyMatrix::builtin().unwrap());
        let controller = Arc::new(DifficultyController::new(matrix.clone(), DifficultyParams::default()));
        let selector = Arc::new(ProblemSelector::new(
            Arc::new(InMemoryProblemRepository::new(problems)),
            matrix,
            SelectorParams::default(),
        ));
        PathOrchestrator::new(controller, selector, PathParams::default())
    }

    fn bank() -> Vec<ProblemDescriptor> {
        (10..=100)
            .flat_map(|d| {
                (0..10).map(move |k| ProblemDescriptor {
                    id: format!("p{d}-{k}"),
                    difficulty: d as f64 / 10.0,
                    topic: "fractions".into(),
                    subtopic: None,
                    expected_time_secs: 120,
                    required_skills: vec![],
                })
            })
            .collect()
    }

    fn profile() -> LearnerProfile {
        let mut p = LearnerProfile::new("learner-1", Grade::Fifth, Tier::Standard);
        p.time_constraints.session_minutes = 30.0;
        p.time_constraints.days_per_week = 2;
        p.time_constraints.weeks_available = 8;
        p
    }

    #[tokio::test]
    async fn build_rejects_profile_without_weeks() {
        let mut p = profile();
        p.time_constraints.weeks_available = 0;
        let err = orchestrator(bank()).build(&p, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidProfile(_)));
    }

    #[tokio::test]
    async fn build_follows_phase_order_and_proportions() {
        let plan = orchestrator(bank()).build(&profile(), 0).await.unwrap();
        plan.validate().unwrap();

        let phases: Vec<PlanPhase> = plan.steps.iter().map(|s| s.phase).collect();
        let mut sorted = phases.clone();
        sorted.sort_by_key(|p| PlanPhase::all().iter().position(|x| x == p));
        assert_eq!(phases, sorted);

        let minutes: f64 = plan
            .steps
            .iter()
            .filter(|s| s.phase == PlanPhase::Development)
            .map(|s| s.time_budget_minutes)
            .sum();
        assert!((minutes - 480.0 * 0.35).abs() < 1e-6);
        assert!(plan.steps.iter().all(|s| !s.candidate_problem_ids.is_empty()));
    }

    #[tokio::test]
    async fn empty_bank_still_builds_plan() {
        let plan = orchestrator(vec![]).build(&profile(), 0).await.unwrap();
        assert!(plan.steps.iter().all(|s| s.candidate_problem_ids.is_empty()));
    }

    #[tokio::test]
    async fn low_accuracy_inserts_remediation_before_pending() {
        let orchestrator = orchestrator(bank());
        let mut plan = orchestrator.build(&profile(), 0).await.unwrap();
        plan.complete_step("foundation-1", 0.4, 100, 1_000).unwrap();
        let completed = plan.steps[0].clone();
        let before = plan.steps[1].estimated_difficulty;

        let outcome = orchestrator.replan(&mut plan, &[0.4, 0.5]).await.unwrap();
        let ReplanOutcome::Remediated { inserted_step_id, .. } = outcome else {
            panic!("expected remediation, got {outcome:?}");
        };
        assert_eq!(plan.steps[0], completed);
        assert_eq!(plan.steps[1].id, inserted_step_id);
        assert_eq!(plan.steps[1].kind, StepKind::Remediation);
        assert!(plan.steps[2].estimated_difficulty <= before);
        assert!(plan.steps[2].prerequisites.contains(&inserted_step_id));
        assert_eq!(plan.revision, 1);
        plan.validate().unwrap();
    }

    #[tokio::test]
    async fn high_accuracy_raises_and_skips_ahead() {
        let orchestrator = orchestrator(bank());
        let mut plan = orchestrator.build(&profile(), 0).await.unwrap();
        plan.complete_step("foundation-1", 1.0, 100, 1_000).unwrap();

        let outcome = orchestrator.replan(&mut plan, &[0.95, 1.0]).await.unwrap();
        match outcome {
            ReplanOutcome::Accelerated { skipped_step_id, .. } => {
                assert_eq!(skipped_step_id.as_deref(), Some("foundation-2"));
            }
            other => panic!("expected acceleration, got {other:?}"),
        }
        assert_eq!(plan.steps[0].status, StepStatus::Completed);
        assert_eq!(plan.current_step().map(|s| s.id.as_str()), Some("foundation-3"));
    }

    #[tokio::test]
    async fn mid_range_accuracy_leaves_plan_alone() {
        let orchestrator = orchestrator(bank());
        let mut plan = orchestrator.build(&profile(), 0).await.unwrap();
        let before = plan.clone();
        let outcome = orchestrator.replan(&mut plan, &[0.75]).await.unwrap();
        assert_eq!(outcome, ReplanOutcome::Unchanged);
        assert_eq!(plan, before);
    }

    #[test]
    fn forward_prerequisite_is_rejected() {
        let mut plan = LearningPlan {
            learner_id: "l".into(),
            grade: Grade::Fifth,
            tier: Tier::Standard,
            subject: "math".into(),
            total_minutes: 60.0,
            difficulty_floor: 3.5,
            difficulty_ceiling: 6.0,
            steps: Vec::new(),
            created_at: 0,
            revision: 0,
        };
        let step = |id: &str, prereqs: Vec<String>| LearningPathStep {
            id: id.to_string(),
            phase: PlanPhase::Foundation,
            kind: StepKind::Practice,
            estimated_difficulty: 4.0,
            time_budget_minutes: 30.0,
            prerequisites: prereqs,
            success_criteria: SuccessCriteria {
                min_accuracy: 0.7,
                max_time_secs: 180,
            },
            candidate_problem_ids: vec![],
            status: StepStatus::Pending,
            result: None,
        };
        plan.steps.push(step("a", vec!["b".into()]));
        plan.steps.push(step("b", vec![]));
        assert!(matches!(plan.validate(), Err(EngineError::InvalidPlan(_))));
    }

    #[tokio::test]
    async fn steps_cannot_start_before_prerequisites() {
        let mut plan = orchestrator(bank()).build(&profile(), 0).await.unwrap();
        assert!(plan.start_step("foundation-2").is_err());
        plan.start_step("foundation-1").unwrap();
        plan.complete_step("foundation-1", 0.9, 60, 10).unwrap();
        assert!(plan.step("foundation-1").unwrap().result.as_ref().unwrap().passed);
        assert!(plan.complete_step("foundation-1", 0.9, 60, 20).is_err());
    }
}
