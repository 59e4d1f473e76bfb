use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::audit::{collect_records, AuditRecord};
use crate::engine::buffer::EventBuffer;
use crate::engine::clock::Clock;
use crate::engine::config::EngineConfig;
use crate::engine::difficulty::{DifficultyController, DifficultyMatrix, DifficultyRequest};
use crate::engine::error::EngineError;
use crate::engine::intervention::{InterventionContext, InterventionExecutor, PhaseChange, SessionPhase};
use crate::engine::modeling::{StateEstimator, TrendAnalyzer};
use crate::engine::path::PathOrchestrator;
use crate::engine::patterns::{MatchContext, PatternCatalog, PatternMatch, PatternRecognizer};
use crate::engine::prediction::{ErrorPredictor, PredictionInput};
use crate::engine::selector::{ProblemRepository, ProblemSelector, SelectionRequest, ServedRecency};
use crate::engine::sink::{EngineEvent, EngineEventSink};
use crate::engine::types::{
    Advisory, DifficultyRecommendation, ErrorPrediction, EventInput, Intervention, LearnerProfile,
    LearningEvent, ProblemDescriptor, StateSnapshot, Tier,
};

/// Shared, constructed collaborators for every session of one engine.
#[derive(Clone)]
pub struct EngineServices {
    pub config: Arc<EngineConfig>,
    pub patterns: Arc<PatternCatalog>,
    pub estimator: Arc<StateEstimator>,
    pub recognizer: Arc<PatternRecognizer>,
    pub controller: Arc<DifficultyController>,
    pub selector: Arc<ProblemSelector>,
    pub clock: Arc<dyn Clock>,
    pub sink: Arc<dyn EngineEventSink>,
}

impl EngineServices {
    pub fn new(
        config: EngineConfig,
        patterns: Arc<PatternCatalog>,
        matrix: Arc<DifficultyMatrix>,
        repository: Arc<dyn ProblemRepository>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EngineEventSink>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let estimator = Arc::new(StateEstimator::new(config.estimator.clone()));
        let recognizer = Arc::new(PatternRecognizer::new(
            patterns.clone(),
            config.recognition.clone(),
            config.estimator.clone(),
        ));
        let controller = Arc::new(DifficultyController::new(
            matrix.clone(),
            config.difficulty.clone(),
        ));
        let selector = Arc::new(ProblemSelector::new(
            repository,
            matrix,
            config.selector.clone(),
        ));
        Ok(Self {
            config: Arc::new(config),
            patterns,
            estimator,
            recognizer,
            controller,
            selector,
            clock,
            sink,
        })
    }

    /// Validates the profile and wraps a fresh session in a handle.
    pub fn open_session(&self, profile: LearnerProfile) -> Result<SessionHandle, EngineError> {
        Ok(SessionHandle::new(LearningSession::new(profile, self.clone())?))
    }

    pub fn path_orchestrator(&self) -> PathOrchestrator {
        PathOrchestrator::new(
            self.controller.clone(),
            self.selector.clone(),
            self.config.path.clone(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub cycle: u64,
    pub timestamp: i64,
    pub snapshot: StateSnapshot,
    /// False when the analysis window was empty and the last snapshot was reused.
    pub fresh_snapshot: bool,
    pub matches: Vec<PatternMatch>,
    pub predictions: Vec<ErrorPrediction>,
    pub recommendation: DifficultyRecommendation,
    pub interventions: Vec<Intervention>,
    pub phase: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_change: Option<PhaseChange>,
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    Completed(Box<CycleReport>),
    /// The session was stopped; nothing was computed.
    Stale,
}

impl TickOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            TickOutcome::Completed(report) => Some(report.as_ref()),
            TickOutcome::Stale => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, TickOutcome::Stale)
    }
}

/// All mutable state for one learner session.
pub struct LearningSession {
    id: String,
    profile: LearnerProfile,
    services: EngineServices,
    buffer: EventBuffer,
    trend: TrendAnalyzer,
    predictor: ErrorPredictor,
    executor: InterventionExecutor,
    served: ServedRecency,
    snapshots: VecDeque<StateSnapshot>,
    last_snapshot: StateSnapshot,
    last_recommendation: Option<DifficultyRecommendation>,
    low_streak: u32,
    reevaluation_raised: bool,
    started_at: i64,
    cycles: u64,
    cancelled: bool,
}

impl LearningSession {
    pub fn new(profile: LearnerProfile, services: EngineServices) -> Result<Self, EngineError> {
        profile.validate()?;
        let now = services.clock.now_ms();
        let config = services.config.clone();
        let session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            buffer: EventBuffer::new(config.buffer.capacity),
            trend: TrendAnalyzer::new(config.trend.clone()),
            predictor: ErrorPredictor::new(services.patterns.clone(), config.prediction.clone()),
            executor: InterventionExecutor::new(config.intervention.clone(), now),
            served: services.selector.new_recency(),
            snapshots: VecDeque::with_capacity(config.snapshot_history_capacity),
            last_snapshot: StateSnapshot::neutral(now),
            last_recommendation: None,
            low_streak: 0,
            reevaluation_raised: false,
            started_at: now,
            cycles: 0,
            cancelled: false,
            profile,
            services,
        };
        info!(
            session_id = %session.id,
            learner_id = %session.profile.learner_id,
            grade = %session.profile.grade,
            tier = %session.profile.tier,
            "learning session started"
        );
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> &LearnerProfile {
        &self.profile
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn served(&self) -> &ServedRecency {
        &self.served
    }

    /// Records that a problem was handed to this learner.
    pub fn mark_served(&mut self, problem_id: &str) {
        let now = self.services.clock.now_ms();
        self.served.mark(problem_id, now);
    }

    pub fn phase(&self) -> SessionPhase {
        self.executor.phase()
    }

    pub fn last_snapshot(&self) -> &StateSnapshot {
        &self.last_snapshot
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &StateSnapshot> {
        self.snapshots.iter()
    }

    pub fn active_predictions(&self) -> &[ErrorPrediction] {
        self.predictor.active()
    }

    pub fn prediction_history(&self) -> impl Iterator<Item = &ErrorPrediction> {
        self.predictor.history()
    }

    pub fn last_recommendation(&self) -> Option<&DifficultyRecommendation> {
        self.last_recommendation.as_ref()
    }

    pub fn low_performance_streak(&self) -> u32 {
        self.low_streak
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.services.clock.now_ms() - self.started_at
    }

    /// Stamps and buffers an event. Recording continues while analysis is stopped.
    pub fn record(&mut self, input: EventInput) -> LearningEvent {
        let now = self.services.clock.now_ms();
        self.buffer.record(input, now).clone()
    }

    /// Buffers an event that already carries its timestamp.
    pub fn replay(&mut self, event: LearningEvent) -> LearningEvent {
        self.buffer.push(event).clone()
    }

    fn emit(&self, event: EngineEvent) {
        self.services.sink.emit(&event);
    }

    pub fn cancel(&mut self) -> bool {
        if self.cancelled {
            return false;
        }
        self.cancelled = true;
        self.emit(EngineEvent::AnalysisStopped {
            session_id: self.id.clone(),
            timestamp: self.services.clock.now_ms(),
            buffered_events: self.buffer.len(),
        });
        true
    }

    pub fn resume(&mut self) -> bool {
        if !self.cancelled {
            return false;
        }
        self.cancelled = false;
        info!(session_id = %self.id, buffered_events = self.buffer.len(), "analysis resumed");
        true
    }

    /// Advances the intervention phase machine on an explicit step completion.
    pub fn complete_step(&mut self) -> PhaseChange {
        let change = self.executor.complete_step(self.services.clock.now_ms());
        self.emit(EngineEvent::PhaseChanged {
            session_id: self.id.clone(),
            change: change.clone(),
        });
        change
    }

    fn difficulty_request(&self, snapshot: &StateSnapshot, slice: &[LearningEvent]) -> DifficultyRequest {
        let mut request = DifficultyRequest::new(self.profile.grade, self.profile.tier);
        request.learner_ceiling = self.profile.traits.max_cognitive_load;
        if snapshot.performance.graded_submits > 0 {
            request.recent_accuracy = Some(snapshot.performance.accuracy);
            request.sample_size = snapshot.performance.graded_submits;
        }
        let times: Vec<f64> = slice
            .iter()
            .filter(|e| e.is_submit())
            .map(|e| e.payload.time_spent_ms.max(0) as f64 / 1000.0)
            .collect();
        if !times.is_empty() {
            request.recent_time_on_task_secs = Some(times.iter().sum::<f64>() / times.len() as f64);
        }
        request
    }

    /// One analysis cycle: estimate, recognize, predict, recommend, intervene.
    pub fn tick(&mut self) -> Result<TickOutcome, EngineError> {
        let now = self.services.clock.now_ms();
        if self.cancelled {
            let err = EngineError::StaleSession {
                session_id: self.id.clone(),
            };
            debug!(error = %err, "tick skipped");
            self.emit(EngineEvent::StaleTick {
                session_id: self.id.clone(),
                timestamp: now,
            });
            return Ok(TickOutcome::Stale);
        }

        let config = self.services.config.clone();
        let slice = self.buffer.recent(now, config.buffer.analysis_window_ms);
        let (mut snapshot, fresh) =
            self.services
                .estimator
                .estimate_or_previous(&slice, &self.last_snapshot, now);

        if fresh {
            snapshot.trend = self.trend.observe(&snapshot);
            if self.snapshots.len() >= config.snapshot_history_capacity.max(1) {
                self.snapshots.pop_front();
            }
            self.snapshots.push_back(snapshot.clone());
            self.last_snapshot = snapshot.clone();
        }
        self.emit(EngineEvent::SnapshotComputed {
            session_id: self.id.clone(),
            timestamp: now,
            fatigue: snapshot.cognitive_load.fatigue,
            accuracy: snapshot.performance.accuracy,
            trend: snapshot.trend,
            fresh,
        });

        let elapsed = now - self.started_at;
        let ctx = MatchContext {
            snapshot: &snapshot,
            session_elapsed_ms: elapsed,
        };
        let matches = self.services.recognizer.recognize(&ctx, &slice);
        let predictions = self.predictor.predict(&PredictionInput {
            snapshot: &snapshot,
            matches: &matches,
            slice_len: slice.len(),
            session_elapsed_ms: elapsed,
            attention_span_ms: self.profile.attention_span_ms(),
            now_ms: now,
        });
        self.emit(EngineEvent::PredictionsUpdated {
            session_id: self.id.clone(),
            timestamp: now,
            active: predictions.clone(),
        });

        let phase_change = self.executor.check_budget(now);
        if let Some(change) = &phase_change {
            self.emit(EngineEvent::PhaseChanged {
                session_id: self.id.clone(),
                change: change.clone(),
            });
        }

        let request = self.difficulty_request(&snapshot, &slice);
        let mut recommendation = self.services.controller.recommend(&request)?;
        let mut interventions = Vec::new();

        if fresh && request.recent_accuracy.is_some() {
            if recommendation.low_performance {
                self.low_streak += 1;
            } else {
                self.low_streak = 0;
                self.reevaluation_raised = false;
            }
        }
        if self.profile.tier == Tier::Elite
            && self.low_streak >= config.difficulty.persistent_low_cycles
        {
            recommendation.advisories.push(Advisory::TierReevaluation);
            if !self.reevaluation_raised {
                warn!(
                    session_id = %self.id,
                    cycles = self.low_streak,
                    "persistent low performance on elite tier"
                );
                interventions.push(
                    self.executor
                        .recommend_tier_reevaluation(self.low_streak, now),
                );
                self.reevaluation_raised = true;
            }
        }

        self.emit(EngineEvent::DifficultyRecommended {
            session_id: self.id.clone(),
            timestamp: now,
            recommendation: recommendation.clone(),
        });
        self.last_recommendation = Some(recommendation.clone());

        interventions.extend(self.executor.evaluate(&InterventionContext {
            snapshot: &snapshot,
            predictions: &predictions,
            learning_style: self.profile.learning_style,
            now_ms: now,
        }));
        for intervention in &interventions {
            self.emit(EngineEvent::InterventionFired {
                session_id: self.id.clone(),
                intervention: intervention.clone(),
            });
        }

        self.cycles += 1;
        Ok(TickOutcome::Completed(Box::new(CycleReport {
            cycle: self.cycles,
            timestamp: now,
            snapshot,
            fresh_snapshot: fresh,
            matches,
            predictions,
            recommendation,
            interventions,
            phase: self.executor.phase(),
            phase_change,
        })))
    }

    /// Current recommendation, computing one from the last snapshot when no
    /// cycle has run yet.
    pub fn recommendation(&self) -> Result<DifficultyRecommendation, EngineError> {
        match &self.last_recommendation {
            Some(rec) => Ok(rec.clone()),
            None => self
                .services
                .controller
                .recommend(&self.difficulty_request(&self.last_snapshot, &[])),
        }
    }

    pub fn selection_request(&self, limit: usize) -> Result<SelectionRequest, EngineError> {
        let recommendation = self.recommendation()?;
        let exclude_ids = self
            .buffer
            .iter()
            .filter(|e| e.is_submit())
            .filter_map(|e| e.problem_id.clone())
            .collect();
        Ok(SelectionRequest {
            grade: self.profile.grade,
            tier: self.profile.tier,
            subject: self.profile.primary_subject().to_string(),
            target: recommendation.value,
            exclude_ids,
            limit,
        })
    }

    pub fn audit_records(&self) -> Vec<AuditRecord> {
        collect_records(&self.id, self.snapshots.iter(), self.predictor.history())
    }
}

/// Cloneable, lock-serialized handle to a [`LearningSession`].
#[derive(Clone)]
pub struct SessionHandle {
    id: Arc<str>,
    inner: Arc<Mutex<LearningSession>>,
    selector: Arc<ProblemSelector>,
    sink: Arc<dyn EngineEventSink>,
    clock: Arc<dyn Clock>,
}

impl SessionHandle {
    pub fn new(session: LearningSession) -> Self {
        let services = session.services().clone();
        Self {
            id: Arc::from(session.id()),
            selector: services.selector,
            sink: services.sink,
            clock: services.clock,
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lock(&self) -> MutexGuard<'_, LearningSession> {
        self.inner.lock()
    }

    pub fn record(&self, input: EventInput) -> LearningEvent {
        self.inner.lock().record(input)
    }

    pub fn tick(&self) -> Result<TickOutcome, EngineError> {
        self.inner.lock().tick()
    }

    pub fn cancel(&self) -> bool {
        self.inner.lock().cancel()
    }

    pub fn resume(&self) -> bool {
        self.inner.lock().resume()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().is_cancelled()
    }

    /// Candidate problems for the current recommendation. The session lock is
    /// released before the repository is queried.
    pub async fn next_problems(&self, limit: usize) -> Result<Vec<ProblemDescriptor>, EngineError> {
        let (request, served) = {
            let session = self.inner.lock();
            (session.selection_request(limit)?, session.served().clone())
        };
        match self.selector.select(&request, &served).await {
            Ok(problems) => Ok(problems),
            Err(err) => {
                if let EngineError::NoAvailableContent { reason } = &err {
                    self.sink.emit(&EngineEvent::ContentUnavailable {
                        session_id: self.id.to_string(),
                        timestamp: self.clock.now_ms(),
                        reason: reason.clone(),
                    });
                }
                Err(err)
            }
        }
    }

    pub fn mark_served(&self, problem_id: &str) {
        self.inner.lock().mark_served(problem_id);
    }
}
