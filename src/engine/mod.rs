pub mod audit;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod difficulty;
pub mod error;
pub mod intervention;
pub mod modeling;
pub mod path;
pub mod patterns;
pub mod prediction;
pub mod selector;
pub mod session;
pub mod sink;
pub mod ticker;
pub mod types;

pub use buffer::EventBuffer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use difficulty::{
    DifficultyController, DifficultyMatrix, DifficultyMatrixEntry, DifficultyRequest, ELITE_FLOOR,
};
pub use error::{EngineError, EngineResult, RepositoryError};
pub use intervention::{InterventionExecutor, PhaseChange, SessionPhase};
pub use modeling::{StateEstimator, TrendAnalyzer};
pub use path::{LearningPathStep, LearningPlan, PathOrchestrator, PlanPhase, ReplanOutcome, StepStatus};
pub use patterns::{PatternCatalog, PatternMatch, PatternRecognizer};
pub use prediction::ErrorPredictor;
pub use selector::{
    InMemoryProblemRepository, ProblemQuery, ProblemRepository, ProblemSelector, SelectionRequest,
    ServedRecency,
};
pub use session::{CycleReport, EngineServices, LearningSession, SessionHandle, TickOutcome};
pub use sink::{EngineEvent, EngineEventSink, MemorySink, TracingSink};
pub use ticker::AnalysisTicker;
pub use types::*;
