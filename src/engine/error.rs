use thiserror::Error;

use crate::engine::types::{Grade, Tier};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no events in the analysis window")]
    MissingData,

    #[error("invalid grade/tier configuration for {grade}/{tier}: {reason}")]
    InvalidGradeTierConfiguration {
        grade: Grade,
        tier: Tier,
        reason: String,
    },

    #[error("no available content: {reason}")]
    NoAvailableContent { reason: String },

    #[error("prediction {pattern_id} below usable confidence ({confidence:.2})")]
    LowConfidencePrediction { pattern_id: String, confidence: f64 },

    #[error("session {session_id} is stopped")]
    StaleSession { session_id: String },

    #[error("invalid learner profile: {0}")]
    InvalidProfile(String),

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("invalid learning plan: {0}")]
    InvalidPlan(String),

    #[error("pattern catalog error: {0}")]
    InvalidCatalog(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    /// Data-sparsity conditions the engine recovers from on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MissingData | Self::LowConfidencePrediction { .. } | Self::StaleSession { .. }
        )
    }
}

/// Errors reported by a [`ProblemRepository`](crate::engine::selector::ProblemRepository).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    #[error("query rejected: {0}")]
    Rejected(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
